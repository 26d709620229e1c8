//! DataGenesis client — synthetic-data generation against a remote backend
//! with a local fallback engine.
//!
//! ARCHITECTURE
//! ============
//! ```text
//! Orchestrator ──HTTP──▶ api::HttpBackend ──▶ backend
//!      ▲                                         │
//!      │ progress                                │ duplex frames
//!      │                                         ▼
//! net::MessageRouter ◀── net::ConnectionManager ◀┘
//!      │
//!      └──▶ progress_log::EventLog
//! ```
//!
//! When the backend is unreachable the orchestrator switches to
//! [`fallback`], which infers schemas and synthesizes rows locally.

pub mod api;
pub mod auth;
pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod fallback;
pub mod model;
pub mod net;
pub mod orchestrator;
pub mod progress_log;

pub use error::{ClientError, ParseError};
