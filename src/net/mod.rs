//! Duplex channel plumbing.
//!
//! ARCHITECTURE
//! ============
//! `connection` owns the socket and its timers, `router` turns raw frames
//! into typed snapshots, and `message` defines the wire vocabulary both of
//! them share.

pub mod connection;
pub mod message;
pub mod router;

pub use connection::{ConnectionManager, ConnectionState, Dialer, WsDialer};
pub use message::{InboundMessage, MessageFacets, ProgressUpdate};
pub use router::MessageRouter;
