//! Local fallback engine.
//!
//! ARCHITECTURE
//! ============
//! Network-independent approximations of the backend, used when a schema or
//! generation call fails with a network or remote error, and the parser for
//! uploaded files (which never touches the network).
//!
//! - `synth`: per-field value synthesis
//! - `schema`: schema inference from a description or uploaded rows
//! - `pipeline`: staged local generation with heuristic scores
//! - `parse`: CSV/JSON upload parsing

pub mod parse;
pub mod pipeline;
pub mod schema;
pub mod synth;

pub use parse::parse_upload;
pub use pipeline::run_local_pipeline;
pub use schema::{infer_schema, schema_from_description, schema_from_upload};
pub use synth::{synthesize_rows, synthesize_value};
