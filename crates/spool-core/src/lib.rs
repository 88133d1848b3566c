//! spool-core — record model, wire encoding, and configuration.
//! All other spool crates depend on this one.

pub mod config;
pub mod record;
pub mod wire;

pub use record::{Record, RecordBatch, Value};
