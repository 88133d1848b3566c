//! Spool integration test harness.
//!
//! Every test runs the real pipeline against a loopback TCP collector and a
//! file journal under the system temp dir. Nothing here needs root or any
//! external service:
//!
//!   cargo test --test integration
//!
//! Each test owns its collector and its journal directory.

mod infra;

mod recovery;
mod shutdown;

pub use infra::*;
