//! spool-forward — the ingestion → journal → network pipeline.
//!
//! Two long-lived tasks do all the work:
//! - the emitter drains the ingestion channel, encodes each batch, and
//!   appends it to the journal;
//! - the spooler wakes on a fixed interval, walks pending journal chunks in
//!   order, and pushes their bytes through the network sender.
//!
//! Shutdown runs the other way: `stop()` closes ingestion, the emitter
//! drains what was already queued and then signals the spooler, and the
//! spooler releases the journal and the connection.

pub mod emitter;
pub mod lifecycle;
pub mod output;
pub mod sender;
pub mod spooler;
pub mod stats;

#[cfg(test)]
mod testing;

pub use lifecycle::{Lifecycle, State};
pub use output::{EmitOutcome, ForwardOutput, OutputError};
pub use sender::{Connect, Delivery, SendError, Sender, TcpConnector};
pub use spooler::{FlushError, Flushed};
pub use stats::{Stats, StatsSnapshot};
