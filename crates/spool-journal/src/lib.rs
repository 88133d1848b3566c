//! spool-journal — the durable buffer between ingestion and delivery.
//!
//! A journal is an append-only queue of opaque blobs, grouped into chunks.
//! The emitter appends; the spooler walks sealed chunks in FIFO order and
//! disposes each one only after it has been fully delivered. Disposal is
//! the only thing that ever removes data.
//!
//! Two implementations ship here:
//! - [`FileJournal`]: chunk files on local disk, fsynced on every append.
//! - [`MemoryJournal`]: an in-process double with fault injection for tests.

use std::fmt;
use std::io::Read;
use std::sync::Arc;

pub mod file;
pub mod memory;

pub use file::{Clock, FileJournal, FileJournalFactory};
pub use memory::MemoryJournal;

/// Durable, internally synchronized append-only buffer.
///
/// The emitter and the spooler call into the same journal concurrently, so
/// every implementation must be safe to share across tasks.
pub trait Journal: Send + Sync {
    /// Append one blob. Must not return until the append is durable.
    fn write(&self, data: &[u8]) -> Result<(), JournalError>;

    /// Seal the open chunk (if it holds anything) and return every pending
    /// chunk, oldest first.
    ///
    /// Chunks are never disposed here. Callers walk the list in order, stop
    /// at their first failure, and dispose what they finished.
    fn chunks(&self) -> Result<Vec<Arc<dyn JournalChunk>>, JournalError>;

    /// Release all resources. Pending chunks stay on durable storage.
    fn dispose(&self) -> Result<(), JournalError>;
}

/// A sealed, immutable unit of buffered bytes.
pub trait JournalChunk: Send + Sync + fmt::Display {
    /// Diagnostic label. Unique within a journal.
    fn label(&self) -> &str;

    /// Sequential reader over the chunk's bytes.
    fn reader(&self) -> Result<Box<dyn Read + Send>, JournalError>;

    /// Remove the chunk from the durable set. Idempotent, and safe to call
    /// after a read failed partway.
    fn dispose(&self) -> Result<(), JournalError>;

    fn is_disposed(&self) -> bool;
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal I/O failed on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("journal has been disposed")]
    Disposed,

    #[error("journal lock poisoned")]
    Poisoned,

    #[error("injected fault: {0}")]
    Injected(&'static str),
}

impl JournalError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        JournalError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
