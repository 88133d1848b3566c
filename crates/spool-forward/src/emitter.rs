//! Emitter — encodes accepted batches and appends them to the journal.
//!
//! Sole writer into the journal. Runs until the ingestion channel is closed
//! and drained, then tells the spooler to shut down.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use spool_core::wire;
use spool_core::RecordBatch;
use spool_journal::Journal;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::stats::Stats;

pub struct Emitter<R> {
    journal: Arc<dyn Journal>,
    batches: mpsc::Receiver<RecordBatch<R>>,
    spooler_shutdown: oneshot::Sender<()>,
    stats: Arc<Stats>,
}

impl<R: Serialize> Emitter<R> {
    pub fn new(
        journal: Arc<dyn Journal>,
        batches: mpsc::Receiver<RecordBatch<R>>,
        spooler_shutdown: oneshot::Sender<()>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            journal,
            batches,
            spooler_shutdown,
            stats,
        }
    }

    pub async fn run(mut self) {
        while let Some(batch) = self.batches.recv().await {
            let Some(encoded) = encode(&batch, &self.stats) else {
                continue;
            };
            let journal = self.journal.clone();
            let blob = encoded.clone();
            // Appends fsync; keep them off the runtime threads
            let written = match tokio::task::spawn_blocking(move || journal.write(&blob)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(format!("append task failed: {e}")),
            };
            record_append(&self.stats, &batch, encoded.len(), written);
        }

        // Receiver may already be gone if the spooler task died
        let _ = self.spooler_shutdown.send(());
        info!("emitter ended");
    }
}

/// Encode and append one batch on the calling thread.
///
/// For callers outside the runtime's async context, such as a stop that
/// races ahead of start.
pub(crate) fn append_now<R: Serialize>(journal: &dyn Journal, batch: &RecordBatch<R>, stats: &Stats) {
    if let Some(encoded) = encode(batch, stats) {
        let written = journal.write(&encoded).map_err(|e| e.to_string());
        record_append(stats, batch, encoded.len(), written);
    }
}

fn encode<R: Serialize>(batch: &RecordBatch<R>, stats: &Stats) -> Option<Bytes> {
    match wire::encode_batch(batch) {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            stats.record_dropped(1);
            error!(tag = %batch.tag, records = batch.len(), error = %e, "encode failed, dropping batch");
            None
        }
    }
}

fn record_append<R>(stats: &Stats, batch: &RecordBatch<R>, bytes: usize, written: Result<(), String>) {
    if let Err(e) = written {
        stats.record_dropped(1);
        error!(tag = %batch.tag, bytes, error = %e, "journal write failed, dropping batch");
        return;
    }
    stats.record_journaled(bytes as u64);
    debug!(tag = %batch.tag, entries = batch.len(), bytes, "processed entries");
}
