//! Spooler — drains the journal to the destination on a fixed interval.
//!
//! Sole consumer of the journal and sole owner of the connection. Each tick
//! walks the pending chunks oldest first and disposes a chunk only after all
//! of its bytes were written. Any failure ends the tick; the chunk in flight
//! is resent whole on the next one.

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use spool_journal::{Journal, JournalChunk, JournalError};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::sender::{Connect, Delivery, SendError, Sender};
use crate::stats::Stats;

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("journal: {0}")]
    Journal(#[from] JournalError),

    #[error("reading chunk {chunk} failed: {source}")]
    Read {
        chunk: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Send(#[from] SendError),
}

/// How a flush pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flushed {
    /// Every pending chunk was delivered and disposed.
    Drained { chunks: usize },
    /// Shutdown interrupted the pass.
    Interrupted { chunks: usize },
}

pub struct Spooler<C: Connect> {
    journal: Arc<dyn Journal>,
    sender: Sender<C>,
    flush_interval: Duration,
    buffer: Vec<u8>,
    buffer_size: usize,
    shutdown: oneshot::Receiver<()>,
    stats: Arc<Stats>,
}

impl<C: Connect> Spooler<C> {
    pub fn new(
        journal: Arc<dyn Journal>,
        sender: Sender<C>,
        flush_interval: Duration,
        transfer_buffer_size: usize,
        shutdown: oneshot::Receiver<()>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            journal,
            sender,
            flush_interval: flush_interval.max(Duration::from_millis(1)),
            buffer: vec![0; transfer_buffer_size.max(1)],
            buffer_size: transfer_buffer_size.max(1),
            shutdown,
            stats,
        }
    }

    pub async fn run(mut self) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.flush_interval.as_millis() as u64, "spooler started");

        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => break,
                _ = ticker.tick() => {
                    match self.flush().await {
                        Ok(Flushed::Drained { chunks }) if chunks > 0 => {
                            debug!(chunks, "flushed");
                        }
                        Ok(Flushed::Interrupted { chunks }) => {
                            debug!(chunks, "flush interrupted by shutdown");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            self.stats.record_flush_error();
                            error!(error = %e, "flush failed");
                        }
                    }
                }
            }
        }

        if let Err(e) = self.journal.dispose() {
            error!(error = %e, "journal dispose failed");
        }
        self.sender.close().await;
        info!("spooler ended");
    }

    /// One pass over every pending chunk, oldest first.
    pub async fn flush(&mut self) -> Result<Flushed, FlushError> {
        let chunks = self.journal.chunks()?;
        let mut delivered = 0;
        for chunk in chunks {
            match self.flush_chunk(chunk.as_ref()).await? {
                Delivery::Delivered => delivered += 1,
                Delivery::Abandoned => return Ok(Flushed::Interrupted { chunks: delivered }),
            }
        }
        Ok(Flushed::Drained { chunks: delivered })
    }

    async fn flush_chunk(&mut self, chunk: &dyn JournalChunk) -> Result<Delivery, FlushError> {
        let mut reader = chunk.reader()?;
        loop {
            let buffer = std::mem::take(&mut self.buffer);
            let read = tokio::task::spawn_blocking(move || {
                let mut reader = reader;
                let mut buffer = buffer;
                let result = read_some(reader.as_mut(), &mut buffer);
                (reader, buffer, result)
            })
            .await;
            let (back, buffer, result) = match read {
                Ok(parts) => parts,
                Err(e) => {
                    self.buffer = vec![0; self.buffer_size];
                    return Err(FlushError::Read {
                        chunk: chunk.to_string(),
                        source: io::Error::other(e),
                    });
                }
            };
            reader = back;
            self.buffer = buffer;

            let n = result.map_err(|source| FlushError::Read {
                chunk: chunk.to_string(),
                source,
            })?;
            if n == 0 {
                break;
            }
            if self.sender.send(&self.buffer[..n]).await? == Delivery::Abandoned {
                return Ok(Delivery::Abandoned);
            }
        }

        chunk.dispose()?;
        self.stats.record_disposed();
        debug!(chunk = %chunk, "chunk delivered");
        Ok(Delivery::Delivered)
    }
}

fn read_some(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}
