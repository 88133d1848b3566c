//! ForwardOutput — the public face of the pipeline.
//!
//! Owns the ingestion channel and the lifecycle, and wires the emitter and
//! the spooler together on `start()`:
//!
//! ```text
//!   emit() ──mpsc(1)──▶ Emitter ──write──▶ Journal ──chunks──▶ Spooler ──▶ Sender ──▶ destination
//!                          │                                       ▲
//!                          └──────────── oneshot shutdown ─────────┘
//! ```
//!
//! `stop()` closes the channel. The emitter drains what was already
//! accepted, then signals the spooler, which disposes the journal and
//! closes the connection. Chunks not yet delivered stay on disk.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use spool_core::config::{OutputConfig, SpoolConfig};
use spool_core::{Record, RecordBatch};
use spool_journal::{FileJournalFactory, Journal, JournalError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::emitter::{self, Emitter};
use crate::lifecycle::{Lifecycle, State};
use crate::sender::{Connect, Sender, TcpConnector};
use crate::spooler::Spooler;
use crate::stats::{Stats, StatsSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("journal: {0}")]
    Journal(#[from] JournalError),
}

/// Result of one `emit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Every batch was handed to the emitter.
    Accepted(usize),
    /// Shutdown began partway; the remaining batches were dropped.
    Closed { accepted: usize, dropped: usize },
}

struct Parts<R, C> {
    journal: Arc<dyn Journal>,
    connector: C,
    batches: mpsc::Receiver<RecordBatch<R>>,
}

pub struct ForwardOutput<R = Record, C: Connect = TcpConnector> {
    config: OutputConfig,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<Stats>,
    ingest: RwLock<Option<mpsc::Sender<RecordBatch<R>>>>,
    parts: Mutex<Option<Parts<R, C>>>,
}

impl ForwardOutput<Record, TcpConnector> {
    /// Build a TCP output over the file journal described by `config`.
    pub fn open(config: &SpoolConfig) -> Result<Self, OutputError> {
        let factory = FileJournalFactory::new(
            Arc::new(SystemTime::now),
            StdRng::from_entropy(),
            config.journal.file_suffix.clone(),
            config.journal.file_mode,
            config.journal.max_chunk_size,
        );
        let journal = factory.open(&config.journal.path, &config.journal.name)?;
        info!(
            path = %config.journal.path.display(),
            name = %config.journal.name,
            "journal opened"
        );
        Ok(Self::new(config.output.clone(), Arc::new(journal), TcpConnector))
    }
}

impl<R, C> ForwardOutput<R, C>
where
    R: Serialize + Send + 'static,
    C: Connect,
{
    pub fn new(config: OutputConfig, journal: Arc<dyn Journal>, connector: C) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            config,
            lifecycle: Arc::new(Lifecycle::new()),
            stats: Arc::new(Stats::new()),
            ingest: RwLock::new(Some(tx)),
            parts: Mutex::new(Some(Parts {
                journal,
                connector,
                batches: rx,
            })),
        }
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the spooler and the emitter. Only the first call does anything.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if !self.lifecycle.start() {
            warn!(state = ?self.state(), "start ignored");
            return;
        }
        let Some(parts) = self.parts.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let sender = Sender::new(
            parts.connector,
            &self.config,
            self.lifecycle.clone(),
            self.stats.clone(),
        );
        let spooler = Spooler::new(
            parts.journal.clone(),
            sender,
            self.config.flush_interval(),
            self.config.transfer_buffer_size,
            shutdown_rx,
            self.stats.clone(),
        );
        let emitter = Emitter::new(parts.journal, parts.batches, shutdown_tx, self.stats.clone());

        let spooler = tokio::spawn(spooler.run());
        let emitter = tokio::spawn(emitter.run());

        let lifecycle = self.lifecycle.clone();
        tokio::spawn(async move {
            // Emitter first: it is the one that releases the spooler
            for (task, handle) in [("emitter", emitter), ("spooler", spooler)] {
                if let Err(e) = handle.await {
                    error!(task, error = %e, "pipeline task failed");
                }
            }
            lifecycle.stop();
            lifecycle.mark_stopped();
            info!("forward output stopped");
        });

        info!(address = %self.config.address, "forward output started");
    }

    /// Hand batches to the emitter in order, one at a time.
    ///
    /// Waits while the emitter is busy. Once shutdown begins, the rest of
    /// the sequence is dropped without error.
    pub async fn emit<I>(&self, batches: I) -> EmitOutcome
    where
        I: IntoIterator<Item = RecordBatch<R>>,
    {
        let ingest = self
            .ingest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut rest = batches.into_iter();
        let mut accepted = 0;
        let mut dropped = 0;
        for batch in rest.by_ref() {
            let Some(ingest) = ingest.as_ref() else {
                dropped = 1;
                break;
            };
            if self.lifecycle.is_stopping() || ingest.send(batch).await.is_err() {
                dropped = 1;
                break;
            }
            accepted += 1;
        }
        dropped += rest.count();

        self.stats.record_accepted(accepted as u64);
        if dropped == 0 {
            return EmitOutcome::Accepted(accepted);
        }
        self.stats.record_dropped(dropped as u64);
        debug!(accepted, dropped, "output closed, dropping batches");
        EmitOutcome::Closed { accepted, dropped }
    }

    /// Request shutdown. Safe to call any number of times from anywhere.
    pub fn stop(&self) {
        let Some(prior) = self.lifecycle.stop() else {
            debug!("stop already requested");
            return;
        };
        self.ingest
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!(from = ?prior, "stopping forward output");

        if prior == State::Created {
            if let Some(mut parts) = self.parts.lock().unwrap_or_else(PoisonError::into_inner).take() {
                // Batches accepted before start are still owed to the journal
                parts.batches.close();
                let mut queued = 0;
                while let Ok(batch) = parts.batches.try_recv() {
                    emitter::append_now(parts.journal.as_ref(), &batch, &self.stats);
                    queued += 1;
                }
                if queued > 0 {
                    info!(batches = queued, "journaled batches queued before start");
                }
                if let Err(e) = parts.journal.dispose() {
                    error!(error = %e, "journal dispose failed");
                }
            }
            self.lifecycle.mark_stopped();
        }
    }

    /// Resolve once both pipeline tasks have exited.
    ///
    /// Returns immediately if the output was neither started nor stopped.
    pub async fn wait_for_shutdown(&self) {
        if self.state() == State::Created {
            warn!("wait_for_shutdown on an output that was never started");
            return;
        }
        self.lifecycle.reached(State::Stopped).await;
    }
}
