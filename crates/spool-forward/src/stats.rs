//! Lock-free pipeline counters.
//!
//! Updated from the emitter, the spooler, and the sender without
//! coordination. Read through [`Stats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    batches_accepted: AtomicU64,
    batches_dropped: AtomicU64,
    bytes_journaled: AtomicU64,
    bytes_forwarded: AtomicU64,
    chunks_disposed: AtomicU64,
    flush_errors: AtomicU64,
    connect_attempts: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub batches_accepted: u64,
    pub batches_dropped: u64,
    pub bytes_journaled: u64,
    pub bytes_forwarded: u64,
    pub chunks_disposed: u64,
    pub flush_errors: u64,
    pub connect_attempts: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self, batches: u64) {
        self.batches_accepted.fetch_add(batches, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, batches: u64) {
        self.batches_dropped.fetch_add(batches, Ordering::Relaxed);
    }

    pub fn record_journaled(&self, bytes: u64) {
        self.bytes_journaled.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self, bytes: u64) {
        self.bytes_forwarded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_disposed(&self) {
        self.chunks_disposed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_error(&self) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_accepted: self.batches_accepted.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            bytes_journaled: self.bytes_journaled.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            chunks_disposed: self.chunks_disposed.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
        }
    }
}
