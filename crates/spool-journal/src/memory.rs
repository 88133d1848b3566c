//! In-memory journal for tests.
//!
//! Same chunking rules as the file journal (seal on flush, rotate at
//! `max_chunk_size`) without touching disk. Faults can be switched on to
//! exercise the pipeline's error paths.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};

use crate::{Journal, JournalChunk, JournalError};

#[derive(Default)]
pub struct MemoryJournal {
    max_chunk_size: u64,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    fail_writes: AtomicBool,
    fail_reads: Arc<AtomicBool>,
    disposed: AtomicBool,
}

#[derive(Default)]
struct Inner {
    head: BytesMut,
    queue: Vec<Arc<MemoryChunk>>,
    all: Vec<Arc<MemoryChunk>>,
}

impl MemoryJournal {
    pub fn new(max_chunk_size: u64) -> Self {
        Self {
            max_chunk_size,
            ..Self::default()
        }
    }

    /// Make every subsequent `write` fail.
    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Make every chunk reader fail on its first read.
    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Contents of every pending chunk, head included, oldest first.
    pub fn pending(&self) -> Vec<Bytes> {
        let Ok(inner) = self.lock() else {
            return Vec::new();
        };
        let mut out: Vec<Bytes> = inner
            .queue
            .iter()
            .filter(|c| !c.is_disposed())
            .map(|c| c.data.clone())
            .collect();
        if !inner.head.is_empty() {
            out.push(Bytes::copy_from_slice(&inner.head));
        }
        out
    }

    /// Labels of chunks disposed so far, in seal order.
    pub fn disposed_labels(&self) -> Vec<String> {
        let Ok(inner) = self.lock() else {
            return Vec::new();
        };
        inner
            .all
            .iter()
            .filter(|c| c.is_disposed())
            .map(|c| c.label.clone())
            .collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, JournalError> {
        self.inner.lock().map_err(|_| JournalError::Poisoned)
    }

    fn seal(&self, inner: &mut Inner) {
        if inner.head.is_empty() {
            return;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let chunk = Arc::new(MemoryChunk {
            label: format!("memory-{id}"),
            data: inner.head.split().freeze(),
            disposed: AtomicBool::new(false),
            fail_reads: self.fail_reads.clone(),
        });
        inner.queue.push(chunk.clone());
        inner.all.push(chunk);
    }
}

impl Journal for MemoryJournal {
    fn write(&self, data: &[u8]) -> Result<(), JournalError> {
        if self.is_disposed() {
            return Err(JournalError::Disposed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(JournalError::Injected("write"));
        }
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let len = data.len() as u64;
        if !inner.head.is_empty() && inner.head.len() as u64 + len > self.max_chunk_size {
            self.seal(inner);
        }
        inner.head.extend_from_slice(data);
        Ok(())
    }

    fn chunks(&self) -> Result<Vec<Arc<dyn JournalChunk>>, JournalError> {
        if self.is_disposed() {
            return Err(JournalError::Disposed);
        }
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        self.seal(inner);
        inner.queue.retain(|c| !c.is_disposed());
        Ok(inner
            .queue
            .iter()
            .map(|c| c.clone() as Arc<dyn JournalChunk>)
            .collect())
    }

    fn dispose(&self) -> Result<(), JournalError> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MemoryChunk {
    label: String,
    data: Bytes,
    disposed: AtomicBool,
    fail_reads: Arc<AtomicBool>,
}

impl JournalChunk for MemoryChunk {
    fn label(&self) -> &str {
        &self.label
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>, JournalError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Ok(Box::new(FailingReader));
        }
        Ok(Box::new(Cursor::new(self.data.clone())))
    }

    fn dispose(&self) -> Result<(), JournalError> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl fmt::Display for MemoryChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("injected read failure"))
    }
}
