//! File-backed journal.
//!
//! Chunks are plain files in one directory:
//!   {dir}/{name}.{state}{stamp:016x}.{nonce:016x}{suffix}
//!
//! `state` is `b` for the open head chunk and `q` for sealed chunks. The
//! stamp is microseconds since the epoch, forced strictly increasing per
//! journal, so lexical order of the fixed-width hex equals append order.
//! The nonce comes from the injected RNG and keeps names unique across
//! processes sharing a directory.
//!
//! Every append is followed by `sync_data`. A crashed process leaves its
//! head chunk behind as a `b` file; the next `open` seals it and queues it
//! behind any older sealed chunks.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

use crate::{Journal, JournalChunk, JournalError};

/// Source of wall-clock time for chunk naming.
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

type SharedRng = Arc<Mutex<Box<dyn RngCore + Send>>>;

const HEAD: char = 'b';
const SEALED: char = 'q';

// ── Factory ───────────────────────────────────────────────────────────────────

/// Builds file journals that share one clock, one RNG, and one set of
/// file settings. Settings are fixed at construction.
pub struct FileJournalFactory {
    clock: Clock,
    rng: SharedRng,
    suffix: String,
    mode: u32,
    max_chunk_size: u64,
}

impl FileJournalFactory {
    pub fn new(
        clock: Clock,
        rng: impl RngCore + Send + 'static,
        suffix: impl Into<String>,
        mode: u32,
        max_chunk_size: u64,
    ) -> Self {
        let rng: Box<dyn RngCore + Send> = Box::new(rng);
        Self {
            clock,
            rng: Arc::new(Mutex::new(rng)),
            suffix: suffix.into(),
            mode,
            max_chunk_size,
        }
    }

    /// Open (or create) the journal `name` inside `dir`, recovering any
    /// chunks a previous run left behind.
    pub fn open(&self, dir: impl Into<PathBuf>, name: &str) -> Result<FileJournal, JournalError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| JournalError::io(&dir, e))?;

        let journal = FileJournal {
            dir,
            name: name.to_string(),
            suffix: self.suffix.clone(),
            mode: self.mode,
            max_chunk_size: self.max_chunk_size,
            clock: self.clock.clone(),
            rng: self.rng.clone(),
            inner: Mutex::new(Inner::default()),
        };
        journal.recover()?;
        Ok(journal)
    }
}

// ── Journal ───────────────────────────────────────────────────────────────────

pub struct FileJournal {
    dir: PathBuf,
    name: String,
    suffix: String,
    mode: u32,
    max_chunk_size: u64,
    clock: Clock,
    rng: SharedRng,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    head: Option<Head>,
    queue: Vec<Arc<FileChunk>>,
    last_stamp: u64,
    disposed: bool,
}

struct Head {
    file: File,
    path: PathBuf,
    stamp: u64,
    nonce: u64,
    size: u64,
}

impl FileJournal {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, JournalError> {
        self.inner.lock().map_err(|_| JournalError::Poisoned)
    }

    fn chunk_path(&self, state: char, stamp: u64, nonce: u64) -> PathBuf {
        self.dir.join(format!(
            "{}.{}{:016x}.{:016x}{}",
            self.name, state, stamp, nonce, self.suffix
        ))
    }

    /// Parse `{name}.{state}{stamp}.{nonce}{suffix}`. Anything else in the
    /// directory is not ours.
    fn parse_chunk_name(&self, file_name: &str) -> Option<(char, u64, u64)> {
        let rest = file_name
            .strip_prefix(self.name.as_str())?
            .strip_prefix('.')?
            .strip_suffix(self.suffix.as_str())?;
        let mut chars = rest.chars();
        let state = chars.next()?;
        if state != HEAD && state != SEALED {
            return None;
        }
        let (stamp, nonce) = chars.as_str().split_once('.')?;
        if stamp.len() != 16 || nonce.len() != 16 {
            return None;
        }
        let stamp = u64::from_str_radix(stamp, 16).ok()?;
        let nonce = u64::from_str_radix(nonce, 16).ok()?;
        Some((state, stamp, nonce))
    }

    fn next_stamp(&self, last: &mut u64) -> u64 {
        let now = (self.clock)()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        let stamp = now.max(*last + 1);
        *last = stamp;
        stamp
    }

    fn next_nonce(&self) -> Result<u64, JournalError> {
        let mut rng = self.rng.lock().map_err(|_| JournalError::Poisoned)?;
        Ok(rng.next_u64())
    }

    fn recover(&self) -> Result<(), JournalError> {
        let mut found = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| JournalError::io(&self.dir, e))?;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some((state, stamp, nonce)) = self.parse_chunk_name(file_name) {
                found.push((stamp, nonce, state, entry.path()));
            }
        }
        found.sort_by_key(|(stamp, nonce, _, _)| (*stamp, *nonce));

        let mut inner = self.lock()?;
        let mut leftover_heads = 0;
        for (stamp, nonce, state, path) in found {
            inner.last_stamp = inner.last_stamp.max(stamp);
            let path = if state == HEAD {
                leftover_heads += 1;
                let sealed = self.chunk_path(SEALED, stamp, nonce);
                fs::rename(&path, &sealed).map_err(|e| JournalError::io(&path, e))?;
                sealed
            } else {
                path
            };
            let empty = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(false);
            if empty {
                let _ = fs::remove_file(&path);
                continue;
            }
            inner.queue.push(Arc::new(FileChunk::new(path)));
        }

        if !inner.queue.is_empty() {
            tracing::info!(
                journal = %self.name,
                dir = %self.dir.display(),
                pending = inner.queue.len(),
                leftover_heads,
                "recovered pending chunks"
            );
        }
        Ok(())
    }

    fn create_head(&self, inner: &mut Inner) -> Result<Head, JournalError> {
        let stamp = self.next_stamp(&mut inner.last_stamp);
        let nonce = self.next_nonce()?;
        let path = self.chunk_path(HEAD, stamp, nonce);

        let mut options = OpenOptions::new();
        options.create_new(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.mode);
        }
        let file = options.open(&path).map_err(|e| JournalError::io(&path, e))?;

        tracing::debug!(journal = %self.name, path = %path.display(), "opened head chunk");
        Ok(Head {
            file,
            path,
            stamp,
            nonce,
            size: 0,
        })
    }

    /// Close the head chunk and move it to the queue. An empty head is
    /// deleted instead.
    fn seal_head(&self, inner: &mut Inner) -> Result<(), JournalError> {
        let Some(head) = inner.head.take() else {
            return Ok(());
        };

        if head.size == 0 {
            let path = head.path.clone();
            drop(head);
            let _ = fs::remove_file(&path);
            return Ok(());
        }

        let sealed = self.chunk_path(SEALED, head.stamp, head.nonce);
        if let Err(e) = fs::rename(&head.path, &sealed) {
            // Keep appending to the same head; the next seal retries the rename
            let err = JournalError::io(&head.path, e);
            inner.head = Some(head);
            return Err(err);
        }
        tracing::debug!(journal = %self.name, path = %sealed.display(), size = head.size, "sealed chunk");
        drop(head);
        inner.queue.push(Arc::new(FileChunk::new(sealed)));
        Ok(())
    }
}

impl Journal for FileJournal {
    fn write(&self, data: &[u8]) -> Result<(), JournalError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        if inner.disposed {
            return Err(JournalError::Disposed);
        }

        let len = data.len() as u64;
        let needs_rotation = inner
            .head
            .as_ref()
            .is_some_and(|h| h.size > 0 && h.size + len > self.max_chunk_size);
        if needs_rotation {
            if let Err(e) = self.seal_head(inner) {
                tracing::warn!(journal = %self.name, error = %e, "rotation failed, appending to the open chunk");
            }
        }

        let mut head = match inner.head.take() {
            Some(head) => head,
            None => self.create_head(inner)?,
        };
        let result = head
            .file
            .write_all(data)
            .and_then(|()| head.file.sync_data())
            .map_err(|e| JournalError::io(&head.path, e));
        match result {
            Ok(()) => head.size += len,
            // Cut off a partial append so the chunk stays a clean unit sequence
            Err(_) => {
                let _ = head.file.set_len(head.size);
            }
        }
        inner.head = Some(head);
        result
    }

    fn chunks(&self) -> Result<Vec<Arc<dyn JournalChunk>>, JournalError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        if inner.disposed {
            return Err(JournalError::Disposed);
        }
        if inner.head.as_ref().is_some_and(|h| h.size > 0) {
            self.seal_head(inner)?;
        }
        inner.queue.retain(|c| !c.is_disposed());
        Ok(inner
            .queue
            .iter()
            .map(|c| c.clone() as Arc<dyn JournalChunk>)
            .collect())
    }

    fn dispose(&self) -> Result<(), JournalError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        if inner.disposed {
            return Ok(());
        }
        inner.disposed = true;
        let sealed = self.seal_head(inner);
        inner.queue.retain(|c| !c.is_disposed());
        tracing::info!(
            journal = %self.name,
            pending = inner.queue.len(),
            "journal disposed"
        );
        inner.queue.clear();
        sealed
    }
}

// ── Chunk ─────────────────────────────────────────────────────────────────────

pub struct FileChunk {
    path: PathBuf,
    label: String,
    disposed: AtomicBool,
}

impl FileChunk {
    fn new(path: PathBuf) -> Self {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            label,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalChunk for FileChunk {
    fn label(&self) -> &str {
        &self.label
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>, JournalError> {
        let file = File::open(&self.path).map_err(|e| JournalError::io(&self.path, e))?;
        Ok(Box::new(file))
    }

    fn dispose(&self) -> Result<(), JournalError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                // Still on disk, so it must stay pending
                self.disposed.store(false, Ordering::Release);
                Err(JournalError::io(&self.path, e))
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl fmt::Display for FileChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
