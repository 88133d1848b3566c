use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use spool_core::config::SpoolConfig;
use spool_core::wire;
use spool_core::{Record, RecordBatch};
use spool_journal::{FileJournal, FileJournalFactory};

// ── Collector ─────────────────────────────────────────────────────────────────

/// Loopback destination that records every byte it receives.
pub struct Collector {
    address: String,
    received: Arc<Mutex<Vec<u8>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl Collector {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind collector")?;
        let address = listener.local_addr()?.to_string();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let received = received.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let received = received.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 4096];
                        loop {
                            match stream.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => received.lock().unwrap().extend_from_slice(&buf[..n]),
                            }
                        }
                    });
                }
            })
        };

        Ok(Self {
            address,
            received,
            connections,
            task,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }

    /// Poll until at least `count` complete units have arrived.
    pub async fn wait_for_batches(&self, count: usize, limit: Duration) -> Result<Vec<RecordBatch>> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            // A unit cut mid-transfer fails to decode; try again later
            if let Ok(batches) = wire::decode_stream::<Record>(&self.received()) {
                if batches.len() >= count {
                    return Ok(batches);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "collector saw {} bytes, expected {count} batches",
                    self.received().len()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An address nothing listens on.
pub async fn refused_address() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?.to_string();
    drop(listener);
    Ok(address)
}

// ── Journal helpers ───────────────────────────────────────────────────────────

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn temp_dir(label: &str) -> PathBuf {
    let id = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "spool-it-{label}-{}-{id}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Fast-ticking config pointed at `address`, journaling under `dir`.
pub fn spool_config(dir: &Path, address: &str) -> SpoolConfig {
    let mut config = SpoolConfig::default();
    config.output.address = address.to_string();
    config.output.flush_interval_ms = 20;
    config.output.retry_interval_ms = 50;
    config.output.connection_timeout_ms = 1_000;
    config.journal.path = dir.to_path_buf();
    config
}

/// Open the journal in `dir` directly, outside any pipeline.
pub fn open_journal(dir: &Path) -> Result<FileJournal> {
    let factory = FileJournalFactory::new(
        Arc::new(SystemTime::now),
        StdRng::seed_from_u64(42),
        ".log",
        0o600,
        16 * 1024 * 1024,
    );
    factory
        .open(dir, "output")
        .context("failed to open journal")
}

/// Chunk files currently present in `dir`.
pub fn chunk_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    files.sort();
    files
}

pub fn batch(tag: &str, stamps: &[u64]) -> RecordBatch {
    let records = stamps
        .iter()
        .map(|&ts| Record::new(ts).with("seq", ts))
        .collect();
    RecordBatch::new(tag, records)
}
