//! Configuration system for spool.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SPOOL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/spool/config.toml
//!   3. ~/.config/spool/config.toml
//!
//! Everything here is read once at startup. A running output never sees
//! configuration changes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    pub output: OutputConfig,
    pub journal: JournalConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Destination `host:port`.
    pub address: String,
    /// Fixed sleep between failed dial attempts.
    pub retry_interval_ms: u64,
    /// Upper bound on a single dial.
    pub connection_timeout_ms: u64,
    /// Per-write deadline. 0 = no deadline.
    pub write_timeout_ms: u64,
    /// How often the spooler flushes pending chunks.
    pub flush_interval_ms: u64,
    /// Bytes read from a chunk per send call.
    pub transfer_buffer_size: usize,
    /// Consecutive transient write failures before the connection is
    /// dropped and redialed. 0 = never force a redial.
    pub max_transient_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory holding chunk files.
    pub path: PathBuf,
    /// Journal name, used as the chunk file prefix.
    pub name: String,
    pub file_suffix: String,
    /// Unix permission bits for chunk files.
    pub file_mode: u32,
    /// A chunk is sealed once the next append would push it past this size.
    pub max_chunk_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Tag attached to every record read from stdin.
    pub tag: String,
    /// Max records per emitted batch.
    pub batch_size: usize,
    /// Emit a partial batch after this long without new input.
    pub linger_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:24224".to_string(),
            retry_interval_ms: 1_000,
            connection_timeout_ms: 10_000,
            write_timeout_ms: 0,
            flush_interval_ms: 5_000,
            transfer_buffer_size: 16 * 1024 * 1024,
            max_transient_failures: 8,
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("journal"),
            name: "output".to_string(),
            file_suffix: ".log".to_string(),
            file_mode: 0o600,
            max_chunk_size: 16 * 1024 * 1024,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            tag: "spool.stdin".to_string(),
            batch_size: 256,
            linger_ms: 1_000,
        }
    }
}

// ── Duration accessors ────────────────────────────────────────────────────────

impl OutputConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// `None` when writes have no deadline.
    pub fn write_timeout(&self) -> Option<Duration> {
        match self.write_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl SourceConfig {
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("spool")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("spool")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SpoolConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            SpoolConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a specific file, without env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SPOOL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SpoolConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply SPOOL_* overrides. `lookup` is the environment in production.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SPOOL_OUTPUT__ADDRESS") {
            self.output.address = v;
        }
        if let Some(ms) = lookup("SPOOL_OUTPUT__FLUSH_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.output.flush_interval_ms = ms;
        }
        if let Some(ms) = lookup("SPOOL_OUTPUT__RETRY_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.output.retry_interval_ms = ms;
        }
        if let Some(v) = lookup("SPOOL_JOURNAL__PATH") {
            self.journal.path = PathBuf::from(v);
        }
        if let Some(size) = lookup("SPOOL_JOURNAL__MAX_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.journal.max_chunk_size = size;
        }
        if let Some(v) = lookup("SPOOL_SOURCE__TAG") {
            self.source.tag = v;
        }
    }
}
