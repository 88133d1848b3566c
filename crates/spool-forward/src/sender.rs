//! Network sender — pushes chunk bytes to the destination.
//!
//! Owns at most one connection, dialed lazily and kept across sends. A send
//! loops until every byte is written, the lifecycle enters `Stopping`, or a
//! non-transient write error occurs. Dial failures are retried forever at a
//! fixed interval.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use spool_core::config::OutputConfig;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::lifecycle::Lifecycle;
use crate::stats::Stats;

// ── Transport ─────────────────────────────────────────────────────────────────

/// Opens byte streams to a destination address.
pub trait Connect: Send + Sync + 'static {
    type Stream: AsyncWrite + Unpin + Send + 'static;

    fn connect(&self, address: &str) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP with Nagle disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, address: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every byte was written.
    Delivered,
    /// Shutdown began before the bytes were fully written.
    Abandoned,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("write to {address} failed: {source}")]
    Write {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Timeouts and interrupted or would-block writes are retried on the same
/// connection. Everything else ends the send.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

// ── Sender ────────────────────────────────────────────────────────────────────

pub struct Sender<C: Connect> {
    connector: C,
    address: String,
    retry_interval: Duration,
    connection_timeout: Duration,
    write_timeout: Option<Duration>,
    max_transient_failures: u32,
    conn: Option<C::Stream>,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<Stats>,
}

impl<C: Connect> Sender<C> {
    pub fn new(
        connector: C,
        config: &OutputConfig,
        lifecycle: Arc<Lifecycle>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            connector,
            address: config.address.clone(),
            retry_interval: config.retry_interval(),
            connection_timeout: config.connection_timeout(),
            write_timeout: config.write_timeout(),
            max_transient_failures: config.max_transient_failures,
            conn: None,
            lifecycle,
            stats,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Write all of `buf`, dialing as needed.
    ///
    /// Returns `Abandoned` as soon as shutdown is observed, whatever was
    /// written so far. A non-transient write error drops the connection.
    pub async fn send(&mut self, mut buf: &[u8]) -> Result<Delivery, SendError> {
        let started = Instant::now();
        let mut transient_failures = 0u32;

        while !buf.is_empty() {
            if self.lifecycle.is_stopping() {
                debug!(remaining = buf.len(), "shutdown in progress, abandoning send");
                return Ok(Delivery::Abandoned);
            }

            let Some(stream) = self.conn.as_mut() else {
                if !self.dial().await {
                    pause(self.retry_interval, &self.lifecycle).await;
                }
                continue;
            };

            let written = tokio::select! {
                biased;
                _ = self.lifecycle.stopping() => continue,
                result = write_with_deadline(stream, buf, self.write_timeout) => result,
            };

            match written {
                Ok(0) => {
                    self.conn = None;
                    return Err(self.write_error(io::ErrorKind::WriteZero.into()));
                }
                Ok(n) => {
                    buf = &buf[n..];
                    transient_failures = 0;
                    self.stats.record_forwarded(n as u64);
                    info!(
                        bytes = n,
                        elapsed_secs = started.elapsed().as_secs_f64(),
                        remaining = buf.len(),
                        "forwarded"
                    );
                }
                Err(e) if is_transient(&e) => {
                    transient_failures += 1;
                    if self.max_transient_failures > 0
                        && transient_failures >= self.max_transient_failures
                    {
                        warn!(
                            address = %self.address,
                            failures = transient_failures,
                            error = %e,
                            "too many transient write failures, reconnecting"
                        );
                        self.conn = None;
                        transient_failures = 0;
                    } else {
                        info!(address = %self.address, error = %e, "transient write failure, retrying");
                    }
                }
                Err(e) => {
                    error!(address = %self.address, error = %e, "write failed");
                    self.conn = None;
                    return Err(self.write_error(e));
                }
            }
        }

        Ok(Delivery::Delivered)
    }

    /// Shut down the open connection, if any.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.conn.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(address = %self.address, error = %e, "connection shutdown failed");
            }
        }
    }

    /// One dial attempt. False on failure or when shutdown interrupts it.
    async fn dial(&mut self) -> bool {
        self.stats.record_connect_attempt();
        info!(address = %self.address, "connecting");

        let attempt = self.connector.connect(&self.address);
        let limit = self.connection_timeout;
        let result = tokio::select! {
            _ = self.lifecycle.stopping() => return false,
            result = async move {
                if limit.is_zero() {
                    return attempt.await;
                }
                match tokio::time::timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connection timed out")),
                }
            } => result,
        };

        match result {
            Ok(stream) => {
                info!(address = %self.address, "connected");
                self.conn = Some(stream);
                true
            }
            Err(e) => {
                error!(
                    address = %self.address,
                    error = %e,
                    retry_in_ms = self.retry_interval.as_millis() as u64,
                    "connection failed"
                );
                false
            }
        }
    }

    fn write_error(&self, source: io::Error) -> SendError {
        SendError::Write {
            address: self.address.clone(),
            source,
        }
    }
}

/// Sleep for the retry interval, or until shutdown begins.
///
/// Takes the fields it needs so the send future never holds `&Sender`,
/// which would require the stream type to be `Sync`.
async fn pause(interval: Duration, lifecycle: &Lifecycle) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = lifecycle.stopping() => {}
    }
}

async fn write_with_deadline<S>(
    stream: &mut S,
    buf: &[u8],
    deadline: Option<Duration>,
) -> io::Result<usize>
where
    S: AsyncWrite + Unpin,
{
    let Some(limit) = deadline else {
        return stream.write(buf).await;
    };
    match tokio::time::timeout(limit, stream.write(buf)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write deadline exceeded")),
    }
}
