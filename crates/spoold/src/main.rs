//! spoold — durable log forwarder.
//!
//! Reads newline-delimited JSON from stdin, journals each batch on local
//! disk, and forwards the journal to a MessagePack collector over TCP.
//!
//! Usage: `spoold [host:port]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use spool_core::config::SpoolConfig;
use spool_forward::ForwardOutput;

mod source;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = SpoolConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = SpoolConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SpoolConfig::default()
    });
    if let Some(address) = std::env::args().nth(1) {
        config.output.address = address;
    }
    tracing::info!(
        address = %config.output.address,
        journal = %config.journal.path.display(),
        "spoold starting"
    );

    let output = Arc::new(ForwardOutput::open(&config).context("failed to open journal")?);
    output.start();

    let source_task = tokio::spawn(source::run(
        tokio::io::stdin(),
        config.source.clone(),
        output.clone(),
    ));

    let stats_printer = {
        let output = output.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let s = output.stats();
                tracing::info!(
                    accepted = s.batches_accepted,
                    dropped = s.batches_dropped,
                    journaled_bytes = s.bytes_journaled,
                    forwarded_bytes = s.bytes_forwarded,
                    chunks = s.chunks_disposed,
                    flush_errors = s.flush_errors,
                    connects = s.connect_attempts,
                    "stats"
                );
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        r = tokio::signal::ctrl_c() => match r {
            Ok(()) => tracing::info!("interrupted, shutting down"),
            Err(e) => tracing::error!(error = %e, "signal handler failed, shutting down"),
        },
        r = source_task => match r {
            Ok(Ok(records)) => tracing::info!(records, "stdin closed, shutting down"),
            Ok(Err(e)) => tracing::error!(error = %e, "stdin source failed, shutting down"),
            Err(e) => tracing::error!(error = %e, "stdin source panicked, shutting down"),
        },
    }

    output.stop();
    output.wait_for_shutdown().await;
    stats_printer.abort();

    let s = output.stats();
    tracing::info!(
        accepted = s.batches_accepted,
        forwarded_bytes = s.bytes_forwarded,
        "spoold stopped"
    );
    Ok(())
}
