use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use spool_core::wire;
use spool_core::{Record, RecordBatch};
use spool_forward::{EmitOutcome, ForwardOutput, State};
use spool_journal::Journal;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Shutdown
// ══════════════════════════════════════════════════════════════════════════════

/// Destination never accepts. Shutdown must not wait out the retry interval.
#[tokio::test]
async fn test_shutdown_with_unreachable_destination() -> Result<()> {
    let dir = temp_dir("unreachable");
    let mut config = spool_config(&dir, &refused_address().await?);
    config.output.retry_interval_ms = 2_000;

    let output = ForwardOutput::open(&config)?;
    output.start();
    output.emit([batch("app.log", &[1])]).await;
    // Let the spooler hit the failed dial and start its pause
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopped_at = Instant::now();
    output.stop();
    tokio::time::timeout(Duration::from_secs(2), output.wait_for_shutdown()).await?;
    assert!(stopped_at.elapsed() < Duration::from_secs(2));
    assert_eq!(output.state(), State::Stopped);
    assert!(output.stats().connect_attempts >= 1);

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

/// Five batches then an immediate stop: all five are on disk afterwards.
#[tokio::test]
async fn test_accepted_batches_are_journaled_before_stopped() -> Result<()> {
    let dir = temp_dir("drain");
    let mut config = spool_config(&dir, &refused_address().await?);
    config.output.flush_interval_ms = 60_000;

    let output = ForwardOutput::open(&config)?;
    output.start();
    let batches: Vec<_> = (0..5u64).map(|i| batch("app.log", &[i])).collect();
    assert_eq!(output.emit(batches).await, EmitOutcome::Accepted(5));
    output.stop();
    output.wait_for_shutdown().await;

    let journal = open_journal(&dir)?;
    let mut bytes = Vec::new();
    for chunk in journal.chunks()? {
        chunk.reader()?.read_to_end(&mut bytes)?;
    }
    let units: Vec<RecordBatch<Record>> = wire::decode_stream(&bytes)?;
    let stamps: Vec<u64> = units.iter().map(|u| u.records[0].timestamp).collect();
    assert_eq!(stamps, vec![0, 1, 2, 3, 4]);

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

/// Concurrent stops from many tasks behave like one.
#[tokio::test]
async fn test_concurrent_stops() -> Result<()> {
    let collector = Collector::start().await?;
    let dir = temp_dir("stops");
    let output = Arc::new(ForwardOutput::open(&spool_config(&dir, collector.address()))?);
    output.start();

    let stoppers: Vec<_> = (0..8)
        .map(|_| {
            let output = output.clone();
            tokio::spawn(async move { output.stop() })
        })
        .collect();
    for stopper in stoppers {
        stopper.await?;
    }
    output.wait_for_shutdown().await;
    assert_eq!(output.state(), State::Stopped);

    let late = output.emit([batch("late", &[9])]).await;
    assert_eq!(late, EmitOutcome::Closed { accepted: 0, dropped: 1 });

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

/// Many emitters race a stop. Every batch reported as accepted is on disk
/// afterwards, and nothing else is.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_emitters_racing_stop() -> Result<()> {
    const EMITTERS: u64 = 8;
    const PER_EMITTER: u64 = 200;

    let dir = temp_dir("race");
    let mut config = spool_config(&dir, &refused_address().await?);
    config.output.flush_interval_ms = 60_000;

    let output = Arc::new(ForwardOutput::open(&config)?);
    output.start();

    let emitters: Vec<_> = (0..EMITTERS)
        .map(|e| {
            let output = output.clone();
            tokio::spawn(async move {
                let mut accepted = 0;
                for i in 0..PER_EMITTER {
                    match output.emit([batch("race", &[e * PER_EMITTER + i])]).await {
                        EmitOutcome::Accepted(n) => accepted += n,
                        EmitOutcome::Closed { accepted: n, .. } => return accepted + n,
                    }
                }
                accepted
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(5)).await;
    output.stop();
    let mut accepted = 0;
    for emitter in emitters {
        accepted += emitter.await?;
    }
    output.wait_for_shutdown().await;

    let journal = open_journal(&dir)?;
    let mut bytes = Vec::new();
    for chunk in journal.chunks()? {
        chunk.reader()?.read_to_end(&mut bytes)?;
    }
    let units: Vec<RecordBatch<Record>> = wire::decode_stream(&bytes)?;
    assert_eq!(units.len(), accepted);
    assert_eq!(output.stats().batches_accepted, accepted as u64);

    let mut stamps: Vec<u64> = units.iter().map(|u| u.records[0].timestamp).collect();
    stamps.sort_unstable();
    stamps.dedup();
    assert_eq!(stamps.len(), accepted, "no unit journaled twice");

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
