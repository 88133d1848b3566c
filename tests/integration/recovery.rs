use std::time::Duration;

use anyhow::Result;
use spool_forward::ForwardOutput;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Restart Recovery
// ══════════════════════════════════════════════════════════════════════════════

/// Data journaled while the destination was down is picked up by the next
/// run over the same directory and delivered once it is reachable.
#[tokio::test]
async fn test_journal_survives_restart() -> Result<()> {
    let dir = temp_dir("restart");

    // First run: nothing listening
    let down = refused_address().await?;
    let output = ForwardOutput::open(&spool_config(&dir, &down))?;
    output.start();
    output
        .emit([batch("app.log", &[1, 2]), batch("app.log", &[3])])
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    output.stop();
    output.wait_for_shutdown().await;
    assert_eq!(output.stats().bytes_forwarded, 0);
    assert!(!chunk_files(&dir).is_empty(), "undelivered data must stay on disk");

    // Second run: collector is up
    let collector = Collector::start().await?;
    let output = ForwardOutput::open(&spool_config(&dir, collector.address()))?;
    output.start();

    let received = collector.wait_for_batches(2, Duration::from_secs(5)).await?;
    let stamps: Vec<u64> = received
        .iter()
        .flat_map(|b| b.records.iter().map(|r| r.timestamp))
        .collect();
    assert_eq!(stamps, vec![1, 2, 3]);

    output.stop();
    output.wait_for_shutdown().await;
    assert!(chunk_files(&dir).is_empty());

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
