//! Stdin source — newline-delimited JSON objects become records.
//!
//! Lines are grouped into batches of at most `batch_size` records. A batch
//! is also cut once `linger` has passed since its first record arrived, so
//! a quiet input still gets journaled promptly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use spool_core::config::SourceConfig;
use spool_core::{Record, RecordBatch};
use spool_forward::{Connect, EmitOutcome, ForwardOutput};

/// Feed `input` into `output` until EOF or until the output closes.
/// Returns the number of records accepted.
pub async fn run<I, C>(
    input: I,
    config: SourceConfig,
    output: Arc<ForwardOutput<Record, C>>,
) -> Result<u64>
where
    I: AsyncRead + Unpin,
    C: Connect,
{
    let mut lines = BufReader::new(input).lines();
    let mut accepted = 0u64;

    while let Some(batch) = next_batch(&mut lines, &config).await? {
        let records = batch.len() as u64;
        match output.emit([batch]).await {
            EmitOutcome::Accepted(_) => accepted += records,
            EmitOutcome::Closed { .. } => {
                tracing::debug!("output closed, source exiting");
                break;
            }
        }
    }

    Ok(accepted)
}

/// Collect the next batch. `None` at end of input.
pub async fn next_batch<R>(lines: &mut Lines<R>, config: &SourceConfig) -> Result<Option<RecordBatch>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let limit = config.batch_size.max(1);
    let mut records = Vec::new();

    // Block for the first record, then linger for the rest
    let first = loop {
        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            return Ok(None);
        };
        if let Some(record) = accept_line(&line) {
            break record;
        }
    };
    records.push(first);

    let deadline = tokio::time::Instant::now() + config.linger();
    while records.len() < limit {
        let line = match tokio::time::timeout_at(deadline, lines.next_line()).await {
            Ok(line) => line.context("failed to read stdin")?,
            Err(_) => break,
        };
        let Some(line) = line else {
            break;
        };
        if let Some(record) = accept_line(&line) {
            records.push(record);
        }
    }

    Ok(Some(RecordBatch::new(config.tag.clone(), records)))
}

fn accept_line(line: &str) -> Option<Record> {
    if line.trim().is_empty() {
        return None;
    }
    match parse_line(line, unix_now()) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(error = %e, "skipping input line");
            None
        }
    }
}

/// Parse one JSON object into a record stamped with `now`.
pub fn parse_line(line: &str, now: u64) -> Result<Record> {
    let json: serde_json::Value = serde_json::from_str(line).context("invalid JSON")?;
    let serde_json::Value::Object(fields) = json else {
        bail!("expected a JSON object");
    };

    let mut data = BTreeMap::new();
    for (key, value) in fields {
        let value = rmpv::ext::to_value(value)
            .with_context(|| format!("field {key} has no MessagePack form"))?;
        data.insert(key, value);
    }
    Ok(Record {
        timestamp: now,
        data,
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
