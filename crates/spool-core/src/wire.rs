//! Spool wire format — what actually crosses the TCP connection.
//!
//! Every batch becomes one self-describing MessagePack unit:
//!
//! ```text
//! [ tag: str, [ record, record, ... ] ]
//! ```
//!
//! Records are encoded positionally (structs as arrays), so a `Record`
//! goes out as `[timestamp, {field: value}]`. Binary values are written as
//! MessagePack `bin` and are never coerced to `str`.
//!
//! There is no framing or length prefix. Units are simply concatenated,
//! and a reader resumes parsing from the byte stream alone.

use std::io::Cursor;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::record::RecordBatch;

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encode one batch into a standalone wire unit.
///
/// Encoding happens into a fresh buffer, so a failure never leaves partial
/// output behind. Identical input always produces identical bytes.
pub fn encode<R: Serialize>(tag: &str, records: &[R]) -> Result<Bytes, EncodeError> {
    let buf = rmp_serde::to_vec(&(tag, records))?;
    Ok(Bytes::from(buf))
}

/// Encode a whole batch. Shorthand for [`encode`].
pub fn encode_batch<R: Serialize>(batch: &RecordBatch<R>) -> Result<Bytes, EncodeError> {
    encode(&batch.tag, &batch.records)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decode a concatenated stream of wire units.
///
/// Used on the receiving side and in diagnostics. A trailing unit that is
/// cut short is reported as an error together with its starting offset.
pub fn decode_stream<R: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<RecordBatch<R>>, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let mut units = Vec::new();

    while (cursor.position() as usize) < bytes.len() {
        let offset = cursor.position();
        let (tag, records): (String, Vec<R>) = rmp_serde::from_read(&mut cursor)
            .map_err(|source| DecodeError::Malformed { offset, source })?;
        units.push(RecordBatch { tag, records });
    }

    Ok(units)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to encode batch: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed unit at offset {offset}: {source}")]
    Malformed {
        offset: u64,
        #[source]
        source: rmp_serde::decode::Error,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
