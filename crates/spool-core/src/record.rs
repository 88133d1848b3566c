//! Record model — what upstream collectors hand to the forwarder.
//!
//! A batch is a tag plus an ordered list of records. Record order inside a
//! batch is part of the contract and is preserved all the way to the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field value inside a record. Binary payloads stay binary on the wire.
pub type Value = rmpv::Value;

/// A single timestamped event.
///
/// Serialized positionally as `[timestamp, data]`, never as a keyed map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unix time in seconds.
    pub timestamp: u64,
    pub data: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            data: BTreeMap::new(),
        }
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A tagged, ordered group of records submitted together.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch<R = Record> {
    pub tag: String,
    pub records: Vec<R>,
}

impl<R> RecordBatch<R> {
    pub fn new(tag: impl Into<String>, records: Vec<R>) -> Self {
        Self {
            tag: tag.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
