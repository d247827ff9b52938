//! Extractor interface: a lazy sequence of raw source records.

use async_trait::async_trait;
use std::collections::VecDeque;

use crate::error::Result;

/// One raw item from an external source, pre-normalization. Records arrive
/// as JSON objects from the search API; no schema is assumed at this layer.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A lazy, finite-or-infinite sequence of raw records.
///
/// Records are pulled one at a time on demand; the caller never buffers
/// the whole stream. An exhausted extractor cannot be rewound — restart
/// by constructing a new instance.
#[async_trait]
pub trait Extractor: Send {
    /// Pull the next record, or `None` when the source is exhausted.
    async fn next_record(&mut self) -> Result<Option<Record>>;
}

/// In-memory extractor over a fixed record list. Used by tests and
/// one-off backfills.
pub struct VecExtractor {
    records: VecDeque<Record>,
}

impl VecExtractor {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into(),
        }
    }
}

#[async_trait]
impl Extractor for VecExtractor {
    async fn next_record(&mut self) -> Result<Option<Record>> {
        Ok(self.records.pop_front())
    }
}
