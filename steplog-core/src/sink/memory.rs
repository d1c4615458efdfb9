use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{LogSink, SinkError};
use crate::models::{LogEntry, SourceId};

/// In-process sink keeping every batch in memory
///
/// Used for development setups and tests. Rows are kept in insertion order
/// per source and sorted on read, so out-of-order batches still come back
/// ascending by line number.
#[derive(Default)]
pub struct MemoryLogSink {
    rows: RwLock<HashMap<SourceId, Vec<LogEntry>>>,
    batches: AtomicU64,
}

impl MemoryLogSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored for a source
    #[must_use]
    pub fn len(&self, source_id: &SourceId) -> usize {
        self.rows.read().get(source_id).map_or(0, Vec::len)
    }

    /// Number of successful `batch_insert` calls
    #[must_use]
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::Acquire)
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn batch_insert(&self, entries: &[LogEntry]) -> Result<(), SinkError> {
        if entries.is_empty() {
            return Ok(());
        }

        {
            let mut rows = self.rows.write();
            for entry in entries {
                rows.entry(entry.source_id.clone())
                    .or_default()
                    .push(entry.clone());
            }
        }
        self.batches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn query(
        &self,
        source_id: &SourceId,
        from_line: u32,
        limit: usize,
    ) -> Result<Vec<LogEntry>, SinkError> {
        let mut result: Vec<LogEntry> = self
            .rows
            .read()
            .get(source_id)
            .map(|rows| {
                rows.iter()
                    .filter(|entry| entry.line_number >= from_line)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        result.sort_by_key(|entry| entry.line_number);
        if limit > 0 {
            result.truncate(limit);
        }
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
