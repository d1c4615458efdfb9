//! Agent → server ingestion

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use steplog_core::{LogEntry, LogOrigin, SourceId};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::LogApiImpl;

/// One log line as sent by an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    /// Unix millis; 0 means "stamp on arrival"
    #[serde(default)]
    pub timestamp: i64,
    pub line_number: u32,
    #[serde(default)]
    pub level: String,
    pub content: String,
    #[serde(rename = "stream", default)]
    pub origin: LogOrigin,
}

/// A group of lines for a single source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestBatch {
    #[serde(alias = "step_run_id")]
    pub source_id: SourceId,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub plugin_name: String,
    #[serde(default, alias = "logs")]
    pub chunks: Vec<LogChunk>,
}

impl IngestBatch {
    /// Expand into log entries, stamping missing timestamps with `now`
    pub fn into_entries(self) -> impl Iterator<Item = LogEntry> {
        let now = Utc::now().timestamp_millis();
        let Self {
            source_id,
            agent_id,
            plugin_name,
            chunks,
        } = self;

        chunks.into_iter().map(move |chunk| LogEntry {
            source_id: source_id.clone(),
            timestamp: if chunk.timestamp == 0 { now } else { chunk.timestamp },
            line_number: chunk.line_number,
            level: chunk.level,
            content: chunk.content,
            origin: chunk.origin,
            plugin_name: plugin_name.clone(),
            agent_id: agent_id.clone(),
        })
    }
}

/// Final answer to an ingestion session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {
    pub success: bool,
    pub message: String,
    pub received_lines: u64,
    #[serde(default)]
    pub rejected_lines: u64,
}

impl IngestAck {
    #[must_use]
    pub fn new(received_lines: u64, rejected_lines: u64) -> Self {
        Self {
            success: true,
            message: "logs uploaded successfully".to_string(),
            received_lines,
            rejected_lines,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// The transport failed before end of input; nothing is acknowledged
    #[error("Ingestion aborted: {0}")]
    Transport(String),
}

/// Pull-based stream of batches from one agent connection
///
/// `None` marks a clean end of input.
#[async_trait]
pub trait BatchSource: Send {
    async fn next_batch(&mut self) -> Option<Result<IngestBatch, String>>;
}

/// Batches that are already in memory (bulk HTTP upload)
#[derive(Debug, Default)]
pub struct BufferedBatches {
    batches: VecDeque<IngestBatch>,
}

impl From<Vec<IngestBatch>> for BufferedBatches {
    fn from(batches: Vec<IngestBatch>) -> Self {
        Self {
            batches: batches.into(),
        }
    }
}

#[async_trait]
impl BatchSource for BufferedBatches {
    async fn next_batch(&mut self) -> Option<Result<IngestBatch, String>> {
        self.batches.pop_front().map(Ok)
    }
}

impl LogApiImpl {
    /// Push every line of every batch until the source ends
    ///
    /// Rejected lines (closed stream, empty source id) are counted but never
    /// abort the session.
    pub async fn ingest<S>(&self, source: &mut S) -> Result<IngestAck, IngestError>
    where
        S: BatchSource + ?Sized,
    {
        let mut received: u64 = 0;
        let mut rejected: u64 = 0;
        let mut batches: u64 = 0;

        while let Some(next) = source.next_batch().await {
            let batch = next.map_err(|e| {
                warn!(error = %e, received_lines = received, "Ingestion stream failed");
                IngestError::Transport(e)
            })?;
            batches += 1;

            let source_id = batch.source_id.clone();
            let lines = batch.chunks.len() as u64;
            received += lines;

            if source_id.is_empty() {
                rejected += lines;
                warn!(lines, "Dropping log batch without source id");
                continue;
            }

            let mut batch_rejected: u64 = 0;
            let mut last_error = None;
            for result in self.aggregator().push_batch(batch.into_entries().collect()) {
                if let Err(e) = result {
                    batch_rejected += 1;
                    last_error = Some(e);
                }
            }

            if let Some(e) = last_error {
                rejected += batch_rejected;
                warn!(
                    source_id = %source_id,
                    rejected = batch_rejected,
                    error = %e,
                    "Some log lines were rejected"
                );
            } else {
                debug!(source_id = %source_id, lines, "Log batch accepted");
            }
        }

        info!(
            batches,
            received_lines = received,
            rejected_lines = rejected,
            "Log ingestion finished"
        );
        Ok(IngestAck::new(received, rejected))
    }
}
