//! Persistence sinks
//!
//! A sink is the durable home of flushed log entries. The aggregator treats
//! it as an opaque batch-insert target plus an ordered range reader; each
//! `batch_insert` call is expected to be all-or-nothing.

pub mod clickhouse;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{LogEntry, SourceId};

pub use clickhouse::ClickHouseLogSink;
pub use memory::MemoryLogSink;

/// Errors raised by persistence sinks
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Durable storage for log entries
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persist one flush batch atomically
    async fn batch_insert(&self, entries: &[LogEntry]) -> Result<(), SinkError>;

    /// Entries of `source_id` with `line_number >= from_line`, ascending by
    /// line number, at most `limit` rows (0 = unbounded)
    async fn query(
        &self,
        source_id: &SourceId,
        from_line: u32,
        limit: usize,
    ) -> Result<Vec<LogEntry>, SinkError>;

    /// Short backend name for logs and stats
    fn name(&self) -> &'static str;
}
