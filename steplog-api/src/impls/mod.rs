//! Transport-agnostic log API
//!
//! Agents push batches through [`LogApiImpl::ingest`], viewers read through
//! [`LogApiImpl::tail`]. The HTTP and WebSocket handlers are thin adapters
//! that feed these with their own IO.

pub mod ingest;
pub mod tail;

pub use ingest::{BatchSource, BufferedBatches, IngestAck, IngestBatch, IngestError, LogChunk};
pub use tail::{TailFrame, TailRequest, TailSession, TailState};

use steplog_core::LogAggregator;

/// Entry point shared by every transport
#[derive(Clone)]
pub struct LogApiImpl {
    aggregator: LogAggregator,
    history_limit: usize,
}

impl LogApiImpl {
    #[must_use]
    pub fn new(aggregator: LogAggregator) -> Self {
        let history_limit = aggregator.config().history_limit;
        Self {
            aggregator,
            history_limit,
        }
    }

    #[must_use]
    pub const fn aggregator(&self) -> &LogAggregator {
        &self.aggregator
    }

    /// Maximum number of historical entries replayed by a tail
    #[must_use]
    pub const fn history_limit(&self) -> usize {
        self.history_limit
    }
}
