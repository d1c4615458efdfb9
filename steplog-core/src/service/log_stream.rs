use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::models::{LogEntry, SourceId};

/// Per-source buffer with flush bookkeeping
///
/// A `LogStream` is only ever touched behind its own lock inside the
/// aggregator, so every method here sees a consistent buffer. `swap` hands
/// out a strict prefix of what was appended before it.
#[derive(Debug)]
pub struct LogStream {
    source_id: SourceId,
    buffer: Vec<LogEntry>,
    buffer_size: usize,
    last_flush: Instant,
    line_count: u64,
    closed: bool,
}

impl LogStream {
    #[must_use]
    pub fn new(source_id: SourceId, buffer_size: usize) -> Self {
        Self {
            source_id,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            last_flush: Instant::now(),
            line_count: 0,
            closed: false,
        }
    }

    /// Append an entry; returns `true` once the buffer reached its flush threshold
    pub fn append(&mut self, entry: LogEntry) -> Result<bool> {
        if self.closed {
            return Err(Error::StreamClosed(self.source_id.clone()));
        }

        self.buffer.push(entry);
        self.line_count += 1;
        Ok(self.buffer.len() >= self.buffer_size)
    }

    /// Take the buffered entries, leaving an empty buffer behind
    pub fn swap(&mut self) -> Vec<LogEntry> {
        self.last_flush = Instant::now();
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.buffer_size))
    }

    /// Mark closed; the caller swaps once more to collect the residue
    pub fn close(&mut self) {
        self.closed = true;
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub const fn line_count(&self) -> u64 {
        self.line_count
    }

    #[must_use]
    pub fn since_last_flush(&self) -> Duration {
        self.last_flush.elapsed()
    }

    /// Whether a timer tick should flush this stream
    #[must_use]
    pub fn flush_due(&self, interval: Duration) -> bool {
        !self.closed && !self.buffer.is_empty() && self.since_last_flush() >= interval
    }
}
