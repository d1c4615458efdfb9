use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::sync::Cache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::log_stream::LogStream;
use super::subscriber_hub::SubscriberHub;
use crate::config::AggregatorConfig;
use crate::error::{Error, Result};
use crate::models::{LogEntry, SourceId};
use crate::sink::{LogSink, SinkError};

/// Work handed to the single writer task of a stream
enum FlushCommand {
    Write(Vec<LogEntry>),
    Close {
        residual: Vec<LogEntry>,
        done: oneshot::Sender<std::result::Result<(), SinkError>>,
    },
}

/// A registered stream plus the queue of its writer task
struct StreamSlot {
    stream: Mutex<LogStream>,
    writer: mpsc::UnboundedSender<FlushCommand>,
}

impl StreamSlot {
    /// Queue a swapped batch; must be called with the stream lock held
    fn enqueue(&self, source_id: &SourceId, batch: Vec<LogEntry>, metrics: &Metrics) {
        if batch.is_empty() {
            return;
        }
        let size = batch.len();
        if self.writer.send(FlushCommand::Write(batch)).is_err() {
            metrics.entries_lost.fetch_add(size as u64, Ordering::Relaxed);
            error!(source_id = %source_id, entries = size, "Log writer is gone, batch dropped");
        }
    }
}

#[derive(Default)]
struct Metrics {
    entries_pushed: AtomicU64,
    entries_rejected: AtomicU64,
    flushes: AtomicU64,
    entries_persisted: AtomicU64,
    write_failures: AtomicU64,
    entries_lost: AtomicU64,
    live_drops: AtomicU64,
}

/// Snapshot of one active stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub source_id: SourceId,
    pub buffered: usize,
    pub line_count: u64,
    pub subscribers: usize,
    pub since_last_flush_ms: u64,
}

/// Diagnostic snapshot of the aggregator
#[derive(Debug, Clone, Serialize)]
pub struct AggregatorStats {
    pub sink: &'static str,
    pub active_streams: usize,
    pub streams: Vec<StreamStats>,
    pub subscribed_sources: usize,
    pub total_subscribers: usize,
    pub entries_pushed: u64,
    pub entries_rejected: u64,
    pub flushes: u64,
    pub entries_persisted: u64,
    pub write_failures: u64,
    pub entries_lost: u64,
    pub live_drops: u64,
}

struct Inner {
    streams: DashMap<SourceId, Arc<StreamSlot>>,
    /// Recently closed sources; pushes to them are rejected
    closed: Cache<SourceId, ()>,
    hub: SubscriberHub,
    sink: Arc<dyn LogSink>,
    config: AggregatorConfig,
    metrics: Arc<Metrics>,
}

/// Central log pipeline: per-source buffering, flushing and live fan-out
///
/// Each source gets a [`LogStream`] behind its own lock and one writer task.
/// The writer owns the periodic flush timer and performs every sink write
/// for that source, so batches are persisted in the order they were swapped
/// out. `push` never waits on the sink.
#[derive(Clone)]
pub struct LogAggregator {
    inner: Arc<Inner>,
}

impl LogAggregator {
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>, config: AggregatorConfig) -> Self {
        let closed = Cache::builder()
            .max_capacity(config.max_closed_sources)
            .time_to_live(config.closed_retention())
            .build();

        info!(
            sink = sink.name(),
            buffer_size = config.buffer_size,
            flush_interval_ms = config.flush_interval_ms,
            "Log aggregator created"
        );

        Self {
            inner: Arc::new(Inner {
                streams: DashMap::new(),
                closed,
                hub: SubscriberHub::new(config.subscriber_capacity),
                sink,
                config,
                metrics: Arc::new(Metrics::default()),
            }),
        }
    }

    /// Buffer one entry and hand it to live subscribers
    ///
    /// Creates the stream (and its writer task) on first use. Must be called
    /// from within a Tokio runtime.
    pub fn push(&self, entry: LogEntry) -> Result<()> {
        let source_id = entry.source_id.clone();
        let slot = match self.slot_for(&source_id) {
            Ok(slot) => slot,
            Err(e) => {
                self.inner.metrics.entries_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let mut stream = slot.stream.lock();
        let flush = match stream.append(entry.clone()) {
            Ok(flush) => flush,
            Err(e) => {
                self.inner.metrics.entries_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        self.inner.metrics.entries_pushed.fetch_add(1, Ordering::Relaxed);

        if flush {
            let batch = stream.swap();
            debug!(source_id = %source_id, entries = batch.len(), "Buffer full, flushing");
            slot.enqueue(&source_id, batch, &self.inner.metrics);
        }

        // Still under the stream lock so subscribers see push order
        let result = self.inner.hub.broadcast(&source_id, &entry);
        if result.dropped > 0 {
            self.inner
                .metrics
                .live_drops
                .fetch_add(result.dropped as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Push every entry independently; one result per entry, in order
    pub fn push_batch(&self, entries: Vec<LogEntry>) -> Vec<Result<()>> {
        entries.into_iter().map(|entry| self.push(entry)).collect()
    }

    /// Open a live queue for `source_id`, closed again when `cancel` fires
    ///
    /// Subscribing to a closed source returns a queue that is already closed.
    pub fn subscribe(
        &self,
        cancel: CancellationToken,
        source_id: SourceId,
    ) -> mpsc::Receiver<LogEntry> {
        if self.is_closed(&source_id) {
            debug!(source_id = %source_id, "Subscribe to closed source");
            let (_, rx) = mpsc::channel(1);
            return rx;
        }

        let (subscriber_id, rx) = self.inner.hub.subscribe(source_id.clone(), cancel);

        // Lost a race with close_stream: release the queue
        if self.is_closed(&source_id) {
            self.inner.hub.unsubscribe(&source_id, &subscriber_id);
        }
        rx
    }

    /// Flush the residue of a stream, close it and release its subscribers
    pub async fn close_stream(&self, source_id: &SourceId) -> Result<()> {
        let slot = match self.inner.streams.entry(source_id.clone()) {
            Entry::Occupied(occupied) => {
                self.inner.closed.insert(source_id.clone(), ());
                occupied.remove()
            }
            Entry::Vacant(_) => return Err(Error::StreamNotFound(source_id.clone())),
        };

        let (done_tx, done_rx) = oneshot::channel();
        let (line_count, residual_len) = {
            let mut stream = slot.stream.lock();
            stream.close();
            let residual = stream.swap();
            let residual_len = residual.len();
            if slot
                .writer
                .send(FlushCommand::Close {
                    residual,
                    done: done_tx,
                })
                .is_err()
            {
                self.inner
                    .metrics
                    .entries_lost
                    .fetch_add(residual_len as u64, Ordering::Relaxed);
            }
            (stream.line_count(), residual_len)
        };

        match done_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(source_id = %source_id, error = %e, "Final flush failed, residual entries lost");
            }
            Err(_) => {
                error!(source_id = %source_id, "Log writer exited before final flush");
            }
        }

        let subscribers = self.inner.hub.close_source(source_id);
        info!(
            source_id = %source_id,
            line_count,
            residual = residual_len,
            subscribers,
            "Log stream closed"
        );
        Ok(())
    }

    /// Persisted entries with `line_number >= from_line`, ascending (limit 0 = all)
    pub async fn get_logs(
        &self,
        source_id: &SourceId,
        from_line: u32,
        limit: usize,
    ) -> Result<Vec<LogEntry>> {
        self.inner
            .sink
            .query(source_id, from_line, limit)
            .await
            .map_err(|e| {
                warn!(source_id = %source_id, error = %e, "Failed to query logs");
                Error::from(e)
            })
    }

    #[must_use]
    pub fn get_stats(&self) -> AggregatorStats {
        let slots: Vec<(SourceId, Arc<StreamSlot>)> = self
            .inner
            .streams
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut streams: Vec<StreamStats> = slots
            .into_iter()
            .map(|(source_id, slot)| {
                let stream = slot.stream.lock();
                StreamStats {
                    subscribers: self.inner.hub.subscriber_count(&source_id),
                    source_id,
                    buffered: stream.buffered(),
                    line_count: stream.line_count(),
                    since_last_flush_ms: u64::try_from(stream.since_last_flush().as_millis())
                        .unwrap_or(u64::MAX),
                }
            })
            .collect();
        streams.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let metrics = &self.inner.metrics;
        AggregatorStats {
            sink: self.inner.sink.name(),
            active_streams: streams.len(),
            streams,
            subscribed_sources: self.inner.hub.source_count(),
            total_subscribers: self.inner.hub.total_subscribers(),
            entries_pushed: metrics.entries_pushed.load(Ordering::Relaxed),
            entries_rejected: metrics.entries_rejected.load(Ordering::Relaxed),
            flushes: metrics.flushes.load(Ordering::Relaxed),
            entries_persisted: metrics.entries_persisted.load(Ordering::Relaxed),
            write_failures: metrics.write_failures.load(Ordering::Relaxed),
            entries_lost: metrics.entries_lost.load(Ordering::Relaxed),
            live_drops: metrics.live_drops.load(Ordering::Relaxed),
        }
    }

    /// Whether `source_id` was closed recently
    #[must_use]
    pub fn is_closed(&self, source_id: &SourceId) -> bool {
        self.inner.closed.contains_key(source_id)
    }

    #[must_use]
    pub fn is_active(&self, source_id: &SourceId) -> bool {
        self.inner.streams.contains_key(source_id)
    }

    #[must_use]
    pub fn subscriber_hub(&self) -> &SubscriberHub {
        &self.inner.hub
    }

    #[must_use]
    pub fn config(&self) -> &AggregatorConfig {
        &self.inner.config
    }

    /// Close every active stream, flushing what is buffered
    pub async fn shutdown(&self) -> usize {
        let source_ids: Vec<SourceId> = self
            .inner
            .streams
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        info!(streams = source_ids.len(), "Flushing log streams before shutdown");

        let mut closed = 0;
        for source_id in source_ids {
            match self.close_stream(&source_id).await {
                Ok(()) => closed += 1,
                Err(Error::StreamNotFound(_)) => {}
                Err(e) => warn!(source_id = %source_id, error = %e, "Failed to close log stream"),
            }
        }
        closed
    }

    fn slot_for(&self, source_id: &SourceId) -> Result<Arc<StreamSlot>> {
        if let Some(slot) = self.inner.streams.get(source_id) {
            return Ok(Arc::clone(slot.value()));
        }

        match self.inner.streams.entry(source_id.clone()) {
            Entry::Occupied(occupied) => Ok(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                if self.inner.closed.contains_key(source_id) {
                    return Err(Error::StreamClosed(source_id.clone()));
                }
                let slot = self.spawn_stream(source_id.clone())?;
                vacant.insert(Arc::clone(&slot));
                Ok(slot)
            }
        }
    }

    fn spawn_stream(&self, source_id: SourceId) -> Result<Arc<StreamSlot>> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("no async runtime for log writer: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(StreamSlot {
            stream: Mutex::new(LogStream::new(source_id.clone(), self.inner.config.buffer_size)),
            writer: tx,
        });

        let writer = StreamWriter {
            source_id: source_id.clone(),
            slot: Arc::downgrade(&slot),
            commands: rx,
            sink: Arc::clone(&self.inner.sink),
            metrics: Arc::clone(&self.inner.metrics),
            interval: self.inner.config.flush_interval(),
        };
        handle.spawn(writer.run());

        debug!(source_id = %source_id, "Log stream created");
        Ok(slot)
    }
}

/// Single writer of one stream: periodic flush plus all sink writes
struct StreamWriter {
    source_id: SourceId,
    slot: Weak<StreamSlot>,
    commands: mpsc::UnboundedReceiver<FlushCommand>,
    sink: Arc<dyn LogSink>,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl StreamWriter {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(FlushCommand::Write(batch)) => {
                        let _ = self.write(&batch).await;
                    }
                    Some(FlushCommand::Close { residual, done }) => {
                        let result = self.write(&residual).await;
                        let _ = done.send(result);
                        break;
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    let Some(slot) = self.slot.upgrade() else {
                        break;
                    };
                    let mut stream = slot.stream.lock();
                    if stream.flush_due(self.interval) {
                        let batch = stream.swap();
                        debug!(source_id = %self.source_id, entries = batch.len(), "Periodic flush");
                        slot.enqueue(&self.source_id, batch, &self.metrics);
                    }
                }
            }
        }

        debug!(source_id = %self.source_id, "Log writer stopped");
    }

    /// One sink write; failures are counted and never retried
    async fn write(&self, batch: &[LogEntry]) -> std::result::Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let size = batch.len() as u64;
        self.metrics.flushes.fetch_add(1, Ordering::Relaxed);
        match self.sink.batch_insert(batch).await {
            Ok(()) => {
                self.metrics.entries_persisted.fetch_add(size, Ordering::Relaxed);
                debug!(source_id = %self.source_id, entries = size, "Flushed log batch");
                Ok(())
            }
            Err(e) => {
                self.metrics.write_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.entries_lost.fetch_add(size, Ordering::Relaxed);
                error!(
                    source_id = %self.source_id,
                    entries = size,
                    error = %e,
                    "Failed to persist log batch, entries lost"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemoryLogSink, MockLogSink};
    use async_trait::async_trait;

    fn config(buffer_size: usize, flush_interval_ms: u64) -> AggregatorConfig {
        AggregatorConfig {
            buffer_size,
            flush_interval_ms,
            ..AggregatorConfig::default()
        }
    }

    fn entry(source: &str, n: u32) -> LogEntry {
        LogEntry::new(source, n, format!("line {n}"))
    }

    fn aggregator(buffer_size: usize, flush_interval_ms: u64) -> (LogAggregator, Arc<MemoryLogSink>) {
        let sink = Arc::new(MemoryLogSink::new());
        let agg = LogAggregator::new(sink.clone(), config(buffer_size, flush_interval_ms));
        (agg, sink)
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_push_after_close_is_rejected() {
        let (agg, sink) = aggregator(100, 60_000);
        let id = SourceId::from("run-1");

        agg.push(entry("run-1", 1)).unwrap();
        agg.close_stream(&id).await.unwrap();

        let err = agg.push(entry("run-1", 2)).unwrap_err();
        assert!(matches!(err, Error::StreamClosed(_)));

        let persisted = agg.get_logs(&id, 0, 0).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert!(persisted.iter().all(|e| e.line_number != 2));
        assert_eq!(sink.len(&id), 1);
        assert_eq!(agg.get_stats().entries_rejected, 1);
    }

    #[tokio::test]
    async fn test_size_triggered_flush() {
        let (agg, sink) = aggregator(100, 60_000);
        let id = SourceId::from("run-1");

        for n in 1..=150 {
            agg.push(entry("run-1", n)).unwrap();
        }

        let stats = agg.get_stats();
        assert_eq!(stats.active_streams, 1);
        assert_eq!(stats.streams[0].buffered, 50);
        assert_eq!(stats.streams[0].line_count, 150);

        wait_for(|| sink.batch_count() == 1).await;

        let logs = agg.get_logs(&id, 0, 1000).await.unwrap();
        assert_eq!(logs.len(), 100);
        assert_eq!(logs.first().unwrap().line_number, 1);
        assert_eq!(logs.last().unwrap().line_number, 100);
        assert_eq!(sink.batch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_triggered_flush() {
        let (agg, sink) = aggregator(100, 3000);
        let id = SourceId::from("run-1");

        for n in 1..=5 {
            agg.push(entry("run-1", n)).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(sink.len(&id), 0, "nothing flushed before the interval");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.len(&id), 5);
        assert_eq!(sink.batch_count(), 1);
        assert_eq!(agg.get_stats().streams[0].buffered, 0);
    }

    #[tokio::test]
    async fn test_close_flushes_residual_entries() {
        let (agg, sink) = aggregator(100, 60_000);
        let id = SourceId::from("run-1");

        for n in 1..=5 {
            agg.push(entry("run-1", n)).unwrap();
        }
        agg.close_stream(&id).await.unwrap();

        // close waits for the final write
        assert_eq!(sink.len(&id), 5);
        assert!(!agg.is_active(&id));
        assert!(agg.is_closed(&id));
    }

    #[tokio::test]
    async fn test_close_unknown_stream() {
        let (agg, _) = aggregator(100, 60_000);
        let err = agg.close_stream(&SourceId::from("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::StreamNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_logs_range_and_order() {
        let (agg, _) = aggregator(7, 60_000);
        let id = SourceId::from("run-1");

        for n in (1..=30).rev() {
            agg.push(entry("run-1", n)).unwrap();
        }
        agg.close_stream(&id).await.unwrap();

        let logs = agg.get_logs(&id, 10, 5).await.unwrap();
        let lines: Vec<u32> = logs.iter().map(|e| e.line_number).collect();
        assert_eq!(lines, vec![10, 11, 12, 13, 14]);
    }

    #[tokio::test]
    async fn test_live_delivery_in_push_order() {
        let (agg, _) = aggregator(100, 60_000);
        let cancel = CancellationToken::new();
        let mut rx = agg.subscribe(cancel.clone(), SourceId::from("run-1"));

        for n in 1..=3 {
            agg.push(entry("run-1", n)).unwrap();
        }

        for n in 1..=3 {
            assert_eq!(rx.recv().await.unwrap().line_number, n);
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_push() {
        let sink = Arc::new(MemoryLogSink::new());
        let agg = LogAggregator::new(
            sink,
            AggregatorConfig {
                subscriber_capacity: 2,
                ..config(100, 60_000)
            },
        );
        let id = SourceId::from("run-1");
        let mut slow = agg.subscribe(CancellationToken::new(), id.clone());
        let mut fast = agg.subscribe(CancellationToken::new(), id.clone());

        agg.push(entry("run-1", 1)).unwrap();
        agg.push(entry("run-1", 2)).unwrap();
        assert_eq!(fast.recv().await.unwrap().line_number, 1);
        assert_eq!(fast.recv().await.unwrap().line_number, 2);

        agg.push(entry("run-1", 3)).unwrap();
        assert_eq!(fast.recv().await.unwrap().line_number, 3);

        assert_eq!(slow.recv().await.unwrap().line_number, 1);
        assert_eq!(slow.recv().await.unwrap().line_number, 2);
        assert!(slow.try_recv().is_err());
        assert_eq!(agg.get_stats().live_drops, 1);
    }

    #[tokio::test]
    async fn test_cancel_removes_subscriber() {
        let (agg, _) = aggregator(100, 60_000);
        let id = SourceId::from("run-1");
        let cancel = CancellationToken::new();
        let mut rx = agg.subscribe(cancel.clone(), id.clone());
        assert_eq!(agg.subscriber_hub().subscriber_count(&id), 1);

        cancel.cancel();
        assert!(rx.recv().await.is_none());
        wait_for(|| !agg.subscriber_hub().has_source(&id)).await;
    }

    #[tokio::test]
    async fn test_close_ends_live_subscriptions_after_drain() {
        let (agg, _) = aggregator(100, 60_000);
        let id = SourceId::from("run-1");
        let mut rx = agg.subscribe(CancellationToken::new(), id.clone());

        agg.push(entry("run-1", 1)).unwrap();
        agg.close_stream(&id).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().line_number, 1);
        assert!(rx.recv().await.is_none());
        assert_eq!(agg.subscriber_hub().total_subscribers(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_to_closed_source_is_already_closed() {
        let (agg, _) = aggregator(100, 60_000);
        let id = SourceId::from("run-1");
        agg.push(entry("run-1", 1)).unwrap();
        agg.close_stream(&id).await.unwrap();

        let mut rx = agg.subscribe(CancellationToken::new(), id.clone());
        assert!(rx.recv().await.is_none());
        assert!(!agg.subscriber_hub().has_source(&id));
    }

    #[tokio::test]
    async fn test_push_batch_reports_each_entry() {
        let (agg, _) = aggregator(100, 60_000);
        agg.push(entry("done", 1)).unwrap();
        agg.close_stream(&SourceId::from("done")).await.unwrap();

        let results = agg.push_batch(vec![
            entry("open", 1),
            entry("done", 2),
            entry("open", 2),
        ]);

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::StreamClosed(_))));
        assert!(results[2].is_ok());
        assert_eq!(agg.get_stats().streams[0].line_count, 2);
    }

    #[tokio::test]
    async fn test_failed_write_is_not_retried() {
        let mut mock = MockLogSink::new();
        mock.expect_batch_insert()
            .times(1)
            .returning(|_| Err(SinkError::Unavailable("clickhouse down".to_string())));
        mock.expect_name().return_const("mock");

        let agg = LogAggregator::new(Arc::new(mock), config(2, 60_000));
        let mut rx = agg.subscribe(CancellationToken::new(), SourceId::from("run-1"));

        agg.push(entry("run-1", 1)).unwrap();
        agg.push(entry("run-1", 2)).unwrap();

        // live viewers are unaffected by the failing sink
        assert_eq!(rx.recv().await.unwrap().line_number, 1);
        assert_eq!(rx.recv().await.unwrap().line_number, 2);

        wait_for(|| agg.get_stats().write_failures == 1).await;
        let stats = agg.get_stats();
        assert_eq!(stats.entries_lost, 2);
        assert_eq!(stats.entries_persisted, 0);

        // the residue is empty, so close performs no further write
        agg.close_stream(&SourceId::from("run-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_failure_is_surfaced() {
        let mut mock = MockLogSink::new();
        mock.expect_query()
            .returning(|_, _, _| Err(SinkError::Network("connection refused".to_string())));
        mock.expect_name().return_const("mock");

        let agg = LogAggregator::new(Arc::new(mock), AggregatorConfig::default());
        let err = agg.get_logs(&SourceId::from("run-1"), 0, 10).await.unwrap_err();
        assert!(matches!(err, Error::SinkUnavailable(_)));
    }

    /// Records batches and stalls the first write
    struct StallingSink {
        batches: Mutex<Vec<Vec<u32>>>,
        calls: AtomicU64,
    }

    #[async_trait]
    impl LogSink for StallingSink {
        async fn batch_insert(&self, entries: &[LogEntry]) -> std::result::Result<(), SinkError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            self.batches
                .lock()
                .push(entries.iter().map(|e| e.line_number).collect());
            Ok(())
        }

        async fn query(
            &self,
            _source_id: &SourceId,
            _from_line: u32,
            _limit: usize,
        ) -> std::result::Result<Vec<LogEntry>, SinkError> {
            Ok(Vec::new())
        }

        fn name(&self) -> &'static str {
            "stalling"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_of_one_stream_keep_swap_order() {
        let sink = Arc::new(StallingSink {
            batches: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        });
        let agg = LogAggregator::new(sink.clone(), config(2, 60_000));

        for n in 1..=5 {
            agg.push(entry("run-1", n)).unwrap();
        }
        agg.close_stream(&SourceId::from("run-1")).await.unwrap();

        let batches = sink.batches.lock().clone();
        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_stream() {
        let (agg, sink) = aggregator(100, 60_000);
        agg.push(entry("a", 1)).unwrap();
        agg.push(entry("b", 1)).unwrap();
        agg.push(entry("b", 2)).unwrap();

        assert_eq!(agg.shutdown().await, 2);
        assert_eq!(sink.len(&SourceId::from("a")), 1);
        assert_eq!(sink.len(&SourceId::from("b")), 2);
        assert_eq!(agg.get_stats().active_streams, 0);
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let (agg, sink) = aggregator(2, 60_000);
        agg.push(entry("a", 1)).unwrap();
        agg.push(entry("b", 1)).unwrap();
        agg.push(entry("a", 2)).unwrap();

        wait_for(|| sink.len(&SourceId::from("a")) == 2).await;
        assert_eq!(sink.len(&SourceId::from("b")), 0);
    }
}
