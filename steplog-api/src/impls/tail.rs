//! Server → viewer tailing: history first, then (optionally) live entries

use serde::{Deserialize, Serialize};
use steplog_core::{Error, LogEntry, Result, SourceId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::LogApiImpl;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailRequest {
    pub source_id: SourceId,
    #[serde(default)]
    pub from_line: u32,
    #[serde(default)]
    pub follow: bool,
}

/// One message of a tail; the last one has `is_complete = true` and no chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailFrame {
    pub source_id: SourceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_chunk: Option<LogEntry>,
    pub is_complete: bool,
}

impl TailFrame {
    fn entry(entry: LogEntry) -> Self {
        Self {
            source_id: entry.source_id.clone(),
            log_chunk: Some(entry),
            is_complete: false,
        }
    }

    fn complete(source_id: SourceId) -> Self {
        Self {
            source_id,
            log_chunk: None,
            is_complete: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Replaying,
    Live,
    Complete,
    Cancelled,
}

/// A running tail
///
/// `Replaying → Complete` without follow, `Replaying → Live → Complete |
/// Cancelled` with it. Dropping the session releases its live queue.
pub struct TailSession {
    source_id: SourceId,
    state: TailState,
    history: std::vec::IntoIter<LogEntry>,
    live: Option<mpsc::Receiver<LogEntry>>,
    cancel: CancellationToken,
}

impl TailSession {
    /// Next frame to emit; `None` once the session is over
    ///
    /// A cancelled session ends without a completion frame.
    pub async fn next_frame(&mut self) -> Option<TailFrame> {
        loop {
            if self.cancel.is_cancelled() && self.state != TailState::Complete {
                self.cancel();
            }

            match self.state {
                TailState::Replaying => {
                    if let Some(entry) = self.history.next() {
                        return Some(TailFrame::entry(entry));
                    }
                    if self.live.is_some() {
                        debug!(source_id = %self.source_id, "Tail switched to live");
                        self.state = TailState::Live;
                    } else {
                        return Some(self.finish());
                    }
                }
                TailState::Live => {
                    let received = {
                        let live = self.live.as_mut()?;
                        tokio::select! {
                            biased;

                            () = self.cancel.cancelled() => None,
                            entry = live.recv() => Some(entry),
                        }
                    };

                    match received {
                        Some(Some(entry)) => return Some(TailFrame::entry(entry)),
                        Some(None) => return Some(self.finish()),
                        None => self.cancel(),
                    }
                }
                TailState::Complete | TailState::Cancelled => return None,
            }
        }
    }

    #[must_use]
    pub const fn state(&self) -> TailState {
        self.state
    }

    #[must_use]
    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    /// Historical entries not yet emitted
    #[must_use]
    pub fn history_remaining(&self) -> usize {
        self.history.len()
    }

    fn finish(&mut self) -> TailFrame {
        self.state = TailState::Complete;
        self.live = None;
        debug!(source_id = %self.source_id, "Tail complete");
        TailFrame::complete(self.source_id.clone())
    }

    fn cancel(&mut self) {
        self.state = TailState::Cancelled;
        self.live = None;
        self.cancel.cancel();
    }
}

impl Drop for TailSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl LogApiImpl {
    /// Start a tail: read history now, subscribe right after when following
    ///
    /// A failing history read is returned to the caller and no session starts.
    pub async fn tail(&self, request: TailRequest, cancel: CancellationToken) -> Result<TailSession> {
        if request.source_id.is_empty() {
            return Err(Error::InvalidInput("source_id is required".to_string()));
        }

        let history = self
            .aggregator()
            .get_logs(&request.source_id, request.from_line, self.history_limit())
            .await?;

        let session_cancel = cancel.child_token();
        let live = request.follow.then(|| {
            self.aggregator()
                .subscribe(session_cancel.clone(), request.source_id.clone())
        });

        debug!(
            source_id = %request.source_id,
            from_line = request.from_line,
            follow = request.follow,
            history = history.len(),
            "Tail started"
        );

        Ok(TailSession {
            source_id: request.source_id,
            state: TailState::Replaying,
            history: history.into_iter(),
            live,
            cancel: session_cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use steplog_core::config::AggregatorConfig;
    use steplog_core::sink::MemoryLogSink;
    use steplog_core::LogAggregator;

    async fn api_with_history(lines: u32) -> LogApiImpl {
        let sink = Arc::new(MemoryLogSink::new());
        let aggregator = LogAggregator::new(
            sink,
            AggregatorConfig {
                flush_interval_ms: 60_000,
                ..AggregatorConfig::default()
            },
        );
        for n in 1..=lines {
            aggregator.push(LogEntry::new("run-1", n, format!("old {n}"))).unwrap();
        }
        if lines > 0 {
            // close flushes everything to the sink
            aggregator.close_stream(&SourceId::from("run-1")).await.unwrap();
        }
        LogApiImpl::new(aggregator)
    }

    fn request(source: &str, from_line: u32, follow: bool) -> TailRequest {
        TailRequest {
            source_id: SourceId::from(source),
            from_line,
            follow,
        }
    }

    async fn collect(session: &mut TailSession) -> Vec<TailFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = session.next_frame().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_history_only_ends_with_completion() {
        let api = api_with_history(5).await;
        let mut session = api
            .tail(request("run-1", 3, false), CancellationToken::new())
            .await
            .unwrap();

        let frames = collect(&mut session).await;
        let lines: Vec<u32> = frames
            .iter()
            .filter_map(|f| f.log_chunk.as_ref().map(|e| e.line_number))
            .collect();
        assert_eq!(lines, vec![3, 4, 5]);
        assert!(frames.last().unwrap().is_complete);
        assert_eq!(session.state(), TailState::Complete);
    }

    #[tokio::test]
    async fn test_from_line_past_end_yields_only_completion() {
        let api = api_with_history(5).await;
        let mut session = api
            .tail(request("run-1", 100, false), CancellationToken::new())
            .await
            .unwrap();

        let frames = collect(&mut session).await;
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_complete);
    }

    #[tokio::test]
    async fn test_follow_on_closed_source_completes_immediately() {
        let api = api_with_history(2).await;
        let mut session = api
            .tail(request("run-1", 0, true), CancellationToken::new())
            .await
            .unwrap();

        let frames = collect(&mut session).await;
        assert_eq!(frames.len(), 3);
        assert!(frames[2].is_complete);
    }

    #[tokio::test]
    async fn test_follow_streams_live_until_close() {
        let api = api_with_history(0).await;
        let id = SourceId::from("run-2");
        let mut session = api
            .tail(request("run-2", 0, true), CancellationToken::new())
            .await
            .unwrap();

        api.aggregator().push(LogEntry::new("run-2", 1, "live")).unwrap();
        let frame = session.next_frame().await.unwrap();
        assert_eq!(session.state(), TailState::Live);
        assert_eq!(frame.log_chunk.unwrap().content, "live");

        api.aggregator().close_stream(&id).await.unwrap();
        let last = session.next_frame().await.unwrap();
        assert!(last.is_complete);
        assert!(session.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_ends_silently_and_unsubscribes() {
        let api = api_with_history(0).await;
        let id = SourceId::from("run-3");
        let cancel = CancellationToken::new();
        let mut session = api.tail(request("run-3", 0, true), cancel.clone()).await.unwrap();
        assert_eq!(api.aggregator().subscriber_hub().subscriber_count(&id), 1);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        assert!(session.next_frame().await.is_none());
        assert_eq!(session.state(), TailState::Cancelled);

        tokio::time::timeout(Duration::from_secs(1), async {
            while api.aggregator().subscriber_hub().has_source(&id) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_dropping_session_releases_subscription() {
        let api = api_with_history(0).await;
        let id = SourceId::from("run-4");
        let session = api
            .tail(request("run-4", 0, true), CancellationToken::new())
            .await
            .unwrap();
        drop(session);

        tokio::time::timeout(Duration::from_secs(1), async {
            while api.aggregator().subscriber_hub().has_source(&id) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_empty_source_id_is_invalid() {
        let api = api_with_history(0).await;
        let result = api.tail(request("", 0, false), CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
