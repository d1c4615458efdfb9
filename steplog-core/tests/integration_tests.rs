//! Integration tests for the steplog-core log pipeline
//!
//! These tests drive the aggregator through its public API against real
//! sink adapters.
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;
use std::time::Duration;

use steplog_core::config::{AggregatorConfig, ClickHouseConfig};
use steplog_core::sink::{ClickHouseLogSink, MemoryLogSink};
use steplog_core::{Error, LogAggregator, LogEntry, SourceId};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(buffer_size: usize) -> AggregatorConfig {
    AggregatorConfig {
        buffer_size,
        flush_interval_ms: 60_000,
        ..AggregatorConfig::default()
    }
}

#[tokio::test]
async fn test_close_writes_residual_batch_to_clickhouse() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let sink = ClickHouseLogSink::new(&ClickHouseConfig {
        url: server.uri(),
        ..ClickHouseConfig::default()
    })
    .unwrap();
    let aggregator = LogAggregator::new(Arc::new(sink), config(100));

    for n in 1..=3 {
        aggregator
            .push(LogEntry::new("step-42", n, format!("compiling {n}")).with_agent("agent-a"))
            .unwrap();
    }
    aggregator.close_stream(&SourceId::from("step-42")).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1, "one INSERT per flush batch");

    let body = String::from_utf8(requests[0].body.clone()).unwrap();
    let rows: Vec<LogEntry> = body
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.agent_id == "agent-a"));
    assert_eq!(rows[2].content, "compiling 3");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sources_are_fully_persisted() {
    let sink = Arc::new(MemoryLogSink::new());
    let aggregator = LogAggregator::new(sink.clone(), config(16));

    let mut handles = Vec::new();
    for source in 0..8 {
        let aggregator = aggregator.clone();
        handles.push(tokio::spawn(async move {
            let source_id = format!("run-{source}");
            for n in 1..=250 {
                aggregator.push(LogEntry::new(source_id.as_str(), n, "x")).unwrap();
                if n % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(aggregator.shutdown().await, 8);

    for source in 0..8 {
        let id = SourceId::from(format!("run-{source}"));
        let logs = aggregator.get_logs(&id, 0, 0).await.unwrap();
        assert_eq!(logs.len(), 250);
        assert!(logs.windows(2).all(|w| w[0].line_number < w[1].line_number));
    }

    let stats = aggregator.get_stats();
    assert_eq!(stats.entries_pushed, 2000);
    assert_eq!(stats.entries_persisted, 2000);
    assert_eq!(stats.entries_lost, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_history_then_live_tail() {
    let sink = Arc::new(MemoryLogSink::new());
    let aggregator = LogAggregator::new(sink, config(5));
    let id = SourceId::from("build-7");

    for n in 1..=10 {
        aggregator.push(LogEntry::new("build-7", n, "early")).unwrap();
    }

    // both batches of five reach the sink
    tokio::time::timeout(Duration::from_secs(2), async {
        while aggregator.get_logs(&id, 0, 0).await.unwrap().len() < 10 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let history = aggregator.get_logs(&id, 4, 1000).await.unwrap();
    assert_eq!(history.first().unwrap().line_number, 4);
    assert_eq!(history.len(), 7);

    let cancel = CancellationToken::new();
    let mut live = aggregator.subscribe(cancel.clone(), id.clone());
    aggregator.push(LogEntry::new("build-7", 11, "late")).unwrap();
    aggregator.close_stream(&id).await.unwrap();

    assert_eq!(live.recv().await.unwrap().line_number, 11);
    assert!(live.recv().await.is_none());

    assert!(matches!(
        aggregator.push(LogEntry::new("build-7", 12, "too late")),
        Err(Error::StreamClosed(_))
    ));
}
