//! Log query, close, stats and bulk ingestion endpoints
//!
//! Only per-source routes live under `/api/logs/`, so every source id is addressable.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use steplog_core::{AggregatorStats, LogEntry, SourceId};
use tracing::info;

use super::{AppResult, AppState};
use crate::impls::{BufferedBatches, IngestAck, IngestBatch};

pub fn create_logs_router() -> Router<AppState> {
    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/ingest", post(ingest_logs))
        .route("/api/logs/{source_id}", get(get_logs))
        .route("/api/logs/{source_id}/close", post(close_stream))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub from_line: Option<u32>,
    /// 0 returns everything; defaults to the tail history limit
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub source_id: SourceId,
    pub logs: Vec<LogEntry>,
}

/// Historical logs of one source
pub async fn get_logs(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<LogsResponse>> {
    let source_id = SourceId::from(source_id);
    let limit = query.limit.unwrap_or(state.log_api.history_limit());
    let logs = state
        .aggregator
        .get_logs(&source_id, query.from_line.unwrap_or(0), limit)
        .await?;

    Ok(Json(LogsResponse { source_id, logs }))
}

/// Final flush and close of a source, called when its step finishes
pub async fn close_stream(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> AppResult<StatusCode> {
    let source_id = SourceId::from(source_id);
    state.aggregator.close_stream(&source_id).await?;
    info!(source_id = %source_id, "Log stream closed via API");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_stats(State(state): State<AppState>) -> Json<AggregatorStats> {
    Json(state.aggregator.get_stats())
}

/// One-shot upload of several batches
pub async fn ingest_logs(
    State(state): State<AppState>,
    Json(batches): Json<Vec<IngestBatch>>,
) -> AppResult<impl IntoResponse> {
    let mut source = BufferedBatches::from(batches);
    let ack: IngestAck = state.log_api.ingest(&mut source).await?;
    Ok(Json(ack))
}
