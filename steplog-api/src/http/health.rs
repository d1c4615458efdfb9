//! Health check endpoints
//!
//! Provides simple health check for monitoring probes.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::http::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Readiness with a short summary of the pipeline
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.aggregator.get_stats();
    Json(json!({
        "status": "ready",
        "sink": stats.sink,
        "active_streams": stats.active_streams,
        "subscribers": stats.total_subscribers,
    }))
}
