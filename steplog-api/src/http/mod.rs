// Module: http
// HTTP/JSON and WebSocket transport for the log API

pub mod error;
pub mod health;
pub mod logs;
pub mod websocket;

use axum::{routing::get, Router};
use std::sync::Arc;
use steplog_core::config::ServerConfig;
use steplog_core::LogAggregator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::impls::LogApiImpl;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub aggregator: LogAggregator,
    /// Unified API implementation layer
    pub log_api: Arc<LogApiImpl>,
    pub server_config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(aggregator: LogAggregator, server_config: ServerConfig) -> Self {
        Self {
            log_api: Arc::new(LogApiImpl::new(aggregator.clone())),
            aggregator,
            server_config: Arc::new(server_config),
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(aggregator: LogAggregator, server_config: ServerConfig) -> Router {
    let state = AppState::new(aggregator, server_config);

    Router::new()
        // Health check endpoints (for monitoring probes)
        .merge(health::create_health_router())
        // Historical query, close, stats, bulk ingestion
        .merge(logs::create_logs_router())
        // Streaming endpoints
        .route("/ws/logs", get(websocket::viewer::viewer_handler))
        .route("/ws/logs/ingest", get(websocket::ingest::ingest_handler))
        .route("/ws/logs/{source_id}/tail", get(websocket::tail::tail_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
