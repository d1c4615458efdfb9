//! Agent ingestion socket
//!
//! Agents send `{"type":"batch", ...}` frames followed by `{"type":"end"}`.
//! The server answers once with an `ack` (or `error`) frame and closes.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::json_frame;
use crate::http::AppState;
use crate::impls::{BatchSource, IngestAck, IngestBatch};

/// Frames sent by an agent
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    Batch(IngestBatch),
    End,
}

/// Frames sent back to an agent
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestReply {
    Ack(IngestAck),
    Error { error: String },
}

/// Reads agent frames from the receiving half of a socket
///
/// Any stream of socket messages works; the handler feeds it a
/// `SplitStream<WebSocket>`.
struct WebSocketBatches<S> {
    receiver: S,
    idle_timeout: Duration,
}

#[async_trait]
impl<S, E> BatchSource for WebSocketBatches<S>
where
    S: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: std::fmt::Display + Send,
{
    async fn next_batch(&mut self) -> Option<Result<IngestBatch, String>> {
        loop {
            let Ok(message) = tokio::time::timeout(self.idle_timeout, self.receiver.next()).await
            else {
                return Some(Err(format!(
                    "no data received for {}s",
                    self.idle_timeout.as_secs()
                )));
            };

            let payload = match message {
                Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                // Client went away: treat as end of input
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => return Some(Err(format!("WebSocket error: {e}"))),
                Some(Ok(_)) => continue,
            };

            return match serde_json::from_slice::<AgentFrame>(&payload) {
                Ok(AgentFrame::Batch(batch)) => Some(Ok(batch)),
                Ok(AgentFrame::End) => None,
                Err(e) => Some(Err(format!("invalid batch frame: {e}"))),
            };
        }
    }
}

/// Upgrade an agent connection for continuous log upload
pub async fn ingest_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let max_message_size = state.server_config.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_ingest_socket(socket, state))
}

async fn handle_ingest_socket(socket: WebSocket, state: AppState) {
    let (mut sender, receiver) = socket.split();
    let mut source = WebSocketBatches {
        receiver,
        idle_timeout: Duration::from_secs(state.server_config.ingest_idle_timeout_seconds),
    };

    info!("Agent ingestion connection established");

    let reply = match state.log_api.ingest(&mut source).await {
        Ok(ack) => IngestReply::Ack(ack),
        Err(e) => {
            warn!(error = %e, "Agent ingestion aborted");
            IngestReply::Error {
                error: e.to_string(),
            }
        }
    };

    if let Some(frame) = json_frame(&reply) {
        // The agent may already be gone
        let _ = sender.send(frame).await;
    }
    let _ = sender.send(Message::Close(None)).await;

    info!("Agent ingestion connection closed");
}
