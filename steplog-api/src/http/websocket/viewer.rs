//! Multiplexed viewer socket
//!
//! A viewer keeps one socket open and switches between sources:
//!
//! - client: `{"type":"subscribe","source_id":"..","from_line":0,"follow":true}`
//!   or `{"type":"unsubscribe"}`
//! - server: `log`, `message`, `complete` and `error` frames
//!
//! Only one subscription is active per socket; subscribing again replaces it.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use steplog_core::{LogEntry, SourceId};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::json_frame;
use crate::http::AppState;
use crate::impls::{LogApiImpl, TailRequest};

/// Outbound frames buffered per socket
const OUTBOUND_CAPACITY: usize = 256;

const fn default_follow() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerRequest {
    Subscribe {
        #[serde(alias = "step_run_id")]
        source_id: SourceId,
        #[serde(default)]
        from_line: u32,
        #[serde(default = "default_follow")]
        follow: bool,
    },
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerReply {
    Log {
        source_id: SourceId,
        log: LogEntry,
    },
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<SourceId>,
        message: String,
    },
    Complete {
        source_id: SourceId,
        message: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<SourceId>,
        error: String,
    },
}

impl ViewerReply {
    fn message(source_id: Option<SourceId>, message: &str) -> Self {
        Self::Message {
            source_id,
            message: message.to_string(),
        }
    }

    fn error(source_id: Option<SourceId>, error: impl Into<String>) -> Self {
        Self::Error {
            source_id,
            error: error.into(),
        }
    }
}

pub async fn viewer_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let max_message_size = state.server_config.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_viewer_socket(socket, state))
}

async fn handle_viewer_socket(socket: WebSocket, state: AppState) {
    let connection_id = format!("viewer_{}", nanoid::nanoid!(8));
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);

    // Spawn task to handle server messages -> WebSocket
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    info!(connection_id = %connection_id, "Viewer connection established");

    let connection = CancellationToken::new();
    let mut active: Option<CancellationToken> = None;
    let period = Duration::from_secs(state.server_config.heartbeat_interval_seconds);
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = ws_receiver.next() => {
                let payload = match message {
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(connection_id = %connection_id, error = %e, "Viewer socket error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                };

                match serde_json::from_slice::<ViewerRequest>(&payload) {
                    Ok(ViewerRequest::Subscribe { source_id, from_line, follow }) => {
                        if let Some(previous) = active.take() {
                            previous.cancel();
                        }
                        if source_id.is_empty() {
                            send(&tx, &ViewerReply::error(None, "source_id is required")).await;
                            continue;
                        }

                        let token = connection.child_token();
                        active = Some(token.clone());
                        let request = TailRequest { source_id, from_line, follow };
                        tokio::spawn(forward_tail(
                            state.log_api.clone(),
                            request,
                            token,
                            tx.clone(),
                        ));
                    }
                    Ok(ViewerRequest::Unsubscribe) => {
                        if let Some(previous) = active.take() {
                            previous.cancel();
                        }
                        send(&tx, &ViewerReply::message(None, "unsubscribed")).await;
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Invalid viewer message");
                        send(&tx, &ViewerReply::error(None, "invalid message format")).await;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if tx.try_send(Message::Ping(Vec::new().into())).is_err() {
                    warn!(connection_id = %connection_id, "Viewer too slow, heartbeat skipped");
                }
            }
        }
    }

    // Ends every subscription spawned for this socket
    connection.cancel();
    drop(tx);
    if let Err(e) = writer.await {
        error!("Viewer writer task failed: {}", e);
    }

    info!(connection_id = %connection_id, "Viewer connection closed");
}

/// Run one tail and translate its frames into viewer replies
async fn forward_tail(
    api: std::sync::Arc<LogApiImpl>,
    request: TailRequest,
    cancel: CancellationToken,
    tx: mpsc::Sender<Message>,
) {
    let source_id = request.source_id.clone();

    let mut session = match api.tail(request, cancel.clone()).await {
        Ok(session) => session,
        Err(e) => {
            send(&tx, &ViewerReply::error(Some(source_id), e.to_string())).await;
            return;
        }
    };
    // Replaced by a newer subscribe while history was loading
    if cancel.is_cancelled() {
        debug!(source_id = %source_id, "Viewer subscription superseded before start");
        return;
    }
    send(&tx, &ViewerReply::message(Some(source_id.clone()), "subscribed")).await;

    let mut history_announced = false;
    loop {
        if !history_announced && session.history_remaining() == 0 {
            history_announced = true;
            send(
                &tx,
                &ViewerReply::message(Some(source_id.clone()), "historical logs loaded"),
            )
            .await;
        }

        let Some(frame) = session.next_frame().await else {
            break;
        };
        let reply = match frame.log_chunk {
            Some(log) => ViewerReply::Log {
                source_id: frame.source_id,
                log,
            },
            None => ViewerReply::Complete {
                source_id: frame.source_id,
                message: "log stream completed".to_string(),
            },
        };
        if !send(&tx, &reply).await {
            break;
        }
    }

    debug!(source_id = %source_id, state = ?session.state(), "Viewer subscription ended");
}

/// Queue a reply; `false` once the socket writer is gone
async fn send(tx: &mpsc::Sender<Message>, reply: &ViewerReply) -> bool {
    match json_frame(reply) {
        Some(message) => tx.send(message).await.is_ok(),
        None => true,
    }
}
