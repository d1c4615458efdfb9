//! Single-source tail socket
//!
//! `GET /ws/logs/{source_id}/tail?from_line=N&follow=true` streams
//! `TailFrame`s; the last frame has `is_complete = true`. The server pings
//! every heartbeat interval; closing the socket, or two intervals without any
//! inbound traffic, cancels the session.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use steplog_core::SourceId;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::json_frame;
use crate::http::error::ErrorResponse;
use crate::http::AppState;
use crate::impls::TailRequest;

#[derive(Debug, Default, Deserialize)]
pub struct TailQuery {
    pub from_line: Option<u32>,
    pub follow: Option<bool>,
}

pub async fn tail_handler(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    Query(query): Query<TailQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request = TailRequest {
        source_id: SourceId::from(source_id),
        from_line: query.from_line.unwrap_or(0),
        follow: query.follow.unwrap_or(false),
    };
    ws.on_upgrade(move |socket| handle_tail_socket(socket, state, request))
}

async fn handle_tail_socket(socket: WebSocket, state: AppState, request: TailRequest) {
    let (mut sender, receiver) = socket.split();
    let source_id = request.source_id.clone();
    let cancel = CancellationToken::new();

    let period = Duration::from_secs(state.server_config.heartbeat_interval_seconds);
    let watcher = tokio::spawn(watch_viewer(receiver, period * 2, cancel.clone()));

    info!(source_id = %source_id, follow = request.follow, "Tail connection established");

    match state.log_api.tail(request, cancel.clone()).await {
        Ok(mut session) => {
            let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let message = tokio::select! {
                    frame = session.next_frame() => match frame {
                        Some(frame) => match json_frame(&frame) {
                            Some(message) => message,
                            None => continue,
                        },
                        None => break,
                    },
                    _ = heartbeat.tick() => Message::Ping(Vec::new().into()),
                };

                if !send_or_cancel(&mut sender, message, &cancel).await {
                    debug!(source_id = %source_id, "Tail viewer disconnected");
                    break;
                }
            }
        }
        Err(e) => {
            warn!(source_id = %source_id, error = %e, "Tail failed to start");
            let error = crate::http::AppError::from(e);
            if let Some(message) = json_frame(&ErrorResponse {
                error: error.message,
                status: error.status.as_u16(),
            }) {
                send_or_cancel(&mut sender, message, &cancel).await;
            }
        }
    }

    if !cancel.is_cancelled() {
        let _ = sender.send(Message::Close(None)).await;
    }
    cancel.cancel();
    watcher.abort();

    info!(source_id = %source_id, "Tail connection closed");
}

/// Send one frame unless the viewer is already gone
///
/// A half-open peer can stall a write indefinitely, so the write is raced
/// against the session token.
async fn send_or_cancel<W>(sender: &mut W, message: Message, cancel: &CancellationToken) -> bool
where
    W: Sink<Message> + Unpin,
{
    tokio::select! {
        result = sender.send(message) => result.is_ok(),
        () = cancel.cancelled() => false,
    }
}

/// Cancel the tail once the viewer leaves or goes silent
///
/// Every inbound message (pongs included) counts as a sign of life. A close,
/// a read error, or `idle_timeout` without traffic ends the session.
async fn watch_viewer<S, E>(mut receiver: S, idle_timeout: Duration, cancel: CancellationToken)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return,
            next = tokio::time::timeout(idle_timeout, receiver.next()) => next,
        };

        match next {
            Ok(Some(Ok(Message::Close(_))) | None | Some(Err(_))) => break,
            Ok(Some(Ok(_))) => {}
            Err(_) => {
                warn!(idle_secs = idle_timeout.as_secs(), "Tail viewer went silent");
                break;
            }
        }
    }
    cancel.cancel();
}
