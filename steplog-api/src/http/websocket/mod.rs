//! WebSocket transport
//!
//! Each handler adapts a socket to the transport-agnostic layer in
//! `impls`: agent sockets become a `BatchSource`, viewer sockets drive a
//! `TailSession`. Frames are JSON text.

pub mod ingest;
pub mod tail;
pub mod viewer;

use axum::extract::ws::Message;
use serde::Serialize;
use tracing::error;

/// Encode a value as a JSON text frame
pub(crate) fn json_frame<T: Serialize>(value: &T) -> Option<Message> {
    match serde_json::to_string(value) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            error!("Failed to encode WebSocket frame: {}", e);
            None
        }
    }
}
