//! WebSocket connection lifecycle
//!
//! Each accepted connection gets a registry entry and a dedicated writer
//! task draining its outbound channel, so sends never block the reader.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatch;
use crate::registry::SessionHandle;
use crate::state::AppState;

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let max = state.config.server.max_message_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state, remote))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, remote: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let handle = SessionHandle::new(remote.to_string(), tx);
    let session_id = handle.id.clone();

    info!(session = %session_id, remote = %remote, "WebSocket client connected");

    state.registry.register(handle.clone()).await;
    // Fast-sync before any live traffic reaches this session
    state.fast_sync(&handle).await;

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!(session = %session_id, bytes = text.len(), "Received text frame");
                dispatch::handle_message(&state, &handle, text.as_str()).await;
            }
            Ok(Message::Ping(data)) => {
                handle.send(Message::Pong(data));
            }
            Ok(Message::Binary(data)) => {
                // The device protocol is text-only; log and ignore
                debug!(session = %session_id, bytes = data.len(), "Ignoring binary frame");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(session = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.registry.unregister(&session_id).await;
    writer.abort();
    let total = state.registry.session_count().await;
    info!(
        session = %session_id,
        total,
        "WebSocket client disconnected"
    );
}
