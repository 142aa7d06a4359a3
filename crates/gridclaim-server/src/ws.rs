//! WebSocket transport: one connection is one session.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use gridclaim_core::ClientMessage;
use tracing::{debug, info, warn};

use crate::handlers::AppState;

/// GET /ws - Upgrade to the grid session protocol.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (lease, mut outbound_rx) = state.engine.connect();
    let session_id = lease.id().to_string();

    // Forward queued events to the socket
    let send_task = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if ws_tx
                .send(Message::Text(payload.to_string().into()))
                .await
                .is_err()
            {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!(session_id = %session_id, "Client sent close frame");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(session_id = %session_id, "WebSocket error: {}", e);
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(msg) => lease.handle(msg),
            Err(e) => lease.reject_malformed(&e.to_string()),
        }
    }

    // Releases the session's cells and notifies everyone else
    drop(lease);
    send_task.abort();
    info!(session_id = %session_id, "WebSocket connection closed");
}
