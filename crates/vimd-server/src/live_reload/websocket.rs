//! WebSocket handler for live reload.
//!
//! Registers each connection with the client set and forwards its outbox to
//! the socket until either side closes.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;

use crate::state::AppState;

/// Handle WebSocket upgrade for live reload.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (id, mut outbox) = state.clients.register();

    loop {
        tokio::select! {
            // Forward broadcasts to the client
            message = outbox.recv() => {
                let Some(message) = message else { break };
                let closing = matches!(message, Message::Close(_));
                if socket.send(message).await.is_err() || closing {
                    break;
                }
            }
            // Client messages are ignored; only closure matters
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.clients.unregister(id);
}
