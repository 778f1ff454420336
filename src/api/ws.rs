//! Stream transport endpoint: binds a websocket to the connection manager.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::warn;

use super::AppState;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let manager = state.connections.clone();
    let (client_id, mut outbound) = manager.register();

    loop {
        tokio::select! {
            // Drain this client's outbound queue onto the socket.
            queued = outbound.recv() => {
                let Some(message) = queued else { break };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(client = client_id, error = %e, "failed to serialize outbound message");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            // Apply inbound protocol messages.
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        manager.handle_client_text(client_id, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    manager.disconnect(client_id);
}
