//! WebSocket handler: envelope relay between board instances.
//!
//! DESIGN
//! ======
//! On upgrade, assigns a client ID, registers a bounded outbound queue in the
//! hub, and enters a `select!` loop:
//! - Incoming text from the client → inspect + fan out to peers
//! - Payloads queued by peers → forward to client
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade (oversized messages are refused by the socket)
//! 2. Join the hub
//! 3. Relay until the client closes or a send fails
//! 4. Part the hub

#[cfg(test)]
#[path = "ws_test.rs"]
mod ws_test;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services;
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection queue for payloads relayed from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<String>(state.config.channel_capacity);
    services::relay::join(&state, client_id, client_tx).await;

    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(%client_id, error = %e, "ws: receive failed");
                        break;
                    }
                };
                match msg {
                    Message::Text(text) => {
                        services::relay::relay(&state, client_id, text.as_str()).await;
                    }
                    Message::Binary(bytes) => {
                        debug!(%client_id, bytes = bytes.len(), "ws: binary message ignored");
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            Some(payload) = client_rx.recv() => {
                if let Err(e) = socket.send(Message::Text(payload.into())).await {
                    warn!(%client_id, error = %e, "ws: send failed");
                    break;
                }
            }
        }
    }

    services::relay::part(&state, client_id).await;
    info!(%client_id, "ws: client disconnected");
}
