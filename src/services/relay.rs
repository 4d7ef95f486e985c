//! Relay service: hub membership, inbound inspection, and fan-out.
//!
//! DESIGN
//! ======
//! The relay never interprets or rewrites envelopes. Each inbound payload is
//! decoded once with the board codec so it can be logged with its summary
//! fields and so garbage never reaches peers; what is forwarded is the
//! original text, byte for byte.
//!
//! Fan-out excludes the sender: a board instance never receives its own
//! envelope back from the relay. Clients still filter by source identity,
//! since other transports may reflect.
//!
//! ERROR HANDLING
//! ==============
//! Delivery is best effort. A recipient whose queue is full (slow reader) or
//! closed (disconnecting) misses that payload; the next snapshot-carrying
//! envelope brings it back in line.

#[cfg(test)]
#[path = "relay_test.rs"]
mod relay_test;

use board::envelope::{CodecError, Summary, decode_value};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{AppState, RelayStats};

/// Verdict on one inbound payload.
#[derive(Debug)]
pub enum Inspection {
    /// Well-formed; forward verbatim.
    Relay(Summary),
    /// Not decodable; drop.
    Reject(CodecError),
}

/// Decode `text` far enough to log it and to decide whether to forward it.
///
/// Payloads of any `kind` are relayed; only the `"op"` kind is checked
/// against the envelope shape.
pub fn inspect(text: &str) -> Inspection {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Inspection::Reject(CodecError::Json(e)),
    };
    let summary = Summary::of_value(&value);
    match decode_value(value) {
        Ok(_) => Inspection::Relay(summary),
        Err(e) => Inspection::Reject(e),
    }
}

/// Add a client to the hub.
pub async fn join(state: &AppState, client_id: Uuid, tx: mpsc::Sender<String>) {
    let mut clients = state.clients.write().await;
    clients.insert(client_id, tx);
    info!(%client_id, clients = clients.len(), "relay: client joined");
}

/// Remove a client from the hub.
pub async fn part(state: &AppState, client_id: Uuid) {
    let mut clients = state.clients.write().await;
    clients.remove(&client_id);
    info!(
        %client_id,
        clients = clients.len(),
        relayed = RelayStats::get(&state.stats.relayed),
        rejected = RelayStats::get(&state.stats.rejected),
        skipped = RelayStats::get(&state.stats.skipped),
        "relay: client parted"
    );
}

/// Handle one inbound payload from `client_id`. Returns how many peers it was queued for.
pub async fn relay(state: &AppState, client_id: Uuid, text: &str) -> usize {
    match inspect(text) {
        Inspection::Relay(summary) => {
            info!(
                %client_id,
                kind = %summary.kind,
                source_id = %summary.source_id,
                ops = summary.ops,
                children = ?summary.children,
                "relay: payload received"
            );
            RelayStats::bump(&state.stats.relayed);
            broadcast(state, text, Some(client_id)).await
        }
        Inspection::Reject(e) => {
            warn!(%client_id, error = %e, bytes = text.len(), "relay: malformed payload dropped");
            RelayStats::bump(&state.stats.rejected);
            0
        }
    }
}

/// Queue `payload` for every client except `exclude`. Returns how many were queued.
pub async fn broadcast(state: &AppState, payload: &str, exclude: Option<Uuid>) -> usize {
    let clients = state.clients.read().await;
    let mut delivered = 0;
    for (client_id, tx) in clients.iter() {
        if exclude == Some(*client_id) {
            continue;
        }
        match tx.try_send(payload.to_owned()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                RelayStats::bump(&state.stats.skipped);
                warn!(%client_id, "relay: client queue full, payload skipped");
            }
            Err(TrySendError::Closed(_)) => {
                RelayStats::bump(&state.stats.skipped);
                debug!(%client_id, "relay: client queue closed, payload skipped");
            }
        }
    }
    delivered
}
