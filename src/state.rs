//! Shared relay state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the relay configuration and the hub: every connected board
//! instance, keyed by a relay-assigned client id, with the sender half of
//! that client's bounded outbound queue. There is one hub per relay; all
//! connected instances share a single board.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::RelayConfig;

/// Running relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Payloads accepted from clients and fanned out.
    pub relayed: AtomicU64,
    /// Payloads dropped because they did not decode.
    pub rejected: AtomicU64,
    /// Per-recipient deliveries skipped because the recipient's queue was full or closed.
    pub skipped: AtomicU64,
}

impl RelayStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    /// Connected clients: client_id -> sender for outgoing payloads.
    pub clients: Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>,
    pub stats: Arc<RelayStats>,
}

impl AppState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            clients: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RelayStats::default()),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
