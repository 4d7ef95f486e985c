//! Session configuration loaded from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use crate::echo::SourceId;

const DEFAULT_SEND_SNAPSHOTS: bool = true;

/// Tuning knobs for a [`crate::session::SyncSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Attach the full tree to every outgoing envelope. Peers then adopt it
    /// instead of replaying operations.
    pub send_snapshots: bool,
    /// Identity override. `None` uses the process identity.
    pub source_id: Option<SourceId>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { send_snapshots: DEFAULT_SEND_SNAPSHOTS, source_id: None }
    }
}

impl SyncConfig {
    /// Read `DRAWSYNC_SEND_SNAPSHOTS` and `DRAWSYNC_SOURCE_ID`.
    #[must_use]
    pub fn from_env() -> Self {
        let source_id = match std::env::var("DRAWSYNC_SOURCE_ID") {
            Ok(token) if !token.trim().is_empty() => Some(SourceId::new(token.trim())),
            _ => None,
        };
        Self {
            send_snapshots: env_flag("DRAWSYNC_SEND_SNAPSHOTS", DEFAULT_SEND_SNAPSHOTS),
            source_id,
        }
    }

    /// The identity stamped on outgoing envelopes.
    #[must_use]
    pub fn resolve_source_id(&self) -> SourceId {
        match &self.source_id {
            Some(id) => id.clone(),
            None => SourceId::process(),
        }
    }
}

pub(crate) fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => parse_flag(&value).unwrap_or(default),
        Err(_) => default,
    }
}

pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
