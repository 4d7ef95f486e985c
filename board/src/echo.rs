//! Echo suppression: process identity and the self-origin filter.
//!
//! Every outgoing envelope is tagged with the process's [`SourceId`]. A
//! transport may reflect envelopes back to their sender (broadcast
//! topologies do), so incoming envelopes are checked against the local
//! identity before reconciliation and dropped when they match.

#[cfg(test)]
#[path = "echo_test.rs"]
mod echo_test;

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Random per-process token identifying the origin of an envelope.
///
/// Stable for the life of the process and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

static PROCESS_SOURCE_ID: OnceLock<SourceId> = OnceLock::new();

impl SourceId {
    /// Wrap an existing token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// A fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The identity of this process, generated on first use.
    #[must_use]
    pub fn process() -> Self {
        PROCESS_SOURCE_ID.get_or_init(Self::generate).clone()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Legacy peers may omit `source_id`; such envelopes decode with an empty one.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(token: &str) -> Self {
        Self(token.to_owned())
    }
}

/// Outcome of checking an incoming envelope's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Originated elsewhere; apply it.
    Accept,
    /// Originated here and came back; drop it.
    Echo,
}

/// Drops envelopes that carry the local identity.
#[derive(Debug, Clone)]
pub struct EchoSuppressor {
    local: SourceId,
    dropped: u64,
}

impl EchoSuppressor {
    #[must_use]
    pub fn new(local: SourceId) -> Self {
        Self { local, dropped: 0 }
    }

    /// The identity stamped on outgoing envelopes.
    #[must_use]
    pub fn local(&self) -> &SourceId {
        &self.local
    }

    /// Check an incoming envelope's origin.
    pub fn admit(&mut self, origin: &SourceId) -> Verdict {
        if *origin == self.local {
            self.dropped += 1;
            return Verdict::Echo;
        }
        Verdict::Accept
    }

    /// Number of echoes dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
