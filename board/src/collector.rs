//! Local edit collection: stroke segmentation of the outgoing edit feed.
//!
//! A drag produces one edit notification per pointer move. Sending each one
//! would flood the transport and make remote boards stutter, so edits made
//! during a stroke (pointer-down to the next pointer-up or cancel) are
//! buffered and leave as a single batch when the stroke ends. Edits made
//! outside a stroke (keyboard, toolbar, paste) are sent immediately.
//!
//! The collector is a pure state machine: it never sends anything itself.
//! Each handler returns a [`Collected`] telling the caller whether a batch is
//! ready. Operations accepted into the buffer are never discarded; a cancel
//! flushes exactly like a release.

#[cfg(test)]
#[path = "collector_test.rs"]
mod collector_test;

use serde_json::Value;
use tracing::debug;

use crate::op::{Operation, structural};

/// Pointer lifecycle events that delimit strokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    /// Pointer pressed. Only presses on the board surface start a stroke.
    Down { on_surface: bool },
    /// Pointer released anywhere.
    Up,
    /// Pointer gesture cancelled by the platform. Treated exactly like `Up`.
    Cancel,
}

/// Whether a stroke is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrokeState {
    /// No stroke; edits are sent immediately.
    #[default]
    Idle,
    /// Between pointer-down and pointer-up; edits are buffered.
    InStroke,
}

/// What the caller should do after feeding an event to the collector.
#[derive(Debug, Clone, PartialEq)]
pub enum Collected {
    /// Nothing to send.
    Nothing,
    /// Operations were appended to the stroke buffer.
    Buffered { pending: usize },
    /// Send these operations, in order, as one envelope.
    Send(Vec<Operation>),
}

/// Groups locally observed operations into outgoing batches.
#[derive(Debug, Default)]
pub struct EditCollector {
    state: StrokeState,
    buffer: Vec<Operation>,
}

impl EditCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> StrokeState {
        self.state
    }

    /// Operations waiting for the current stroke to end.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Advance the stroke state machine.
    pub fn on_pointer(&mut self, event: Pointer) -> Collected {
        match event {
            Pointer::Down { on_surface: false } => Collected::Nothing,
            Pointer::Down { on_surface: true } => {
                // A second press mid-stroke (multi-touch) must not lose what was buffered.
                let carried = std::mem::take(&mut self.buffer);
                self.state = StrokeState::InStroke;
                debug!(carried = carried.len(), "collector: stroke started");
                if carried.is_empty() { Collected::Nothing } else { Collected::Send(carried) }
            }
            Pointer::Up | Pointer::Cancel => {
                if self.state == StrokeState::Idle {
                    return Collected::Nothing;
                }
                self.state = StrokeState::Idle;
                let ops = std::mem::take(&mut self.buffer);
                debug!(ops = ops.len(), ?event, "collector: stroke ended");
                if ops.is_empty() { Collected::Nothing } else { Collected::Send(ops) }
            }
        }
    }

    /// Feed one raw edit notification. Non-structural operations are dropped.
    pub fn on_edit(&mut self, raw: &[Value]) -> Collected {
        self.on_operations(structural(raw))
    }

    /// Feed already-classified structural operations.
    pub fn on_operations(&mut self, ops: Vec<Operation>) -> Collected {
        if ops.is_empty() {
            return Collected::Nothing;
        }
        match self.state {
            StrokeState::InStroke => {
                self.buffer.extend(ops);
                Collected::Buffered { pending: self.buffer.len() }
            }
            StrokeState::Idle => Collected::Send(ops),
        }
    }
}
