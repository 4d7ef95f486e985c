//! Sync session: the orchestrator that wires transport, view and collector.
//!
//! DESIGN
//! ======
//! [`SessionCore`] owns the one authoritative [`Tree`] together with the
//! stroke collector and the echo suppressor, and talks to the outside world
//! only through the [`Transport`] and [`View`] capabilities. It has no event
//! plumbing of its own, so it can be driven directly in tests.
//!
//! [`SyncSession`] wraps a core and binds it to an [`EventHub`]:
//! - remote payload -> echo check -> reconcile -> render
//! - local edit -> collector -> send (when not in a stroke)
//! - pointer event -> stroke transition -> flush
//!
//! Attaching again replaces the previous bindings, and detaching or dropping
//! the session unregisters all three, so a session never handles an event
//! twice.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here fails outward. Send failures, malformed payloads and
//! inapplicable operations are logged and counted in [`SessionStats`].
//! Delivery is at most once: a failed send is not retried, and the next
//! snapshot-carrying envelope heals the peer.
//!
//! Rendering may make the view report the rendered change as a local edit,
//! synchronously. Those notifications are suppressed while a remote batch is
//! being applied; forwarding them would send remote edits back out as if
//! they were local.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::collector::{Collected, EditCollector, Pointer, StrokeState};
use crate::config::SyncConfig;
use crate::echo::{EchoSuppressor, SourceId, Verdict};
use crate::envelope::{Decoded, Envelope, decode};
use crate::events::{EventHub, LocalEdit, Subscription};
use crate::op::Operation;
use crate::reconcile::{Change, reconcile_envelope};
use crate::tree::{Element, Tree};

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Error returned by [`Transport::send`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying channel is gone.
    #[error("transport closed")]
    Closed,
    /// The transport refused the payload.
    #[error("transport rejected payload: {0}")]
    Rejected(String),
}

/// Outbound half of the message channel between board instances.
pub trait Transport {
    /// Hand one encoded envelope to the transport. Must not block.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the payload could not be queued.
    fn send(&mut self, payload: &str) -> Result<(), TransportError>;
}

/// The drawing surface as seen by the session.
pub trait View {
    /// The freshest tree the surface knows about.
    fn snapshot(&self) -> Vec<Element>;

    /// Replace what the surface shows with `children`.
    fn render(&mut self, children: &[Element]);
}

// =============================================================================
// STATS
// =============================================================================

/// Running counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Envelopes handed to the transport successfully.
    pub sent: u64,
    /// Envelopes that failed to encode or send.
    pub send_failures: u64,
    /// Remote envelopes that reached reconciliation.
    pub applied: u64,
    /// Remote envelopes dropped because they carried the local identity.
    pub echoes_dropped: u64,
    /// Remote payloads that failed to decode.
    pub malformed_dropped: u64,
    /// Remote payloads of a kind other than `"op"`.
    pub ignored_kinds: u64,
    /// Local edit notifications suppressed while a remote batch was applied.
    pub suppressed_edits: u64,
}

/// What happened to one remote payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Reconciled into the tree.
    Applied { change: Change, skipped: usize },
    /// Carried the local identity; dropped before reconciliation.
    Echo,
    /// Well-formed, but not an `"op"` envelope.
    Ignored { kind: String },
    /// Could not be decoded.
    Malformed,
}

// =============================================================================
// CORE
// =============================================================================

/// Session state and logic, independent of how events are delivered.
pub struct SessionCore<T, V> {
    tree: Tree,
    collector: EditCollector,
    echo: EchoSuppressor,
    config: SyncConfig,
    stats: SessionStats,
    transport: T,
    view: V,
}

impl<T: Transport, V: View> SessionCore<T, V> {
    /// Start from whatever the view currently shows.
    #[must_use]
    pub fn new(config: SyncConfig, transport: T, view: V) -> Self {
        let source_id = config.resolve_source_id();
        let tree = Tree::new(view.snapshot());
        info!(%source_id, elements = tree.len(), send_snapshots = config.send_snapshots, "session: started");
        Self {
            tree,
            collector: EditCollector::new(),
            echo: EchoSuppressor::new(source_id),
            config,
            stats: SessionStats::default(),
            transport,
            view,
        }
    }

    // --- Accessors ---

    #[must_use]
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    #[must_use]
    pub fn source_id(&self) -> &SourceId {
        self.echo.local()
    }

    #[must_use]
    pub fn stroke_state(&self) -> StrokeState {
        self.collector.state()
    }

    /// Operations buffered for the current stroke.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.collector.pending()
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats { echoes_dropped: self.echo.dropped(), ..self.stats }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[must_use]
    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    // --- Inbound ---

    /// Handle one raw payload from the transport.
    pub fn on_remote(&mut self, raw: &str) -> Received {
        let envelope = match decode(raw) {
            Ok(Decoded::Op(envelope)) => envelope,
            Ok(Decoded::Ignored { kind }) => {
                self.stats.ignored_kinds += 1;
                debug!(%kind, "session: non-op payload ignored");
                return Received::Ignored { kind };
            }
            Err(e) => {
                self.stats.malformed_dropped += 1;
                warn!(error = %e, bytes = raw.len(), "session: malformed payload dropped");
                return Received::Malformed;
            }
        };

        if self.echo.admit(&envelope.source_id) == Verdict::Echo {
            debug!(source_id = %envelope.source_id, ops = envelope.operations.len(), "session: echo dropped");
            return Received::Echo;
        }

        let summary = envelope.summary();
        let result = reconcile_envelope(&self.tree, &envelope);
        let render = result.render_needed();
        let change = result.change;
        let skipped = result.skipped.len();
        self.tree = result.tree;
        self.stats.applied += 1;
        info!(
            source_id = %summary.source_id,
            ops = summary.ops,
            children = ?summary.children,
            ?change,
            "session: remote batch applied"
        );
        if render {
            self.view.render(self.tree.children());
        }
        Received::Applied { change, skipped }
    }

    // --- Outbound ---

    /// Handle one edit notification from the view.
    pub fn on_local_edit(&mut self, edit: &LocalEdit) {
        self.refresh(edit.children.clone());
        match self.collector.on_edit(&edit.operations) {
            Collected::Send(ops) => self.send(ops),
            Collected::Buffered { pending } => debug!(pending, "session: edit buffered mid-stroke"),
            Collected::Nothing => {}
        }
    }

    /// Handle one pointer lifecycle event.
    pub fn on_pointer(&mut self, event: Pointer) {
        if let Collected::Send(ops) = self.collector.on_pointer(event) {
            self.refresh(None);
            info!(ops = ops.len(), ?event, "session: stroke flushed");
            self.send(ops);
        }
    }

    /// Adopt the freshest local tree: the one carried by the notification, else the view's.
    fn refresh(&mut self, children: Option<Vec<Element>>) {
        let children = match children {
            Some(children) => children,
            None => self.view.snapshot(),
        };
        self.tree = Tree::new(children);
    }

    fn send(&mut self, operations: Vec<Operation>) {
        let snapshot = self.config.send_snapshots.then(|| self.tree.children().to_vec());
        let envelope = Envelope::new(self.echo.local().clone(), operations, snapshot);
        let summary = envelope.summary();
        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.send_failures += 1;
                warn!(error = %e, ops = summary.ops, "session: envelope encode failed");
                return;
            }
        };
        match self.transport.send(&payload) {
            Ok(()) => {
                self.stats.sent += 1;
                info!(
                    source_id = %summary.source_id,
                    ops = summary.ops,
                    children = ?summary.children,
                    "session: envelope sent"
                );
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!(error = %e, ops = summary.ops, "session: send failed");
            }
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

struct Bindings {
    _remote: Subscription,
    _edits: Subscription,
    _pointer: Subscription,
}

#[derive(Default)]
struct ApplyGuard {
    applying: Cell<bool>,
    suppressed: Cell<u64>,
}

impl ApplyGuard {
    fn suppress(&self) {
        self.suppressed.set(self.suppressed.get() + 1);
    }
}

/// A [`SessionCore`] bound to an [`EventHub`].
pub struct SyncSession<T, V> {
    core: Rc<RefCell<SessionCore<T, V>>>,
    guard: Rc<ApplyGuard>,
    bindings: Option<Bindings>,
}

impl<T: Transport + 'static, V: View + 'static> SyncSession<T, V> {
    #[must_use]
    pub fn new(config: SyncConfig, transport: T, view: V) -> Self {
        Self {
            core: Rc::new(RefCell::new(SessionCore::new(config, transport, view))),
            guard: Rc::new(ApplyGuard::default()),
            bindings: None,
        }
    }

    /// Bind to `hub`. Any previous bindings are released first.
    pub fn attach(&mut self, hub: &EventHub) {
        if self.bindings.take().is_some() {
            debug!("session: rebinding, previous handlers released");
        }

        let core = Rc::clone(&self.core);
        let guard = Rc::clone(&self.guard);
        let remote = hub.remote.subscribe(move |raw: &String| {
            let Ok(mut core) = core.try_borrow_mut() else {
                warn!("session: remote payload during dispatch dropped");
                return;
            };
            guard.applying.set(true);
            core.on_remote(raw);
            guard.applying.set(false);
        });

        let core = Rc::clone(&self.core);
        let guard = Rc::clone(&self.guard);
        let edits = hub.edits.subscribe(move |edit: &LocalEdit| {
            if guard.applying.get() {
                guard.suppress();
                debug!(ops = edit.operations.len(), "session: edit during remote apply suppressed");
                return;
            }
            match core.try_borrow_mut() {
                Ok(mut core) => core.on_local_edit(edit),
                Err(_) => {
                    guard.suppress();
                    debug!(ops = edit.operations.len(), "session: nested edit suppressed");
                }
            }
        });

        let core = Rc::clone(&self.core);
        let pointer = hub.pointer.subscribe(move |event: &Pointer| match core.try_borrow_mut() {
            Ok(mut core) => core.on_pointer(*event),
            Err(_) => warn!(?event, "session: pointer event during dispatch dropped"),
        });

        self.bindings = Some(Bindings { _remote: remote, _edits: edits, _pointer: pointer });
        debug!("session: attached");
    }

    /// Release all bindings. Safe to call when not attached.
    pub fn detach(&mut self) {
        if self.bindings.take().is_some() {
            debug!("session: detached");
        }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.bindings.is_some()
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats { suppressed_edits: self.guard.suppressed.get(), ..self.core.borrow().stats() }
    }

    /// A copy of the authoritative tree.
    #[must_use]
    pub fn tree(&self) -> Tree {
        self.core.borrow().tree().clone()
    }

    #[must_use]
    pub fn source_id(&self) -> SourceId {
        self.core.borrow().source_id().clone()
    }

    /// Run `f` against the core, for inspection outside event delivery.
    pub fn with_core<R>(&self, f: impl FnOnce(&SessionCore<T, V>) -> R) -> R {
        f(&self.core.borrow())
    }

    /// Run `f` against the core mutably, outside event delivery.
    pub fn with_core_mut<R>(&self, f: impl FnOnce(&mut SessionCore<T, V>) -> R) -> R {
        f(&mut self.core.borrow_mut())
    }
}
