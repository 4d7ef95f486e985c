use serde_json::{Value, json};

use super::*;
use crate::envelope::Envelope;

// =============================================================================
// Helpers
// =============================================================================

/// Transport that records payloads and can be switched to fail.
#[derive(Clone, Default)]
struct Wire {
    sent: Rc<RefCell<Vec<String>>>,
    fail: Rc<Cell<bool>>,
}

impl Transport for Wire {
    fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        if self.fail.get() {
            return Err(TransportError::Closed);
        }
        self.sent.borrow_mut().push(payload.to_owned());
        Ok(())
    }
}

impl Wire {
    fn envelopes(&self) -> Vec<Envelope> {
        self.sent
            .borrow()
            .iter()
            .map(|raw| match decode(raw).unwrap() {
                Decoded::Op(envelope) => envelope,
                other => panic!("sent a non-op payload: {other:?}"),
            })
            .collect()
    }
}

/// View whose content the test controls. Optionally reports every render
/// back as a local edit, the way a drawing surface's change hook does.
#[derive(Clone, Default)]
struct Canvas {
    shown: Rc<RefCell<Vec<Element>>>,
    renders: Rc<Cell<usize>>,
    echo_renders_to: Option<Rc<EventHub>>,
}

impl View for Canvas {
    fn snapshot(&self) -> Vec<Element> {
        self.shown.borrow().clone()
    }

    fn render(&mut self, children: &[Element]) {
        *self.shown.borrow_mut() = children.to_vec();
        self.renders.set(self.renders.get() + 1);
        if let Some(hub) = &self.echo_renders_to {
            hub.edits.emit(&LocalEdit::new(vec![set_x(0, 1)]));
        }
    }
}

impl Canvas {
    fn show(&self, children: Vec<Element>) {
        *self.shown.borrow_mut() = children;
    }
}

fn config(id: &str) -> SyncConfig {
    SyncConfig { send_snapshots: true, source_id: Some(SourceId::from(id)) }
}

fn el(id: &str) -> Element {
    Element::new(id, "geometry")
}

fn insert(id: &str) -> Value {
    json!({"type": "insert_node", "path": [0], "node": {"id": id, "type": "geometry"}})
}

fn set_x(index: usize, x: i64) -> Value {
    json!({"type": "set_node", "path": [index], "properties": {"x": x}})
}

fn selection() -> Value {
    json!({"type": "set_selection", "properties": {}, "newProperties": {}})
}

fn remote(source: &str, operations: Vec<Operation>, children: Option<Vec<Element>>) -> String {
    Envelope::new(SourceId::from(source), operations, children).encode().unwrap()
}

fn new_core(wire: &Wire, canvas: &Canvas) -> SessionCore<Wire, Canvas> {
    SessionCore::new(config("me"), wire.clone(), canvas.clone())
}

fn op_ids(envelope: &Envelope) -> Vec<&str> {
    envelope.operations.iter().filter_map(Operation::node_id).collect()
}

const DOWN: Pointer = Pointer::Down { on_surface: true };

// =============================================================================
// SessionCore: outbound
// =============================================================================

#[test]
fn stroke_sends_one_envelope_with_all_operations_in_order() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);

    core.on_pointer(DOWN);
    for id in ["a", "b", "c"] {
        core.on_local_edit(&LocalEdit::new(vec![insert(id)]));
    }
    assert!(wire.sent.borrow().is_empty());
    assert_eq!(core.pending(), 3);

    core.on_pointer(Pointer::Up);
    let envelopes = wire.envelopes();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(op_ids(&envelopes[0]), vec!["a", "b", "c"]);
    assert_eq!(core.stroke_state(), StrokeState::Idle);
}

#[test]
fn empty_stroke_sends_nothing() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);
    core.on_pointer(DOWN);
    core.on_pointer(Pointer::Up);
    assert!(wire.sent.borrow().is_empty());
    assert_eq!(core.stats().sent, 0);
}

#[test]
fn cancelled_stroke_still_flushes() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);
    core.on_pointer(DOWN);
    core.on_local_edit(&LocalEdit::new(vec![insert("a")]));
    core.on_pointer(Pointer::Cancel);
    assert_eq!(wire.envelopes().len(), 1);
}

#[test]
fn edit_outside_stroke_sends_immediately_with_fresh_snapshot() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);
    canvas.show(vec![el("a")]);
    core.on_local_edit(&LocalEdit::new(vec![selection(), insert("a")]));

    let envelopes = wire.envelopes();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].source_id, SourceId::from("me"));
    assert_eq!(envelopes[0].operations.len(), 1);
    assert_eq!(envelopes[0].children, Some(vec![el("a")]));
    assert_eq!(core.tree().children(), &[el("a")]);
}

#[test]
fn metadata_only_edit_sends_nothing() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);
    core.on_local_edit(&LocalEdit::new(vec![selection()]));
    assert!(wire.sent.borrow().is_empty());
}

#[test]
fn notification_children_take_precedence_over_view() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);
    canvas.show(vec![el("stale")]);
    core.on_local_edit(&LocalEdit::new(vec![insert("fresh")]).with_children(vec![el("fresh")]));
    assert_eq!(wire.envelopes()[0].children, Some(vec![el("fresh")]));
}

#[test]
fn snapshots_can_be_turned_off() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let config = SyncConfig { send_snapshots: false, ..config("me") };
    let mut core = SessionCore::new(config, wire.clone(), canvas.clone());
    canvas.show(vec![el("a")]);
    core.on_local_edit(&LocalEdit::new(vec![insert("a")]));
    assert!(wire.envelopes()[0].children.is_none());
}

#[test]
fn sent_operations_round_trip() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);
    let raw = vec![insert("a"), set_x(0, 4), json!({"type": "remove_node", "path": [0]})];
    let expected = crate::op::structural(&raw);
    core.on_local_edit(&LocalEdit::new(raw));
    assert_eq!(wire.envelopes()[0].operations, expected);
}

#[test]
fn send_failure_is_counted_and_session_continues() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);
    wire.fail.set(true);
    core.on_local_edit(&LocalEdit::new(vec![insert("a")]));
    assert_eq!(core.stats().send_failures, 1);
    assert_eq!(core.stats().sent, 0);

    wire.fail.set(false);
    core.on_local_edit(&LocalEdit::new(vec![insert("b")]));
    assert_eq!(core.stats().sent, 1);
    assert_eq!(op_ids(&wire.envelopes()[0]), vec!["b"]);
}

// =============================================================================
// SessionCore: inbound
// =============================================================================

#[test]
fn own_envelope_is_never_applied() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);
    let payload = remote("me", vec![Operation::insert(&[0], el("x"))], Some(vec![el("x")]));

    assert_eq!(core.on_remote(&payload), Received::Echo);
    assert!(core.tree().is_empty());
    assert_eq!(canvas.renders.get(), 0);
    assert_eq!(core.stats().echoes_dropped, 1);
    assert_eq!(core.stats().applied, 0);
}

#[test]
fn remote_insert_applied_twice_yields_one_element() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);
    let payload = remote("peer", vec![Operation::insert(&[0], el("a"))], None);

    core.on_remote(&payload);
    let second = core.on_remote(&payload);
    assert_eq!(second, Received::Applied { change: Change::Replayed { applied: 0, skipped: 1 }, skipped: 1 });
    assert_eq!(core.tree().iter().filter(|e| e.id == "a").count(), 1);
    assert_eq!(canvas.renders.get(), 1);
}

#[test]
fn remote_snapshot_wins_over_operations() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    canvas.show(vec![el("a"), el("b")]);
    let mut core = new_core(&wire, &canvas);
    let snapshot = vec![el("b"), el("s")];
    let payload = remote("peer", vec![Operation::remove(&[0], Some(el("b")))], Some(snapshot.clone()));

    core.on_remote(&payload);
    assert_eq!(core.tree().children(), snapshot.as_slice());
    assert_eq!(*canvas.shown.borrow(), snapshot);
}

#[test]
fn remote_partial_merge_keeps_null_keys() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    canvas.show(vec![el("n").with_property("x", 1).with_property("y", 2).with_property("z", 3)]);
    let mut core = new_core(&wire, &canvas);
    let props = json!({"x": 5, "y": null}).as_object().cloned().unwrap();
    core.on_remote(&remote("peer", vec![Operation::set_properties(&[0], props)], None));

    let n = core.tree().find("n").unwrap();
    assert_eq!(n.property("x"), Some(&json!(5)));
    assert_eq!(n.property("y"), Some(&json!(2)));
    assert_eq!(n.property("z"), Some(&json!(3)));
}

#[test]
fn malformed_and_foreign_payloads_are_dropped() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut core = new_core(&wire, &canvas);
    assert_eq!(core.on_remote("{oops"), Received::Malformed);
    assert_eq!(core.on_remote(r#"{"no_kind": true}"#), Received::Malformed);
    assert_eq!(core.on_remote(r#"{"kind": "cursor"}"#), Received::Ignored { kind: "cursor".to_owned() });

    let stats = core.stats();
    assert_eq!(stats.malformed_dropped, 2);
    assert_eq!(stats.ignored_kinds, 1);
    assert_eq!(stats.applied, 0);
    assert_eq!(canvas.renders.get(), 0);
}

#[test]
fn unchanged_snapshot_does_not_render() {
    let (wire, canvas) = (Wire::default(), Canvas::default());
    canvas.show(vec![el("a")]);
    let mut core = new_core(&wire, &canvas);
    core.on_remote(&remote("peer", Vec::new(), Some(vec![el("a")])));
    assert_eq!(canvas.renders.get(), 0);
    assert_eq!(core.stats().applied, 1);
}

// =============================================================================
// SyncSession: bindings
// =============================================================================

#[test]
fn attached_session_follows_hub_events() {
    let hub = EventHub::new();
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut session = SyncSession::new(config("me"), wire.clone(), canvas.clone());
    session.attach(&hub);
    assert!(session.is_attached());

    hub.pointer.emit(&DOWN);
    hub.edits.emit(&LocalEdit::new(vec![insert("a")]));
    hub.edits.emit(&LocalEdit::new(vec![insert("b")]));
    assert!(wire.sent.borrow().is_empty());
    hub.pointer.emit(&Pointer::Up);
    assert_eq!(wire.envelopes().len(), 1);

    hub.remote.emit(&remote("peer", Vec::new(), Some(vec![el("r")])));
    assert_eq!(session.tree().children(), &[el("r")]);
    assert_eq!(session.stats().applied, 1);
}

#[test]
fn render_feedback_is_not_sent_back_out() {
    let hub = Rc::new(EventHub::new());
    let wire = Wire::default();
    let canvas = Canvas { echo_renders_to: Some(Rc::clone(&hub)), ..Canvas::default() };
    let mut session = SyncSession::new(config("me"), wire.clone(), canvas.clone());
    session.attach(&hub);

    hub.remote.emit(&remote("peer", Vec::new(), Some(vec![el("a")])));

    assert_eq!(canvas.renders.get(), 1);
    assert!(wire.sent.borrow().is_empty());
    assert_eq!(session.stats().suppressed_edits, 1);

    // Edits after the apply step are local again.
    hub.edits.emit(&LocalEdit::new(vec![insert("b")]));
    assert_eq!(wire.envelopes().len(), 1);
}

#[test]
fn attaching_twice_does_not_duplicate_handlers() {
    let hub = EventHub::new();
    let wire = Wire::default();
    let mut session = SyncSession::new(config("me"), wire.clone(), Canvas::default());
    session.attach(&hub);
    session.attach(&hub);
    assert_eq!(hub.edits.len(), 1);
    assert_eq!(hub.remote.len(), 1);
    assert_eq!(hub.pointer.len(), 1);

    hub.edits.emit(&LocalEdit::new(vec![insert("a")]));
    assert_eq!(wire.sent.borrow().len(), 1);
}

#[test]
fn detach_unregisters_all_bindings() {
    let hub = EventHub::new();
    let wire = Wire::default();
    let mut session = SyncSession::new(config("me"), wire.clone(), Canvas::default());
    session.attach(&hub);
    session.detach();
    assert!(!session.is_attached());
    assert!(hub.edits.is_empty() && hub.remote.is_empty() && hub.pointer.is_empty());

    hub.edits.emit(&LocalEdit::new(vec![insert("a")]));
    assert!(wire.sent.borrow().is_empty());
}

#[test]
fn dropping_session_unregisters_all_bindings() {
    let hub = EventHub::new();
    {
        let mut session = SyncSession::new(config("me"), Wire::default(), Canvas::default());
        session.attach(&hub);
        assert_eq!(hub.remote.len(), 1);
    }
    assert!(hub.edits.is_empty() && hub.remote.is_empty() && hub.pointer.is_empty());
}

#[test]
fn echo_through_hub_is_dropped() {
    let hub = EventHub::new();
    let (wire, canvas) = (Wire::default(), Canvas::default());
    let mut session = SyncSession::new(config("me"), wire, canvas.clone());
    session.attach(&hub);
    hub.remote.emit(&remote("me", Vec::new(), Some(vec![el("x")])));
    assert!(session.tree().is_empty());
    assert_eq!(canvas.renders.get(), 0);
    assert_eq!(session.stats().echoes_dropped, 1);
    assert_eq!(session.source_id(), SourceId::from("me"));
}
