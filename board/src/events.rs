//! Event sources the sync session binds to.
//!
//! Three sources feed a session: payloads arriving from the transport, edit
//! notifications from the drawing surface, and pointer lifecycle events.
//! Each is a [`Listeners`] registry. Subscribing returns a [`Subscription`]
//! handle that unregisters its handler when dropped, so a binding can never
//! outlive its owner and re-binding cannot leave a stale duplicate behind.
//!
//! Everything here is single-threaded (`Rc`), matching the cooperative,
//! callback-driven model of the host: handlers run to completion one at a
//! time on the thread that emits.

#[cfg(test)]
#[path = "events_test.rs"]
mod events_test;

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collector::Pointer;
use crate::tree::Element;

type Handler<E> = Rc<dyn Fn(&E)>;

/// One edit notification from the drawing surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalEdit {
    /// Raw operations as reported by the surface, structural or not.
    #[serde(default)]
    pub operations: Vec<Value>,
    /// The surface's tree after the edit, when the notification carries it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Element>>,
}

impl LocalEdit {
    #[must_use]
    pub fn new(operations: Vec<Value>) -> Self {
        Self { operations, children: None }
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<Element>) -> Self {
        self.children = Some(children);
        self
    }
}

// =============================================================================
// LISTENERS
// =============================================================================

/// Registry of handlers for one event type.
pub struct Listeners<E> {
    handlers: Rc<RefCell<Vec<Handler<E>>>>,
}

impl<E: 'static> Listeners<E> {
    #[must_use]
    pub fn new() -> Self {
        Self { handlers: Rc::new(RefCell::new(Vec::new())) }
    }

    /// Register a handler. It stays registered until the returned handle is dropped.
    pub fn subscribe(&self, handler: impl Fn(&E) + 'static) -> Subscription {
        let handler: Handler<E> = Rc::new(handler);
        self.handlers.borrow_mut().push(Rc::clone(&handler));
        let registry = Rc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry
                    .borrow_mut()
                    .retain(|item| !Rc::ptr_eq(item, &handler));
            }
        })
    }

    /// Deliver an event to every handler registered at the time of the call.
    /// Returns how many handlers ran.
    pub fn emit(&self, event: &E) -> usize {
        let handlers = self.handlers.borrow().clone();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }
}

impl<E: 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration handle. Dropping it unregisters the handler.
#[must_use = "dropping a Subscription unregisters its handler immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    /// Unregister now. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

// =============================================================================
// HUB
// =============================================================================

/// The three event sources a session binds to.
#[derive(Default)]
pub struct EventHub {
    /// Raw payloads received from the transport.
    pub remote: Listeners<String>,
    /// Edit notifications from the drawing surface.
    pub edits: Listeners<LocalEdit>,
    /// Pointer lifecycle events.
    pub pointer: Listeners<Pointer>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
