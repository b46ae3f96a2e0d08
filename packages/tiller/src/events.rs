//! Lifecycle event bus: post-mutation, error, and teardown facts.
//!
//! Distinct from plain state subscription (see the schedule module):
//! lifecycle listeners observe *what happened*, with patches and operation
//! tags, synchronously and in subscription order.
//!
//! # Zero Cost When Unused
//!
//! The listener registry is allocated lazily on the first subscription and
//! dropped back to `None` when the last listener across all event kinds is
//! removed. A store that never registers a lifecycle listener never pays for
//! the registry.
//!
//! # Isolation
//!
//! A panicking listener is caught and logged; sibling listeners still run
//! and the already-committed transition is unaffected.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::core::{MutationId, Operation};
use crate::error::StoreError;
use crate::patch::Patch;

// =============================================================================
// Event Payloads
// =============================================================================

/// Payload of the post-mutation event.
///
/// Always describes the transition actually performed: for an undo, the
/// `forward` field carries the patches that were just applied (the
/// snapshot's inverse list).
pub struct AfterMutate<'a, T> {
    /// Identity of the transition (matches the journal snapshot).
    pub id: MutationId,
    /// The state after the transition.
    pub state: &'a T,
    /// Patches describing the transition just performed.
    pub forward: &'a [Patch],
    /// Patches that would reverse it.
    pub inverse: &'a [Patch],
    /// Description attached to the transition, if any.
    pub description: Option<&'a str>,
    /// The operation kind.
    pub operation: Operation,
}

impl<T> Clone for AfterMutate<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AfterMutate<'_, T> {}

/// Payload of the error event.
#[derive(Clone, Copy)]
pub struct ErrorFact<'a> {
    /// The classified failure.
    pub error: &'a StoreError,
    /// The operation that failed (or overran its budget).
    pub operation: Operation,
}

// =============================================================================
// Handles
// =============================================================================

/// The three lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A transition committed.
    AfterMutate,
    /// An operation failed or a diagnostic fired.
    Error,
    /// The store was torn down.
    Destroy,
}

/// Handle returned from a lifecycle subscription; pass to `off` to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    kind: EventKind,
    id: u64,
}

// =============================================================================
// Registry
// =============================================================================

type AfterMutateFn<T> = Box<dyn FnMut(AfterMutate<'_, T>)>;
type ErrorFn = Box<dyn FnMut(ErrorFact<'_>)>;
type DestroyFn<T> = Box<dyn FnMut(&T)>;

struct Registry<T> {
    next_id: u64,
    after_mutate: Vec<(u64, AfterMutateFn<T>)>,
    error: Vec<(u64, ErrorFn)>,
    destroy: Vec<(u64, DestroyFn<T>)>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            next_id: 0,
            after_mutate: Vec::new(),
            error: Vec::new(),
            destroy: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.after_mutate.is_empty() && self.error.is_empty() && self.destroy.is_empty()
    }

    fn len(&self) -> usize {
        self.after_mutate.len() + self.error.len() + self.destroy.len()
    }
}

/// Lazily-allocated lifecycle listener registry.
pub(crate) struct LifecycleBus<T> {
    registry: Option<Box<Registry<T>>>,
}

impl<T> LifecycleBus<T> {
    pub fn new() -> Self {
        Self { registry: None }
    }

    fn registry_mut(&mut self) -> &mut Registry<T> {
        self.registry.get_or_insert_with(|| Box::new(Registry::new()))
    }

    fn next_handle(&mut self, kind: EventKind) -> ListenerHandle {
        let reg = self.registry_mut();
        let id = reg.next_id;
        reg.next_id += 1;
        ListenerHandle { kind, id }
    }

    pub fn on_after_mutate(&mut self, listener: AfterMutateFn<T>) -> ListenerHandle {
        let handle = self.next_handle(EventKind::AfterMutate);
        self.registry_mut().after_mutate.push((handle.id, listener));
        handle
    }

    pub fn on_error(&mut self, listener: ErrorFn) -> ListenerHandle {
        let handle = self.next_handle(EventKind::Error);
        self.registry_mut().error.push((handle.id, listener));
        handle
    }

    pub fn on_destroy(&mut self, listener: DestroyFn<T>) -> ListenerHandle {
        let handle = self.next_handle(EventKind::Destroy);
        self.registry_mut().destroy.push((handle.id, listener));
        handle
    }

    /// Remove a listener. Frees the registry when it was the last one.
    pub fn off(&mut self, handle: ListenerHandle) -> bool {
        let Some(reg) = self.registry.as_deref_mut() else {
            return false;
        };
        let removed = match handle.kind {
            EventKind::AfterMutate => {
                let before = reg.after_mutate.len();
                reg.after_mutate.retain(|(id, _)| *id != handle.id);
                reg.after_mutate.len() != before
            }
            EventKind::Error => {
                let before = reg.error.len();
                reg.error.retain(|(id, _)| *id != handle.id);
                reg.error.len() != before
            }
            EventKind::Destroy => {
                let before = reg.destroy.len();
                reg.destroy.retain(|(id, _)| *id != handle.id);
                reg.destroy.len() != before
            }
        };
        if reg.is_empty() {
            self.registry = None;
        }
        removed
    }

    pub fn emit_after_mutate(&mut self, fact: AfterMutate<'_, T>) {
        let Some(reg) = self.registry.as_deref_mut() else {
            return;
        };
        for (_, listener) in reg.after_mutate.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(fact))).is_err() {
                warn!(event = "after_mutate", "lifecycle listener panicked; siblings continue");
            }
        }
    }

    pub fn emit_error(&mut self, fact: ErrorFact<'_>) {
        let Some(reg) = self.registry.as_deref_mut() else {
            return;
        };
        for (_, listener) in reg.error.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(fact))).is_err() {
                warn!(event = "error", "lifecycle listener panicked; siblings continue");
            }
        }
    }

    pub fn emit_destroy(&mut self, final_state: &T) {
        let Some(reg) = self.registry.as_deref_mut() else {
            return;
        };
        for (_, listener) in reg.destroy.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(final_state))).is_err() {
                warn!(event = "destroy", "lifecycle listener panicked; siblings continue");
            }
        }
    }

    /// Drop the registry wholesale (teardown).
    pub fn release(&mut self) {
        self.registry = None;
    }

    /// Whether the registry is currently allocated.
    pub fn is_allocated(&self) -> bool {
        self.registry.is_some()
    }

    /// Total listener count across all kinds.
    pub fn listener_count(&self) -> usize {
        self.registry.as_deref().map_or(0, Registry::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fact<'a>(state: &'a i32, error: &'a StoreError) -> (AfterMutate<'a, i32>, ErrorFact<'a>) {
        (
            AfterMutate {
                id: MutationId::new(),
                state,
                forward: &[],
                inverse: &[],
                description: None,
                operation: Operation::Mutate,
            },
            ErrorFact {
                error,
                operation: Operation::Mutate,
            },
        )
    }

    #[test]
    fn test_registry_is_lazy() {
        let bus: LifecycleBus<i32> = LifecycleBus::new();
        assert!(!bus.is_allocated());
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_emit_with_no_registry_is_noop() {
        let mut bus: LifecycleBus<i32> = LifecycleBus::new();
        let state = 1;
        let err = StoreError::validation("x");
        let (am, ef) = fact(&state, &err);
        bus.emit_after_mutate(am);
        bus.emit_error(ef);
        bus.emit_destroy(&state);
        assert!(!bus.is_allocated());
    }

    #[test]
    fn test_registry_freed_when_last_listener_removed() {
        let mut bus: LifecycleBus<i32> = LifecycleBus::new();
        let h1 = bus.on_after_mutate(Box::new(|_| {}));
        let h2 = bus.on_error(Box::new(|_| {}));
        assert!(bus.is_allocated());
        assert_eq!(bus.listener_count(), 2);

        assert!(bus.off(h1));
        assert!(bus.is_allocated());
        assert!(bus.off(h2));
        assert!(!bus.is_allocated());

        // Removing again reports false.
        assert!(!bus.off(h2));
    }

    #[test]
    fn test_listeners_run_in_subscription_order() {
        let mut bus: LifecycleBus<i32> = LifecycleBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.on_after_mutate(Box::new(move |_| order.borrow_mut().push(tag)));
        }
        let state = 1;
        let err = StoreError::validation("x");
        let (am, _) = fact(&state, &err);
        bus.emit_after_mutate(am);
        assert_eq!(order.borrow().as_slice(), ["first", "second", "third"]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_siblings() {
        let mut bus: LifecycleBus<i32> = LifecycleBus::new();
        let reached = Rc::new(RefCell::new(false));
        bus.on_destroy(Box::new(|_| panic!("listener bug")));
        {
            let reached = reached.clone();
            bus.on_destroy(Box::new(move |_| *reached.borrow_mut() = true));
        }
        bus.emit_destroy(&42);
        assert!(*reached.borrow());
    }

    #[test]
    fn test_error_fact_carries_operation() {
        let mut bus: LifecycleBus<i32> = LifecycleBus::new();
        let seen = Rc::new(RefCell::new(None));
        {
            let seen = seen.clone();
            bus.on_error(Box::new(move |fact| {
                *seen.borrow_mut() = Some(fact.operation);
            }));
        }
        let err = StoreError::Destroyed;
        bus.emit_error(ErrorFact {
            error: &err,
            operation: Operation::Undo,
        });
        assert_eq!(*seen.borrow(), Some(Operation::Undo));
    }

    #[test]
    fn test_release_drops_everything() {
        let mut bus: LifecycleBus<i32> = LifecycleBus::new();
        bus.on_error(Box::new(|_| {}));
        bus.release();
        assert!(!bus.is_allocated());
    }
}
