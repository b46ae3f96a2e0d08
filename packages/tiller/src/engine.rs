//! The store engine: single-writer orchestration of the whole pipeline.
//!
//! ```text
//!                 ┌───────────────────────────────────────────┐
//!                 │                 Store<T>                  │
//!                 │                                           │
//!   mutate ──────▶│  middleware chain ─▶ recipe ─▶ diff       │
//!                 │        │                        │         │
//!                 │        ▼                        ▼         │
//!                 │  validation ◀── candidate   patch pair    │
//!                 │        │                        │         │
//!                 │        ▼                        ▼         │
//!                 │  commit (state + mirror)    journal       │
//!                 │        │                                  │
//!                 │        ├──▶ lifecycle events (sync)       │
//!                 │        └──▶ debounced subscribers         │
//!                 └───────────────────────────────────────────┘
//! ```
//!
//! The engine keeps two representations of the same state: the typed value
//! `T` handed to observers, and a canonical JSON mirror that recipes and
//! patches operate on. Patches are always applied to the mirror, never to a
//! re-serialization of `T`, so undo/redo replay is bit-identical regardless
//! of how `T` round-trips through serde.
//!
//! # Single Writer
//!
//! Every mutating operation takes `&mut self`. There is no interior locking
//! and no cross-thread sharing; embed the store in whatever synchronization
//! the host application already has.
//!
//! # Failure Atomicity
//!
//! Recipes and middleware run against a forked draft. Any failure (recipe
//! error, dropped chain, deserialization, validation) aborts before the
//! commit point, leaving state, mirror, and journal exactly as they were.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::codec::{PatchCodec, Produced, StructuralCodec};
use crate::core::{MutationContext, MutationId, Operation, Recipe};
use crate::error::StoreError;
use crate::events::{AfterMutate, ErrorFact, LifecycleBus, ListenerHandle};
use crate::journal::{HistoryInfo, Journal, Snapshot, DEFAULT_MAX_HISTORY};
use crate::middleware::{
    run_chain, BudgetOverrun, ChainDropped, Layer, Middleware, DEFAULT_MIDDLEWARE_BUDGET,
};
use crate::patch::Patch;
use crate::persist::SaveDriver;
use crate::schedule::{Clock, NotifyQueue, SubscriberId, SystemClock, DEFAULT_NOTIFY_DELAY};

// =============================================================================
// Builder
// =============================================================================

/// Configures and constructs a [`Store`].
pub struct StoreBuilder<T> {
    initial: T,
    max_history: usize,
    validate: Option<Box<dyn Fn(&T) -> bool>>,
    middleware: Vec<Layer>,
    notify_delay: Duration,
    middleware_budget: Duration,
    undo_marks_dirty: bool,
    codec: Box<dyn PatchCodec>,
    clock: Arc<dyn Clock>,
    driver: Option<Arc<dyn SaveDriver>>,
}

impl<T> StoreBuilder<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(initial: T) -> Self {
        Self {
            initial,
            max_history: DEFAULT_MAX_HISTORY,
            validate: None,
            middleware: Vec::new(),
            notify_delay: DEFAULT_NOTIFY_DELAY,
            middleware_budget: DEFAULT_MIDDLEWARE_BUDGET,
            undo_marks_dirty: false,
            codec: Box::new(StructuralCodec),
            clock: Arc::new(SystemClock::new()),
            driver: None,
        }
    }

    /// Journal cap. Zero disables journaling (undo/redo become no-ops).
    pub fn max_history(mut self, cap: usize) -> Self {
        self.max_history = cap;
        self
    }

    /// Predicate every candidate state must pass before it commits.
    pub fn validate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + 'static,
    {
        self.validate = Some(Box::new(predicate));
        self
    }

    /// Append a middleware layer. Layers wrap recipes in declaration order.
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Layer::new(middleware));
        self
    }

    /// Trailing-edge debounce delay for plain subscribers.
    pub fn notify_delay(mut self, delay: Duration) -> Self {
        self.notify_delay = delay;
        self
    }

    /// Soft wall-clock budget per middleware layer.
    pub fn middleware_budget(mut self, budget: Duration) -> Self {
        self.middleware_budget = budget;
        self
    }

    /// Whether history navigation counts as a change for dirty tracking.
    pub fn undo_marks_dirty(mut self, yes: bool) -> Self {
        self.undo_marks_dirty = yes;
        self
    }

    /// Replace the default structural codec.
    pub fn codec<C: PatchCodec>(mut self, codec: C) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Inject a time source (tests use a manually advanced clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a persistence driver for `force_save` / `load_remote`.
    pub fn save_driver(mut self, driver: Arc<dyn SaveDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Validate and serialize the initial state, then assemble the store.
    pub fn build(self) -> Result<Store<T>, StoreError> {
        let validate = self.validate.unwrap_or_else(|| Box::new(|_| true));
        if !validate(&self.initial) {
            return Err(StoreError::validation(
                "initial state rejected by the validation predicate",
            ));
        }
        let mirror = serde_json::to_value(&self.initial).map_err(|e| {
            StoreError::validation(format!("initial state does not serialize: {e}"))
        })?;
        Ok(Store {
            state: self.initial,
            mirror,
            journal: Journal::new(self.max_history),
            middleware: self.middleware,
            lifecycle: LifecycleBus::new(),
            notifier: NotifyQueue::new(self.notify_delay),
            validate,
            codec: self.codec,
            clock: self.clock,
            driver: self.driver,
            middleware_budget: self.middleware_budget,
            undo_marks_dirty: self.undo_marks_dirty,
            generation: 0,
            saved_generation: 0,
            destroyed: false,
        })
    }
}

// =============================================================================
// Store
// =============================================================================

/// Single-writer transactional state container.
///
/// See the module docs for the pipeline; see [`StoreBuilder`] for
/// configuration.
pub struct Store<T> {
    state: T,
    /// Canonical document. Patches apply here; `state` follows by
    /// deserialization.
    mirror: Value,
    journal: Journal,
    middleware: Vec<Layer>,
    lifecycle: LifecycleBus<T>,
    notifier: NotifyQueue<T>,
    validate: Box<dyn Fn(&T) -> bool>,
    codec: Box<dyn PatchCodec>,
    clock: Arc<dyn Clock>,
    driver: Option<Arc<dyn SaveDriver>>,
    middleware_budget: Duration,
    undo_marks_dirty: bool,
    generation: u64,
    saved_generation: u64,
    destroyed: bool,
}

impl<T> Store<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn builder(initial: T) -> StoreBuilder<T> {
        StoreBuilder::new(initial)
    }

    /// Build with defaults and no validation.
    pub fn new(initial: T) -> Result<Self, StoreError> {
        StoreBuilder::new(initial).build()
    }

    fn ensure_live(&self) -> Result<(), StoreError> {
        if self.destroyed {
            Err(StoreError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Deliver a due debounced broadcast. Called at the top of every
    /// operation so delivery needs no background task.
    fn pump(&mut self) {
        if self.notifier.due(self.clock.now()) {
            self.notifier.fire(&self.state);
        }
    }

    fn emit_error(&mut self, err: &StoreError, operation: Operation) {
        error!(%operation, error = %err, "store operation failed");
        self.lifecycle.emit_error(ErrorFact {
            error: err,
            operation,
        });
    }

    fn report_overruns(&mut self, overruns: Vec<BudgetOverrun>, operation: Operation) {
        for overrun in overruns {
            let err = StoreError::MiddlewareBudget {
                layer: overrun.layer,
                elapsed: overrun.elapsed,
                budget: overrun.budget,
            };
            // Diagnostic only: surfaces on the error event, never as a
            // returned error.
            self.lifecycle.emit_error(ErrorFact {
                error: &err,
                operation,
            });
        }
    }

    /// Run one recipe through the middleware chain against a fork of `base`.
    fn produce_step(
        &self,
        base: &Value,
        description: Option<&str>,
        operation: Operation,
        recipe: &mut dyn FnMut(&mut Value) -> anyhow::Result<()>,
        overruns: &RefCell<Vec<BudgetOverrun>>,
    ) -> anyhow::Result<Produced> {
        let ctx = MutationContext {
            state_before: base,
            description,
            operation,
            timestamp: Utc::now(),
        };
        let layers = &self.middleware;
        let budget = self.middleware_budget;
        self.codec.produce(base, &mut |draft| {
            run_chain(layers, &ctx, draft, &mut *recipe, budget, overruns)
        })
    }

    fn classify_produce_error(err: anyhow::Error) -> StoreError {
        match err.downcast::<ChainDropped>() {
            Ok(dropped) => StoreError::Middleware {
                layer: dropped.layer,
            },
            Err(other) => StoreError::Mutation { source: other },
        }
    }

    fn deserialize_candidate(&self, document: &Value, what: &str) -> Result<T, StoreError> {
        let candidate: T = serde_json::from_value(document.clone())
            .map_err(|e| StoreError::validation(format!("{what} does not deserialize: {e}")))?;
        if !(self.validate)(&candidate) {
            return Err(StoreError::validation(format!(
                "{what} rejected by the validation predicate"
            )));
        }
        Ok(candidate)
    }

    fn commit(
        &mut self,
        id: MutationId,
        next_mirror: Value,
        next_state: T,
        forward: &[Patch],
        inverse: &[Patch],
        description: Option<&str>,
        operation: Operation,
    ) {
        self.journal.record(Snapshot {
            id,
            forward: forward.to_vec(),
            inverse: inverse.to_vec(),
            timestamp: Utc::now(),
            description: description.map(String::from),
        });
        self.mirror = next_mirror;
        self.state = next_state;
        self.generation += 1;
        self.lifecycle.emit_after_mutate(AfterMutate {
            id,
            state: &self.state,
            forward,
            inverse,
            description,
            operation,
        });
        self.notifier.mark_changed(self.clock.now());
        debug!(%id, %operation, patches = forward.len(), "transition committed");
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Apply one recipe as a transaction.
    ///
    /// Returns `Ok(None)` when the recipe changed nothing observable: no
    /// journal entry, no events, no broadcast.
    pub fn mutate<F>(
        &mut self,
        description: Option<&str>,
        f: F,
    ) -> Result<Option<MutationId>, StoreError>
    where
        F: FnOnce(&mut Value) -> anyhow::Result<()>,
    {
        self.ensure_live()?;
        self.pump();

        let mut slot = Some(f);
        let mut recipe = move |draft: &mut Value| match slot.take() {
            Some(f) => f(draft),
            None => Err(anyhow::anyhow!("recipe invoked more than once")),
        };

        let overruns = RefCell::new(Vec::new());
        let produced = self.produce_step(
            &self.mirror,
            description,
            Operation::Mutate,
            &mut recipe,
            &overruns,
        );
        self.report_overruns(overruns.into_inner(), Operation::Mutate);

        let produced = match produced {
            Ok(p) => p,
            Err(err) => {
                let store_err = Self::classify_produce_error(err);
                self.emit_error(&store_err, Operation::Mutate);
                return Err(store_err);
            }
        };

        if produced.forward.is_empty() {
            debug!("recipe changed nothing; skipping commit");
            return Ok(None);
        }

        let candidate = match self.deserialize_candidate(&produced.next, "candidate state") {
            Ok(c) => c,
            Err(err) => {
                self.emit_error(&err, Operation::Mutate);
                return Err(err);
            }
        };

        let id = MutationId::new();
        self.commit(
            id,
            produced.next,
            candidate,
            &produced.forward,
            &produced.inverse,
            description,
            Operation::Mutate,
        );
        Ok(Some(id))
    }

    /// Apply several recipes as one atomic transaction.
    ///
    /// Steps run in order, each seeing the previous step's result. Any step
    /// failing aborts the whole batch with nothing committed. Only the final
    /// state is validated; intermediate states may be transiently invalid.
    /// The batch records a single journal entry, so undo unwinds it whole.
    pub fn batch(
        &mut self,
        description: Option<&str>,
        recipes: Vec<Recipe>,
    ) -> Result<Option<MutationId>, StoreError> {
        self.ensure_live()?;
        self.pump();
        if recipes.is_empty() {
            return Ok(None);
        }

        let overruns = RefCell::new(Vec::new());
        let mut current = self.mirror.clone();
        let mut forward: Vec<Patch> = Vec::new();
        let mut inverse_steps: Vec<Vec<Patch>> = Vec::new();

        for step in recipes {
            let mut slot = Some(step);
            let mut recipe = move |draft: &mut Value| match slot.take() {
                Some(f) => f(draft),
                None => Err(anyhow::anyhow!("recipe invoked more than once")),
            };
            let produced = self.produce_step(
                &current,
                description,
                Operation::Batch,
                &mut recipe,
                &overruns,
            );
            match produced {
                Ok(p) => {
                    forward.extend(p.forward);
                    inverse_steps.push(p.inverse);
                    current = p.next;
                }
                Err(err) => {
                    self.report_overruns(overruns.into_inner(), Operation::Batch);
                    let store_err = Self::classify_produce_error(err);
                    self.emit_error(&store_err, Operation::Batch);
                    return Err(store_err);
                }
            }
        }
        self.report_overruns(overruns.into_inner(), Operation::Batch);

        if forward.is_empty() {
            debug!("batch changed nothing; skipping commit");
            return Ok(None);
        }

        // Unwinding replays each step's inverse in reverse step order.
        let inverse: Vec<Patch> = inverse_steps.into_iter().rev().flatten().collect();

        let candidate = match self.deserialize_candidate(&current, "batch result") {
            Ok(c) => c,
            Err(err) => {
                self.emit_error(&err, Operation::Batch);
                return Err(err);
            }
        };

        let id = MutationId::new();
        self.commit(
            id,
            current,
            candidate,
            &forward,
            &inverse,
            description,
            Operation::Batch,
        );
        Ok(Some(id))
    }

    // =========================================================================
    // History Navigation
    // =========================================================================

    /// Step the cursor back one transition.
    ///
    /// Returns `Ok(false)` when there is nothing to undo, or when the
    /// reconstructed state fails validation (reported on the error event;
    /// the cursor does not move).
    pub fn undo(&mut self) -> Result<bool, StoreError> {
        self.ensure_live()?;
        self.pump();

        let Some(snap) = self.journal.peek_undo() else {
            return Ok(false);
        };
        let applied = snap.inverse.clone();
        let reverse = snap.forward.clone();
        let id = snap.id;
        let description = snap.description.clone();

        let next = match self.codec.apply(&self.mirror, &applied) {
            Ok(v) => v,
            Err(e) => {
                let err = StoreError::Patch(e);
                self.emit_error(&err, Operation::Undo);
                return Err(err);
            }
        };
        let candidate = match self.deserialize_candidate(&next, "undone state") {
            Ok(c) => c,
            Err(err) => {
                self.emit_error(&err, Operation::Undo);
                return Ok(false);
            }
        };

        self.journal.commit_undo();
        self.mirror = next;
        self.state = candidate;
        if self.undo_marks_dirty {
            self.generation += 1;
        }
        self.lifecycle.emit_after_mutate(AfterMutate {
            id,
            state: &self.state,
            forward: &applied,
            inverse: &reverse,
            description: description.as_deref(),
            operation: Operation::Undo,
        });
        self.notifier.mark_changed(self.clock.now());
        debug!(%id, "undo committed");
        Ok(true)
    }

    /// Step the cursor forward one transition. Mirror image of [`undo`].
    ///
    /// [`undo`]: Store::undo
    pub fn redo(&mut self) -> Result<bool, StoreError> {
        self.ensure_live()?;
        self.pump();

        let Some(snap) = self.journal.peek_redo() else {
            return Ok(false);
        };
        let applied = snap.forward.clone();
        let reverse = snap.inverse.clone();
        let id = snap.id;
        let description = snap.description.clone();

        let next = match self.codec.apply(&self.mirror, &applied) {
            Ok(v) => v,
            Err(e) => {
                let err = StoreError::Patch(e);
                self.emit_error(&err, Operation::Redo);
                return Err(err);
            }
        };
        let candidate = match self.deserialize_candidate(&next, "redone state") {
            Ok(c) => c,
            Err(err) => {
                self.emit_error(&err, Operation::Redo);
                return Ok(false);
            }
        };

        self.journal.commit_redo();
        self.mirror = next;
        self.state = candidate;
        if self.undo_marks_dirty {
            self.generation += 1;
        }
        self.lifecycle.emit_after_mutate(AfterMutate {
            id,
            state: &self.state,
            forward: &applied,
            inverse: &reverse,
            description: description.as_deref(),
            operation: Operation::Redo,
        });
        self.notifier.mark_changed(self.clock.now());
        debug!(%id, "redo committed");
        Ok(true)
    }

    pub fn can_undo(&self) -> Result<bool, StoreError> {
        self.ensure_live()?;
        Ok(self.journal.can_undo())
    }

    pub fn can_redo(&self) -> Result<bool, StoreError> {
        self.ensure_live()?;
        Ok(self.journal.can_redo())
    }

    /// Point-in-time view of the journal.
    pub fn history_info(&self) -> Result<HistoryInfo, StoreError> {
        self.ensure_live()?;
        Ok(self.journal.info())
    }

    /// Drop all history. The live state is untouched.
    pub fn clear_history(&mut self) -> Result<(), StoreError> {
        self.ensure_live()?;
        self.journal.clear();
        Ok(())
    }

    // =========================================================================
    // External Replacement & Teardown
    // =========================================================================

    /// Replace the state wholesale, bypassing recipes and middleware.
    ///
    /// Used for time-travel and remote sync. Clears the journal: patches
    /// recorded against the old document would not replay against the new
    /// one.
    pub fn replace_state(&mut self, new_state: T) -> Result<(), StoreError> {
        self.ensure_live()?;
        self.pump();

        if !(self.validate)(&new_state) {
            let err =
                StoreError::validation("replacement state rejected by the validation predicate");
            self.emit_error(&err, Operation::Replace);
            return Err(err);
        }
        let mirror = match serde_json::to_value(&new_state) {
            Ok(v) => v,
            Err(e) => {
                let err = StoreError::validation(format!(
                    "replacement state does not serialize: {e}"
                ));
                self.emit_error(&err, Operation::Replace);
                return Err(err);
            }
        };

        self.journal.clear();
        self.mirror = mirror;
        self.state = new_state;
        self.generation += 1;
        self.lifecycle.emit_after_mutate(AfterMutate {
            id: MutationId::new(),
            state: &self.state,
            forward: &[],
            inverse: &[],
            description: None,
            operation: Operation::Replace,
        });
        self.notifier.mark_changed(self.clock.now());
        Ok(())
    }

    /// Tear the store down. Idempotent.
    ///
    /// Destroy listeners observe the final state, then every listener,
    /// subscriber, pending broadcast, and journal entry is dropped. All
    /// subsequent operations fail with [`StoreError::Destroyed`].
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.notifier.cancel();
        self.lifecycle.emit_destroy(&self.state);
        self.lifecycle.release();
        self.notifier.clear();
        self.journal.clear();
        self.destroyed = true;
        debug!("store destroyed");
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// The current typed state.
    pub fn state(&self) -> Result<&T, StoreError> {
        self.ensure_live()?;
        Ok(&self.state)
    }

    /// Register a debounced subscriber; it synchronously receives the
    /// current state once before this returns.
    pub fn subscribe<F>(&mut self, listener: F) -> Result<SubscriberId, StoreError>
    where
        F: FnMut(&T) + 'static,
    {
        self.ensure_live()?;
        Ok(self.notifier.subscribe(Box::new(listener), &self.state))
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> Result<bool, StoreError> {
        self.ensure_live()?;
        Ok(self.notifier.unsubscribe(id))
    }

    /// Listen for committed transitions.
    pub fn on_after_mutate<F>(&mut self, listener: F) -> Result<ListenerHandle, StoreError>
    where
        F: FnMut(AfterMutate<'_, T>) + 'static,
    {
        self.ensure_live()?;
        Ok(self.lifecycle.on_after_mutate(Box::new(listener)))
    }

    /// Listen for failures and diagnostics.
    pub fn on_error<F>(&mut self, listener: F) -> Result<ListenerHandle, StoreError>
    where
        F: FnMut(ErrorFact<'_>) + 'static,
    {
        self.ensure_live()?;
        Ok(self.lifecycle.on_error(Box::new(listener)))
    }

    /// Listen for teardown; receives the final state.
    pub fn on_destroy<F>(&mut self, listener: F) -> Result<ListenerHandle, StoreError>
    where
        F: FnMut(&T) + 'static,
    {
        self.ensure_live()?;
        Ok(self.lifecycle.on_destroy(Box::new(listener)))
    }

    /// Remove a lifecycle listener.
    pub fn off(&mut self, handle: ListenerHandle) -> Result<bool, StoreError> {
        self.ensure_live()?;
        Ok(self.lifecycle.off(handle))
    }

    /// Deliver any pending debounced broadcast immediately.
    pub fn flush_notifications(&mut self) -> Result<(), StoreError> {
        self.ensure_live()?;
        if self.notifier.pending() {
            self.notifier.fire(&self.state);
        }
        Ok(())
    }

    /// Time until the pending broadcast would be due, if one is pending.
    /// Event loops can use this to schedule a [`flush_notifications`] call.
    ///
    /// [`flush_notifications`]: Store::flush_notifications
    pub fn notifications_due_in(&self) -> Result<Option<Duration>, StoreError> {
        self.ensure_live()?;
        Ok(self.notifier.due_in(self.clock.now()))
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Whether the state has changed since the last successful save.
    pub fn is_dirty(&self) -> Result<bool, StoreError> {
        self.ensure_live()?;
        Ok(self.generation != self.saved_generation)
    }

    /// Snapshot the document and generation for a save the caller drives.
    ///
    /// Pair with [`finish_save`]: persist the returned document however long
    /// that takes, then report back with the generation so the store is only
    /// marked clean when no commit landed in between.
    ///
    /// [`finish_save`]: Store::finish_save
    pub fn begin_save(&self) -> Result<(Value, u64), StoreError> {
        self.ensure_live()?;
        Ok((self.mirror.clone(), self.generation))
    }

    /// Complete a save started with [`begin_save`].
    ///
    /// Returns whether the store was marked clean; `false` means a commit
    /// landed while the save was in flight and the store stays dirty.
    ///
    /// [`begin_save`]: Store::begin_save
    pub fn finish_save(&mut self, generation: u64) -> Result<bool, StoreError> {
        self.ensure_live()?;
        if self.generation == generation {
            self.saved_generation = generation;
            debug!(generation, "state saved");
            Ok(true)
        } else {
            debug!(
                saved = generation,
                current = self.generation,
                "commit landed during save; store stays dirty"
            );
            Ok(false)
        }
    }

    /// Persist the current document through the configured driver.
    ///
    /// Convenience wrapper over [`begin_save`] and [`finish_save`] for
    /// callers that drive the driver inline.
    ///
    /// [`begin_save`]: Store::begin_save
    /// [`finish_save`]: Store::finish_save
    pub async fn force_save(&mut self) -> Result<(), StoreError> {
        self.ensure_live()?;
        let Some(driver) = self.driver.clone() else {
            return Err(StoreError::Persistence {
                source: anyhow::anyhow!("no save driver configured"),
            });
        };
        let (document, generation) = self.begin_save()?;
        match driver.save(document).await {
            Ok(()) => {
                self.finish_save(generation)?;
                Ok(())
            }
            Err(source) => {
                let err = StoreError::Persistence { source };
                self.emit_error(&err, Operation::Save);
                Err(err)
            }
        }
    }

    /// Fetch the persisted document and replace the state with it.
    ///
    /// Clears history (via [`replace_state`]) and marks the store clean.
    ///
    /// [`replace_state`]: Store::replace_state
    pub async fn load_remote(&mut self) -> Result<(), StoreError> {
        self.ensure_live()?;
        let Some(driver) = self.driver.clone() else {
            return Err(StoreError::Persistence {
                source: anyhow::anyhow!("no save driver configured"),
            });
        };
        let document = match driver.load().await {
            Ok(v) => v,
            Err(source) => {
                let err = StoreError::Persistence { source };
                self.emit_error(&err, Operation::Load);
                return Err(err);
            }
        };
        let state: T = match serde_json::from_value(document) {
            Ok(s) => s,
            Err(e) => {
                let err = StoreError::validation(format!(
                    "persisted state does not deserialize: {e}"
                ));
                self.emit_error(&err, Operation::Load);
                return Err(err);
            }
        };
        self.replace_state(state)?;
        self.saved_generation = self.generation;
        Ok(())
    }

    #[cfg(test)]
    fn lifecycle_allocated(&self) -> bool {
        self.lifecycle.is_allocated()
    }
}
