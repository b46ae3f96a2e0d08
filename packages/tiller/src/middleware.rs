//! The mutation middleware pipeline.
//!
//! Middleware layers wrap every recipe in declaration order on the way in
//! and reverse order on the way out (onion model): with layers `[A, B]` the
//! observed order is `A-pre, B-pre, recipe, B-post, A-post`. The chain is
//! composed right-to-left at call time; an empty layer list degrades to
//! invoking the recipe directly.
//!
//! A layer may inspect the read-only [`MutationContext`], mutate the draft
//! before delegating, post-process the draft after [`Next::run`] returns, or
//! return an error to abort the mutation.
//!
//! # Chain Guard
//!
//! Two failure modes of user-supplied layers are guarded:
//!
//! - A layer that returns `Ok` **without** invoking `next` dropped the
//!   chain: the recipe never ran. This is detected synchronously and fails
//!   the mutation.
//! - A layer that takes longer than its soft budget is reported after it
//!   returns: a warning plus an out-of-band error event. The commit itself
//!   is unaffected; a synchronous pipeline cannot preempt a layer that
//!   never returns, so the budget is a diagnostic, not a watchdog.

use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::core::MutationContext;

/// Default soft budget per middleware layer.
pub const DEFAULT_MIDDLEWARE_BUDGET: Duration = Duration::from_millis(100);

// =============================================================================
// Middleware Trait
// =============================================================================

/// An interceptor wrapping a recipe's execution.
///
/// # Example
///
/// ```ignore
/// struct Sanitizer;
///
/// impl Middleware for Sanitizer {
///     fn handle(
///         &self,
///         ctx: &MutationContext<'_>,
///         draft: &mut Value,
///         next: Next<'_>,
///     ) -> anyhow::Result<()> {
///         next.run(draft)?;
///         // post-processing: runs after the recipe
///         if let Some(name) = draft.get_mut("name") {
///             *name = Value::String(name.as_str().unwrap_or_default().trim().to_string());
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Middleware: 'static {
    /// Intercept one mutation. Call `next.run(draft)` exactly once to
    /// delegate to the remainder of the chain; return `Err` to abort.
    fn handle(
        &self,
        ctx: &MutationContext<'_>,
        draft: &mut Value,
        next: Next<'_>,
    ) -> anyhow::Result<()>;
}

// =============================================================================
// Layer (name capture)
// =============================================================================

/// A registered middleware with its captured type name.
pub(crate) struct Layer {
    name: &'static str,
    inner: Box<dyn Middleware>,
}

impl Layer {
    pub fn new<M: Middleware>(middleware: M) -> Self {
        Self {
            name: std::any::type_name::<M>(),
            inner: Box::new(middleware),
        }
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer").field("name", &self.name).finish()
    }
}

// =============================================================================
// Chain Errors & Diagnostics
// =============================================================================

/// Internal marker: a layer returned `Ok` without delegating.
///
/// Travels through `anyhow` and is downcast by the engine into
/// `StoreError::Middleware`.
#[derive(Debug, Error)]
#[error("middleware {layer} returned without invoking the rest of the chain")]
pub(crate) struct ChainDropped {
    pub layer: &'static str,
}

/// One soft-budget overrun, reported after the fact.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BudgetOverrun {
    pub layer: &'static str,
    pub elapsed: Duration,
    pub budget: Duration,
}

// =============================================================================
// Next (typed continue callable)
// =============================================================================

/// The typed continuation handed to each middleware layer.
///
/// Consuming `run` guarantees a layer cannot delegate twice. Not calling it
/// at all (while returning `Ok`) is detected by the chain runner.
pub struct Next<'a> {
    layers: &'a [Layer],
    ctx: &'a MutationContext<'a>,
    recipe: &'a mut dyn FnMut(&mut Value) -> anyhow::Result<()>,
    entered: &'a Cell<bool>,
    budget: Duration,
    overruns: &'a RefCell<Vec<BudgetOverrun>>,
}

impl Next<'_> {
    /// Delegate to the remainder of the chain, terminating in the recipe.
    pub fn run(self, draft: &mut Value) -> anyhow::Result<()> {
        self.entered.set(true);
        run_chain(
            self.layers,
            self.ctx,
            draft,
            self.recipe,
            self.budget,
            self.overruns,
        )
    }
}

// =============================================================================
// Chain Runner
// =============================================================================

/// Run the layer list around the recipe, composed right-to-left.
pub(crate) fn run_chain(
    layers: &[Layer],
    ctx: &MutationContext<'_>,
    draft: &mut Value,
    recipe: &mut dyn FnMut(&mut Value) -> anyhow::Result<()>,
    budget: Duration,
    overruns: &RefCell<Vec<BudgetOverrun>>,
) -> anyhow::Result<()> {
    let Some((head, rest)) = layers.split_first() else {
        return recipe(draft);
    };

    let entered = Cell::new(false);
    let next = Next {
        layers: rest,
        ctx,
        recipe,
        entered: &entered,
        budget,
        overruns,
    };

    let started = Instant::now();
    let result = head.inner.handle(ctx, draft, next);
    let elapsed = started.elapsed();
    if elapsed > budget {
        warn!(
            layer = head.name,
            elapsed_ms = elapsed.as_millis() as u64,
            budget_ms = budget.as_millis() as u64,
            "middleware exceeded its soft budget"
        );
        overruns.borrow_mut().push(BudgetOverrun {
            layer: head.name,
            elapsed,
            budget,
        });
    }

    match result {
        Ok(()) if !entered.get() => Err(anyhow::Error::new(ChainDropped { layer: head.name })),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Operation;
    use chrono::Utc;
    use serde_json::json;
    use std::rc::Rc;

    fn test_ctx(before: &Value) -> MutationContext<'_> {
        MutationContext {
            state_before: before,
            description: None,
            operation: Operation::Mutate,
            timestamp: Utc::now(),
        }
    }

    /// Records pre/next/post hits into a shared trace.
    struct Tracer {
        tag: &'static str,
        trace: Rc<RefCell<Vec<String>>>,
    }

    impl Middleware for Tracer {
        fn handle(
            &self,
            _ctx: &MutationContext<'_>,
            draft: &mut Value,
            next: Next<'_>,
        ) -> anyhow::Result<()> {
            self.trace.borrow_mut().push(format!("{}-pre", self.tag));
            next.run(draft)?;
            self.trace.borrow_mut().push(format!("{}-post", self.tag));
            Ok(())
        }
    }

    fn run(
        layers: &[Layer],
        before: &Value,
        draft: &mut Value,
        recipe: &mut dyn FnMut(&mut Value) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let overruns = RefCell::new(Vec::new());
        let ctx = test_ctx(before);
        run_chain(
            layers,
            &ctx,
            draft,
            recipe,
            DEFAULT_MIDDLEWARE_BUDGET,
            &overruns,
        )
    }

    #[test]
    fn test_empty_chain_runs_recipe_directly() {
        let before = json!({"count": 0});
        let mut draft = before.clone();
        run(&[], &before, &mut draft, &mut |d| {
            d["count"] = json!(1);
            Ok(())
        })
        .unwrap();
        assert_eq!(draft["count"], 1);
    }

    #[test]
    fn test_onion_ordering() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let layers = vec![
            Layer::new(Tracer {
                tag: "A",
                trace: trace.clone(),
            }),
            Layer::new(Tracer {
                tag: "B",
                trace: trace.clone(),
            }),
        ];
        let before = json!({});
        let mut draft = before.clone();
        let trace_for_recipe = trace.clone();
        run(&layers, &before, &mut draft, &mut move |_| {
            trace_for_recipe.borrow_mut().push("recipe".to_string());
            Ok(())
        })
        .unwrap();

        assert_eq!(
            trace.borrow().as_slice(),
            ["A-pre", "B-pre", "recipe", "B-post", "A-post"]
        );
    }

    #[test]
    fn test_middleware_can_mutate_draft_before_and_after() {
        struct Stamper;
        impl Middleware for Stamper {
            fn handle(
                &self,
                _ctx: &MutationContext<'_>,
                draft: &mut Value,
                next: Next<'_>,
            ) -> anyhow::Result<()> {
                draft["pre"] = json!(true);
                next.run(draft)?;
                draft["post"] = json!(true);
                Ok(())
            }
        }
        let layers = vec![Layer::new(Stamper)];
        let before = json!({});
        let mut draft = before.clone();
        run(&layers, &before, &mut draft, &mut |d| {
            // the pre-edit is visible to the recipe
            assert_eq!(d["pre"], true);
            d["body"] = json!(1);
            Ok(())
        })
        .unwrap();
        assert_eq!(draft, json!({"pre": true, "body": 1, "post": true}));
    }

    #[test]
    fn test_middleware_error_aborts_and_skips_recipe() {
        struct Bouncer;
        impl Middleware for Bouncer {
            fn handle(
                &self,
                _ctx: &MutationContext<'_>,
                _draft: &mut Value,
                _next: Next<'_>,
            ) -> anyhow::Result<()> {
                anyhow::bail!("rejected")
            }
        }
        let layers = vec![Layer::new(Bouncer)];
        let before = json!({});
        let mut draft = before.clone();
        let mut recipe_ran = false;
        let err = run(&layers, &before, &mut draft, &mut |_| {
            recipe_ran = true;
            Ok(())
        })
        .unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert!(!recipe_ran);
    }

    #[test]
    fn test_dropped_chain_is_detected() {
        struct Forgetful;
        impl Middleware for Forgetful {
            fn handle(
                &self,
                _ctx: &MutationContext<'_>,
                _draft: &mut Value,
                _next: Next<'_>,
            ) -> anyhow::Result<()> {
                Ok(()) // never delegates
            }
        }
        let layers = vec![Layer::new(Forgetful)];
        let before = json!({});
        let mut draft = before.clone();
        let err = run(&layers, &before, &mut draft, &mut |_| Ok(())).unwrap_err();
        assert!(err.downcast_ref::<ChainDropped>().is_some());
    }

    #[test]
    fn test_budget_overrun_is_recorded_not_fatal() {
        struct Sleeper;
        impl Middleware for Sleeper {
            fn handle(
                &self,
                _ctx: &MutationContext<'_>,
                draft: &mut Value,
                next: Next<'_>,
            ) -> anyhow::Result<()> {
                std::thread::sleep(Duration::from_millis(5));
                next.run(draft)
            }
        }
        let layers = vec![Layer::new(Sleeper)];
        let before = json!({});
        let mut draft = before.clone();
        let overruns = RefCell::new(Vec::new());
        let ctx = test_ctx(&before);
        run_chain(
            &layers,
            &ctx,
            &mut draft,
            &mut |_| Ok(()),
            Duration::from_millis(1),
            &overruns,
        )
        .unwrap();

        let overruns = overruns.into_inner();
        assert_eq!(overruns.len(), 1);
        assert!(overruns[0].elapsed > overruns[0].budget);
    }

    #[test]
    fn test_context_is_readable() {
        struct Reader;
        impl Middleware for Reader {
            fn handle(
                &self,
                ctx: &MutationContext<'_>,
                draft: &mut Value,
                next: Next<'_>,
            ) -> anyhow::Result<()> {
                assert_eq!(ctx.state_before["count"], 7);
                assert_eq!(ctx.operation, Operation::Mutate);
                next.run(draft)
            }
        }
        let layers = vec![Layer::new(Reader)];
        let before = json!({"count": 7});
        let mut draft = before.clone();
        run(&layers, &before, &mut draft, &mut |_| Ok(())).unwrap();
    }
}
