//! Structured error types for the store.
//!
//! `StoreError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`.
//!
//! # The Error Boundary Rule
//!
//! > **No `anyhow::Error` ever crosses the public API unclassified.**
//!
//! - `anyhow` is internal transport (ergonomic for recipes and middleware)
//! - `StoreError` is the only error type returned from store operations
//!
//! Failures that commit to the caller are *also* reported on the lifecycle
//! error event, so out-of-process observers see the same fact the caller
//! does. Budget overruns are the one exception: they are diagnostic-only and
//! surface exclusively through the error event (see the middleware module).

use std::time::Duration;

use thiserror::Error;

use crate::patch::PatchError;

/// Structured error type for store operations.
///
/// Each variant classifies one failure mode of the mutation path:
///
/// - `Validation`: the caller's predicate rejected a candidate state, or an
///   input was malformed. Raised during construction, mutation, and external
///   replacement.
/// - `Mutation`: a recipe or middleware layer returned an error. The live
///   state was left untouched.
/// - `Middleware`: a layer returned without invoking the rest of the chain,
///   so the recipe never ran.
/// - `MiddlewareBudget`: a layer exceeded its soft wall-clock budget. Never
///   returned from an operation; emitted on the error event only.
/// - `Patch`: the patch codec could not replay a patch list. Indicates a
///   broken invariant, not caller error.
/// - `Persistence`: the save/load driver failed. Returned only from the
///   async persistence hooks.
/// - `Destroyed`: the store was used after teardown. Fatal and always
///   thrown, never swallowed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Candidate state rejected by the validation predicate, or malformed
    /// input.
    #[error("state validation failed: {reason}")]
    Validation {
        /// Why the candidate was rejected.
        reason: String,
    },

    /// A recipe or middleware layer failed during mutate/batch.
    #[error("mutation failed: {source}")]
    Mutation {
        /// The underlying recipe or middleware error.
        #[source]
        source: anyhow::Error,
    },

    /// A middleware layer dropped the chain without delegating.
    #[error("middleware {layer} returned without invoking the rest of the chain")]
    Middleware {
        /// Type name of the offending layer.
        layer: &'static str,
    },

    /// A middleware layer overran its soft budget (diagnostic only).
    #[error("middleware {layer} exceeded its budget ({elapsed:?} > {budget:?})")]
    MiddlewareBudget {
        /// Type name of the offending layer.
        layer: &'static str,
        /// How long the layer actually took.
        elapsed: Duration,
        /// The configured budget.
        budget: Duration,
    },

    /// Patch application failed while replaying history.
    #[error("patch application failed: {0}")]
    Patch(#[from] PatchError),

    /// The persistence driver failed.
    #[error("persistence driver failed: {source}")]
    Persistence {
        /// The underlying driver error.
        #[source]
        source: anyhow::Error,
    },

    /// Operation attempted after `destroy()`.
    #[error("store has been destroyed")]
    Destroyed,
}

impl StoreError {
    /// Build a validation error from anything displayable.
    pub fn validation(reason: impl Into<String>) -> Self {
        StoreError::Validation {
            reason: reason.into(),
        }
    }

    /// True for the fatal post-teardown error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Destroyed)
    }
}
