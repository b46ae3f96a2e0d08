//! Core types shared across the store: operations, mutation identity,
//! recipes, and the read-only middleware context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Operation
// =============================================================================

/// The kind of state transition being performed.
///
/// Every lifecycle event is tagged with the operation that produced it, so
/// observers can distinguish a fresh mutation from history navigation or an
/// external replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A single recipe applied via `mutate`.
    Mutate,
    /// One step of an atomic batch.
    Batch,
    /// History navigation backwards.
    Undo,
    /// History navigation forwards.
    Redo,
    /// External state replacement (time-travel, remote load, sync).
    Replace,
    /// A persistence save hook.
    Save,
    /// A persistence load hook.
    Load,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Mutate => "mutate",
            Operation::Batch => "batch",
            Operation::Undo => "undo",
            Operation::Redo => "redo",
            Operation::Replace => "replace",
            Operation::Save => "save",
            Operation::Load => "load",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Mutation Id
// =============================================================================

/// Unique identifier stamped on every committed transition.
///
/// Carried by the journal snapshot and by the post-mutation event, so
/// external collaborators (devtools, sync channels) can correlate the facts
/// they observe with history entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MutationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Recipe
// =============================================================================

/// A caller-supplied edit against the mutable draft of the state document.
///
/// Recipes never see the live state; they mutate a draft and the codec
/// derives forward/inverse patches from what actually changed. A recipe that
/// changes nothing observable is a documented no-op.
pub type Recipe = Box<dyn FnOnce(&mut Value) -> anyhow::Result<()>>;

/// Box a closure into a [`Recipe`].
///
/// Purely ergonomic sugar for `batch` call sites.
pub fn recipe<F>(f: F) -> Recipe
where
    F: FnOnce(&mut Value) -> anyhow::Result<()> + 'static,
{
    Box::new(f)
}

// =============================================================================
// Mutation Context
// =============================================================================

/// Read-only view handed to every middleware layer.
///
/// Constructed once per mutation (or once per batch step) and never mutated
/// afterwards. `state_before` is the committed document the draft was forked
/// from; for batch steps it is the candidate threaded from the previous step.
#[derive(Debug, Clone, Copy)]
pub struct MutationContext<'a> {
    /// The state the in-flight draft was forked from.
    pub state_before: &'a Value,
    /// Caller-supplied description, if any.
    pub description: Option<&'a str>,
    /// The operation this mutation runs under.
    pub operation: Operation,
    /// Wall-clock time the mutation started.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::Mutate.to_string(), "mutate");
        assert_eq!(Operation::Batch.to_string(), "batch");
        assert_eq!(Operation::Undo.to_string(), "undo");
        assert_eq!(Operation::Redo.to_string(), "redo");
        assert_eq!(Operation::Replace.to_string(), "replace");
    }

    #[test]
    fn test_operation_serde_round_trip() {
        let json = serde_json::to_string(&Operation::Undo).unwrap();
        assert_eq!(json, "\"undo\"");
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Operation::Undo);
    }

    #[test]
    fn test_mutation_ids_are_unique() {
        let a = MutationId::new();
        let b = MutationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_recipe_helper_boxes_closure() {
        let r = recipe(|draft| {
            *draft = serde_json::json!({"ok": true});
            Ok(())
        });
        let mut v = Value::Null;
        r(&mut v).unwrap();
        assert_eq!(v["ok"], true);
    }
}
