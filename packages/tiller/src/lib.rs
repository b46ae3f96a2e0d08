//! # Tiller
//!
//! An in-process, single-writer transactional state container with
//! structural undo/redo.
//!
//! State lives behind a [`Store`]. Callers never mutate it directly; they
//! submit *recipes* that edit a forked draft of the canonical JSON document.
//! The store diffs the draft against the committed document, producing a
//! forward/inverse patch pair, validates the candidate, and only then
//! commits. Every committed transition is journaled, observable, and
//! reversible.
//!
//! ```text
//!   caller ──mutate(recipe)──▶ ┌─────────────────────────────┐
//!                              │          Store<T>           │
//!                              │                             │
//!                              │  middleware ▶ recipe ▶ diff │
//!                              │       ▼                     │
//!                              │  validate ▶ commit          │
//!                              │       │                     │
//!                              │       ├─▶ journal (undo)    │
//!                              │       ├─▶ lifecycle events  │
//!                              │       ├─▶ debounced subs    │
//!                              │       └─▶ save driver       │
//!                              └─────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//! use tiller::Store;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Doc {
//!     count: i64,
//! }
//!
//! let mut store = Store::builder(Doc { count: 0 })
//!     .validate(|d: &Doc| d.count >= 0)
//!     .build()?;
//!
//! store.mutate(Some("bump"), |draft| {
//!     draft["count"] = json!(5);
//!     Ok(())
//! })?;
//!
//! assert_eq!(store.state()?.count, 5);
//! store.undo()?;
//! assert_eq!(store.state()?.count, 0);
//! # Ok::<(), tiller::StoreError>(())
//! ```
//!
//! # Module Map
//!
//! - [`engine`]: the [`Store`] itself and its builder
//! - [`patch`]: paths, patches, pure apply and structural diff
//! - [`codec`]: the pluggable diff/apply capability
//! - [`journal`]: bounded history with a navigation cursor
//! - [`middleware`]: the onion-model mutation pipeline
//! - [`events`]: lazily-allocated lifecycle listeners
//! - [`schedule`]: debounced plain subscribers and the [`Clock`] seam
//! - [`persist`]: the async [`SaveDriver`] collaborator
//! - [`error`]: the [`StoreError`] taxonomy

pub mod codec;
pub mod core;
pub mod engine;
pub mod error;
pub mod events;
pub mod journal;
pub mod middleware;
pub mod patch;
pub mod persist;
pub mod schedule;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod stress_tests;

pub use crate::codec::{PatchCodec, Produced, StructuralCodec};
pub use crate::core::{recipe, MutationContext, MutationId, Operation, Recipe};
pub use crate::engine::{Store, StoreBuilder};
pub use crate::error::StoreError;
pub use crate::events::{AfterMutate, ErrorFact, EventKind, ListenerHandle};
pub use crate::journal::{HistoryInfo, Snapshot, DEFAULT_MAX_HISTORY};
pub use crate::middleware::{Middleware, Next, DEFAULT_MIDDLEWARE_BUDGET};
pub use crate::patch::{apply_patches, diff, Patch, PatchError, Path, Seg};
pub use crate::persist::SaveDriver;
pub use crate::schedule::{Clock, SubscriberId, SystemClock, DEFAULT_NOTIFY_DELAY};

/// The canonical document type recipes edit.
pub use serde_json::Value;
