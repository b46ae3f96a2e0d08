//! The persistence seam.
//!
//! The store never performs I/O itself; a [`SaveDriver`] supplied at build
//! time owns serialization targets (disk, network, a database row). Save and
//! load are explicit calls on the store, and dirty bookkeeping uses a
//! generation counter so a save that raced a newer mutation does not mark
//! the store clean.

use async_trait::async_trait;
use serde_json::Value;

/// External persistence collaborator.
///
/// Implementations receive the canonical document, never the typed state, so
/// a driver can be written once and reused across stores.
#[async_trait]
pub trait SaveDriver: Send + Sync + 'static {
    /// Persist the document.
    async fn save(&self, state: Value) -> anyhow::Result<()>;

    /// Fetch the previously persisted document.
    async fn load(&self) -> anyhow::Result<Value>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! In-memory driver for tests.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::SaveDriver;

    /// Stores the last saved document in memory and counts saves.
    #[derive(Default)]
    pub struct InMemoryDriver {
        stored: Mutex<Option<Value>>,
        save_count: AtomicUsize,
        fail: AtomicBool,
    }

    impl InMemoryDriver {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed the stored document, as if a prior session had saved it.
        pub fn with_stored(value: Value) -> Self {
            Self {
                stored: Mutex::new(Some(value)),
                ..Self::default()
            }
        }

        /// Make subsequent save/load calls fail.
        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn save_count(&self) -> usize {
            self.save_count.load(Ordering::SeqCst)
        }

        pub fn stored(&self) -> Option<Value> {
            self.stored.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SaveDriver for InMemoryDriver {
        async fn save(&self, state: Value) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("save driver failure (injected)");
            }
            *self.stored.lock().unwrap() = Some(state);
            self.save_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn load(&self) -> anyhow::Result<Value> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("load driver failure (injected)");
            }
            self.stored
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("nothing persisted yet"))
        }
    }

}
