//! Test doubles, available to downstream crates via the `testing` feature.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::schedule::Clock;

/// A clock that only moves when told to.
///
/// Share it (via `Arc`) between the test and the store under test, then
/// `advance` past the notify delay to make debounced broadcasts due.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute offset from the origin.
    pub fn set(&self, to: Duration) {
        self.millis.store(to.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_only_on_demand() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(10));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(15));
        clock.set(Duration::from_millis(3));
        assert_eq!(clock.now(), Duration::from_millis(3));
    }
}
