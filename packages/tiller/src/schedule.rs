//! Debounced notification of plain state subscribers.
//!
//! Plain subscribers (distinct from lifecycle listeners) receive the latest
//! state via a trailing-edge debounce: every commit re-arms a single
//! deadline, so several mutations in a tight loop coalesce into one
//! broadcast. A new subscription synchronously receives one immediate
//! callback with the current state, so consumers never observe "no value
//! yet".
//!
//! # Cooperative Delivery
//!
//! Scheduling is measured against an injected [`Clock`] and the pending
//! deadline is an explicit handle owned by the store: re-armed on each
//! commit, cancelled on teardown. Due broadcasts are flushed at the top of
//! every store operation; an event loop that wants delivery without further
//! store calls can poll `notifications_due_in` and call
//! `flush_notifications`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Default trailing-edge debounce delay.
pub const DEFAULT_NOTIFY_DELAY: Duration = Duration::from_millis(16);

// =============================================================================
// Clock
// =============================================================================

/// Monotonic time source for debounce scheduling.
///
/// Reports elapsed time since the clock's own origin. The default is the
/// system monotonic clock; tests inject a manually advanced one.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Duration;
}

/// System monotonic clock.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// A clock originating now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

// =============================================================================
// Subscriber Id
// =============================================================================

/// Handle identifying one plain state subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

// =============================================================================
// Notify Queue
// =============================================================================

/// Subscriber registry plus the single pending-broadcast deadline.
pub(crate) struct NotifyQueue<T> {
    subscribers: Vec<(SubscriberId, Box<dyn FnMut(&T)>)>,
    next_id: u64,
    delay: Duration,
    deadline: Option<Duration>,
}

impl<T> NotifyQueue<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
            delay,
            deadline: None,
        }
    }

    /// Register a subscriber and deliver the current state immediately.
    pub fn subscribe(
        &mut self,
        mut listener: Box<dyn FnMut(&T)>,
        current: &T,
    ) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        if catch_unwind(AssertUnwindSafe(|| listener(current))).is_err() {
            warn!("state subscriber panicked during the immediate callback");
        }
        self.subscribers.push((id, listener));
        id
    }

    /// Remove a subscriber. Returns whether it existed.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// Re-arm the trailing-edge deadline after a commit.
    pub fn mark_changed(&mut self, now: Duration) {
        self.deadline = Some(now + self.delay);
    }

    /// Whether a broadcast is pending.
    pub fn pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the pending broadcast is due at `now`.
    pub fn due(&self, now: Duration) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Time until the pending broadcast, if any.
    pub fn due_in(&self, now: Duration) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_sub(now))
    }

    /// Deliver the pending broadcast now.
    pub fn fire(&mut self, state: &T) {
        self.deadline = None;
        debug!(subscribers = self.subscribers.len(), "broadcasting coalesced state change");
        for (_, listener) in self.subscribers.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
                warn!("state subscriber panicked; siblings continue");
            }
        }
    }

    /// Cancel any pending broadcast without delivering it.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Drop all subscribers (teardown).
    pub fn clear(&mut self) {
        self.subscribers.clear();
        self.deadline = None;
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const DELAY: Duration = Duration::from_millis(16);

    fn at(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_subscribe_delivers_immediately() {
        let mut queue: NotifyQueue<i32> = NotifyQueue::new(DELAY);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        queue.subscribe(Box::new(move |s| sink.borrow_mut().push(*s)), &7);
        assert_eq!(seen.borrow().as_slice(), [7]);
    }

    #[test]
    fn test_trailing_edge_coalesces() {
        let mut queue: NotifyQueue<i32> = NotifyQueue::new(DELAY);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        queue.subscribe(Box::new(move |s| sink.borrow_mut().push(*s)), &0);

        // Three rapid commits re-arm the same deadline.
        queue.mark_changed(at(0));
        queue.mark_changed(at(1));
        queue.mark_changed(at(2));
        assert!(!queue.due(at(17))); // last arm was at 2ms → due at 18ms
        assert!(queue.due(at(18)));

        queue.fire(&3);
        assert_eq!(seen.borrow().as_slice(), [0, 3]);
        assert!(!queue.pending());
    }

    #[test]
    fn test_due_in_reports_remaining_time() {
        let mut queue: NotifyQueue<i32> = NotifyQueue::new(DELAY);
        assert_eq!(queue.due_in(at(0)), None);
        queue.mark_changed(at(10));
        assert_eq!(queue.due_in(at(20)), Some(at(6)));
        assert_eq!(queue.due_in(at(30)), Some(Duration::ZERO));
    }

    #[test]
    fn test_cancel_discards_pending() {
        let mut queue: NotifyQueue<i32> = NotifyQueue::new(DELAY);
        queue.mark_changed(at(0));
        queue.cancel();
        assert!(!queue.pending());
        assert!(!queue.due(at(100)));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut queue: NotifyQueue<i32> = NotifyQueue::new(DELAY);
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        let id = queue.subscribe(Box::new(move |_| *sink.borrow_mut() += 1), &0);
        assert_eq!(*count.borrow(), 1);

        assert!(queue.unsubscribe(id));
        queue.mark_changed(at(0));
        queue.fire(&1);
        assert_eq!(*count.borrow(), 1);
        assert!(!queue.unsubscribe(id));
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let mut queue: NotifyQueue<i32> = NotifyQueue::new(DELAY);
        let reached = Rc::new(RefCell::new(0));
        queue.subscribe(Box::new(|s| assert!(*s >= 0)), &0);
        {
            let reached = reached.clone();
            queue.subscribe(
                Box::new(move |s| {
                    if *s > 0 {
                        panic!("subscriber bug")
                    } else {
                        *reached.borrow_mut() += 0
                    }
                }),
                &0,
            );
        }
        {
            let reached = reached.clone();
            queue.subscribe(Box::new(move |_| *reached.borrow_mut() += 1), &0);
        }
        queue.mark_changed(at(0));
        queue.fire(&5);
        // immediate callback (1) + broadcast (1) both reached the last subscriber
        assert_eq!(*reached.borrow(), 2);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
