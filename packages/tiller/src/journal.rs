//! The history journal: a bounded, cursor-addressed sequence of snapshots.
//!
//! Each committed transition records a [`Snapshot`] pairing the forward
//! patches (replay) with the inverse patches (unwind). The journal owns its
//! snapshots exclusively; evicted entries are dropped and unreachable.
//!
//! # Cursor Invariants
//!
//! - `cursor == -1` when nothing is undoable (empty journal, or fully
//!   undone)
//! - `cursor < len` always
//! - `can_undo ⇔ cursor >= 0`
//! - `can_redo ⇔ cursor < len - 1`
//!
//! Recording while `cursor < len - 1` prunes every snapshot past the cursor:
//! history is linear, there is no branching. Exceeding the cap evicts the
//! oldest snapshot and shifts the cursor down so it stays valid.
//!
//! Cursor moves are split into peek/commit pairs because the engine must
//! validate the reconstructed state *before* the move becomes observable.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::MutationId;
use crate::patch::Patch;

/// Default journal cap.
pub const DEFAULT_MAX_HISTORY: usize = 50;

// =============================================================================
// Snapshot
// =============================================================================

/// One journal entry: the patch pair for a single committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Identity of the transition that produced this entry.
    pub id: MutationId,
    /// Patches that replay the transition.
    pub forward: Vec<Patch>,
    /// Patches that unwind the transition.
    pub inverse: Vec<Patch>,
    /// When the transition committed.
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied description, if any.
    pub description: Option<String>,
}

impl Snapshot {
    /// Rough in-memory footprint, for history accounting.
    pub fn approx_size(&self) -> usize {
        let patches = self
            .forward
            .iter()
            .chain(&self.inverse)
            .map(Patch::approx_size)
            .sum::<usize>();
        let description = self.description.as_deref().map_or(0, str::len);
        patches + description + 64
    }
}

// =============================================================================
// History Info
// =============================================================================

/// Point-in-time view of the journal, computed fresh on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryInfo {
    /// Whether an undo is currently possible.
    pub can_undo: bool,
    /// Whether a redo is currently possible.
    pub can_redo: bool,
    /// Number of retained snapshots.
    pub length: usize,
    /// Cursor position (`-1` when nothing is undoable).
    pub cursor: isize,
    /// Description of the snapshot at the cursor.
    pub last_description: Option<String>,
    /// Approximate bytes retained by the journal.
    pub memory_usage: usize,
}

// =============================================================================
// Journal
// =============================================================================

/// Bounded, append-only history with a navigation cursor.
#[derive(Debug)]
pub(crate) struct Journal {
    entries: VecDeque<Snapshot>,
    cursor: isize,
    cap: usize,
}

impl Journal {
    /// Create an empty journal. A cap of zero disables journaling entirely.
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: -1,
            cap,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.cursor >= 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len() as isize
    }

    /// Append a snapshot, pruning the redo branch and evicting past the cap.
    pub fn record(&mut self, snapshot: Snapshot) {
        if self.cap == 0 {
            return;
        }
        let keep = (self.cursor + 1) as usize;
        if keep < self.entries.len() {
            self.entries.truncate(keep);
        }
        self.entries.push_back(snapshot);
        self.cursor += 1;
        if self.entries.len() > self.cap {
            self.entries.pop_front();
            self.cursor -= 1;
        }
        debug_assert!(self.cursor < self.entries.len() as isize);
    }

    /// The snapshot an undo would unwind, without moving the cursor.
    pub fn peek_undo(&self) -> Option<&Snapshot> {
        if self.cursor >= 0 {
            self.entries.get(self.cursor as usize)
        } else {
            None
        }
    }

    /// The snapshot a redo would replay, without moving the cursor.
    pub fn peek_redo(&self) -> Option<&Snapshot> {
        let next = self.cursor + 1;
        if next < self.entries.len() as isize {
            self.entries.get(next as usize)
        } else {
            None
        }
    }

    /// Commit a previously peeked undo: the cursor steps back.
    pub fn commit_undo(&mut self) {
        debug_assert!(self.can_undo());
        self.cursor -= 1;
    }

    /// Commit a previously peeked redo: the cursor steps forward.
    pub fn commit_redo(&mut self) {
        debug_assert!(self.can_redo());
        self.cursor += 1;
    }

    /// The snapshot at the cursor, if any.
    pub fn current(&self) -> Option<&Snapshot> {
        self.peek_undo()
    }

    /// Drop every snapshot and reset the cursor. The live state is not this
    /// module's concern and is untouched.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = -1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn info(&self) -> HistoryInfo {
        HistoryInfo {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            length: self.entries.len(),
            cursor: self.cursor,
            last_description: self.current().and_then(|s| s.description.clone()),
            memory_usage: self.entries.iter().map(Snapshot::approx_size).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Path;
    use serde_json::json;

    fn snapshot(description: &str) -> Snapshot {
        Snapshot {
            id: MutationId::new(),
            forward: vec![Patch::Replace {
                path: Path::root().key("v"),
                value: json!(1),
            }],
            inverse: vec![Patch::Replace {
                path: Path::root().key("v"),
                value: json!(0),
            }],
            timestamp: Utc::now(),
            description: Some(description.to_string()),
        }
    }

    #[test]
    fn test_empty_journal() {
        let journal = Journal::new(10);
        assert!(!journal.can_undo());
        assert!(!journal.can_redo());
        let info = journal.info();
        assert_eq!(info.cursor, -1);
        assert_eq!(info.length, 0);
        assert_eq!(info.last_description, None);
    }

    #[test]
    fn test_record_advances_cursor() {
        let mut journal = Journal::new(10);
        journal.record(snapshot("one"));
        journal.record(snapshot("two"));
        let info = journal.info();
        assert_eq!(info.cursor, 1);
        assert_eq!(info.length, 2);
        assert!(info.can_undo);
        assert!(!info.can_redo);
        assert_eq!(info.last_description.as_deref(), Some("two"));
    }

    #[test]
    fn test_undo_redo_cursor_moves() {
        let mut journal = Journal::new(10);
        journal.record(snapshot("one"));
        journal.record(snapshot("two"));

        assert_eq!(
            journal.peek_undo().unwrap().description.as_deref(),
            Some("two")
        );
        journal.commit_undo();
        assert!(journal.can_redo());
        assert_eq!(
            journal.peek_redo().unwrap().description.as_deref(),
            Some("two")
        );
        journal.commit_redo();
        assert!(!journal.can_redo());
    }

    #[test]
    fn test_record_prunes_redo_branch() {
        let mut journal = Journal::new(10);
        journal.record(snapshot("one"));
        journal.record(snapshot("two"));
        journal.record(snapshot("three"));
        journal.commit_undo();
        journal.commit_undo();
        assert!(journal.can_redo());

        journal.record(snapshot("fork"));
        assert!(!journal.can_redo());
        let info = journal.info();
        assert_eq!(info.length, 2);
        assert_eq!(info.last_description.as_deref(), Some("fork"));
    }

    #[test]
    fn test_cap_evicts_oldest_and_shifts_cursor() {
        let mut journal = Journal::new(3);
        for name in ["a", "b", "c", "d", "e"] {
            journal.record(snapshot(name));
        }
        let info = journal.info();
        assert_eq!(info.length, 3);
        assert_eq!(info.cursor, 2);
        // Only the three newest survive.
        assert_eq!(info.last_description.as_deref(), Some("e"));
        journal.commit_undo();
        journal.commit_undo();
        assert_eq!(
            journal.peek_undo().unwrap().description.as_deref(),
            Some("c")
        );
    }

    #[test]
    fn test_zero_cap_disables_journaling() {
        let mut journal = Journal::new(0);
        journal.record(snapshot("ignored"));
        assert_eq!(journal.len(), 0);
        assert!(!journal.can_undo());
    }

    #[test]
    fn test_clear_resets_cursor() {
        let mut journal = Journal::new(10);
        journal.record(snapshot("one"));
        journal.clear();
        assert_eq!(journal.len(), 0);
        assert!(!journal.can_undo());
        assert_eq!(journal.info().cursor, -1);
    }

    #[test]
    fn test_memory_usage_tracks_entries() {
        let mut journal = Journal::new(10);
        assert_eq!(journal.info().memory_usage, 0);
        journal.record(snapshot("one"));
        let one = journal.info().memory_usage;
        assert!(one > 0);
        journal.record(snapshot("two"));
        assert!(journal.info().memory_usage > one);
    }
}
