//! Completion accounting for one run.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use docflow_shared::EventType;

/// Counts reported by the tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerCounts {
    pub pending: usize,
    pub created: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    /// Ids published or announced by CREATE and not yet resolved.
    pending: HashMap<String, usize>,
    /// Ids whose terminal event arrived before their CREATE.
    early: HashMap<String, usize>,
    pending_len: usize,
    created: u64,
    succeeded: u64,
    failed: u64,
    dropped: u64,
}

fn insert(bag: &mut HashMap<String, usize>, id: &str) {
    *bag.entry(id.to_string()).or_insert(0) += 1;
}

/// Remove one occurrence of `id`; false if there was none.
fn remove_one(bag: &mut HashMap<String, usize>, id: &str) -> bool {
    match bag.get_mut(id) {
        Some(count) if *count > 1 => {
            *count -= 1;
            true
        }
        Some(_) => {
            bag.remove(id);
            true
        }
        None => false,
    }
}

/// Pending and early-completion multisets behind one lock.
///
/// Every method is atomic on its own; nothing is atomic across calls, so a
/// pending count read by a caller may already be stale.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    state: Mutex<TrackerState>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start tracking a published document.
    pub fn track(&self, id: &str) {
        let mut state = self.lock();
        insert(&mut state.pending, id);
        state.pending_len += 1;
    }

    /// Undo [`track`](Self::track) for a document that never left.
    pub fn untrack(&self, id: &str) -> bool {
        let mut state = self.lock();
        let removed = remove_one(&mut state.pending, id);
        if removed {
            state.pending_len -= 1;
        }
        removed
    }

    /// A CREATE either cancels an early completion or starts tracking the child.
    pub fn record_create(&self, id: &str) {
        let mut state = self.lock();
        state.created += 1;
        if !remove_one(&mut state.early, id) {
            insert(&mut state.pending, id);
            state.pending_len += 1;
        }
    }

    /// Record a terminal event. Returns true if it resolved a pending entry;
    /// otherwise the id is remembered as completed early.
    ///
    /// Counters are incremented on every call, including redundant events.
    pub fn record_terminal(&self, id: &str, event_type: EventType) -> bool {
        let mut state = self.lock();
        match event_type {
            EventType::Finish => state.succeeded += 1,
            EventType::Fail => state.failed += 1,
            EventType::Drop => state.dropped += 1,
            EventType::Create => {}
        }

        if remove_one(&mut state.pending, id) {
            state.pending_len -= 1;
            true
        } else {
            insert(&mut state.early, id);
            false
        }
    }

    pub fn num_pending(&self) -> usize {
        self.lock().pending_len
    }

    pub fn has_pending(&self) -> bool {
        self.num_pending() > 0
    }

    /// Ids completed before their CREATE and still waiting for it.
    pub fn num_early(&self) -> usize {
        self.lock().early.values().sum()
    }

    pub fn counts(&self) -> TrackerCounts {
        let state = self.lock();
        TrackerCounts {
            pending: state.pending_len,
            created: state.created,
            succeeded: state.succeeded,
            failed: state.failed,
            dropped: state.dropped,
        }
    }
}
