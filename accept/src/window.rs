use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::EventId;

/// Identifiers accepted during the current aggregation window.
///
/// Every operation runs under the same exclusive lock, so a `record` racing
/// a `drain` lands entirely before or entirely after it. The lock is never
/// held across an await point.
#[derive(Debug, Default)]
pub struct WindowCounter {
    state: Mutex<WindowState>,
}

#[derive(Debug, Default)]
struct WindowState {
    ids: HashSet<EventId>,
    last_drained: Option<u64>,
}

impl WindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation is a single step on the set, so a panic elsewhere cannot
    // leave it half-updated and the poison flag can be ignored.
    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `id` to the current window. Returns false if it was already
    /// there, in which case nothing changes.
    pub fn record(&self, id: EventId) -> bool {
        self.lock().ids.insert(id)
    }

    /// Number of distinct identifiers recorded since the last drain.
    pub fn snapshot_count(&self) -> u64 {
        self.lock().ids.len() as u64
    }

    /// Reads the window cardinality and starts a new, empty window in one
    /// critical section.
    pub fn drain(&self) -> u64 {
        let mut state = self.lock();
        let count = std::mem::take(&mut state.ids).len() as u64;
        state.last_drained = Some(count);
        count
    }

    /// Count returned by the most recent drain, if any.
    pub fn last_drained(&self) -> Option<u64> {
        self.lock().last_drained
    }
}
