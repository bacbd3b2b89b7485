use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use kubepulse_types::EventRecord;

/// Bounded working set of events for one context
#[derive(Clone)]
pub struct EventBuffer {
    /// Internal storage, oldest first
    entries: Arc<RwLock<VecDeque<EventRecord>>>,

    /// Maximum capacity
    capacity: usize,
}

impl EventBuffer {
    /// Create a new event buffer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Rebuild the working set from a fresh result, oldest first.
    /// Only the newest `capacity` records survive.
    pub fn replace(&self, records: Vec<EventRecord>) {
        let skip = records.len().saturating_sub(self.capacity);
        let mut entries = self.entries.write();
        entries.clear();
        entries.extend(records.into_iter().skip(skip));
    }

    /// Get all entries (cloned for rendering)
    pub fn all(&self) -> Vec<EventRecord> {
        self.entries.read().iter().cloned().collect()
    }

}
