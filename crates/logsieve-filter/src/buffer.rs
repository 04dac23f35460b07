use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use logsieve_types::StreamEntry;

/// Entries are shared with readers without cloning the strings
pub type ArcStreamEntry = Arc<StreamEntry>;

/// Thread-safe ring buffer holding the most recent entries
#[derive(Clone)]
pub struct LogBuffer {
    /// Internal storage
    entries: Arc<RwLock<VecDeque<ArcStreamEntry>>>,

    /// Maximum capacity
    capacity: usize,
}

impl LogBuffer {
    /// Create a new log buffer with the given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Push a new entry, evicting oldest if at capacity
    pub fn push(&self, entry: StreamEntry) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Arc::new(entry));
    }

    /// Oldest-first copy of the retained entries (Arc clones are cheap)
    pub fn snapshot(&self) -> Vec<ArcStreamEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entry count
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
