use crate::types::DeadLetterEntry;
use std::collections::VecDeque;

/// Bounded FIFO of failed dispatches. Oldest entries are evicted once the
/// capacity is exceeded.
pub struct DeadLetterQueue {
    entries: VecDeque<DeadLetterEntry>,
    capacity: usize,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: DeadLetterEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Snapshot for the admin API; the live queue stays untouched.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Empties the queue, returning how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Takes every entry out for a reprocess pass.
    pub fn drain(&mut self) -> Vec<DeadLetterEntry> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
