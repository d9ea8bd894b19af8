use std::collections::VecDeque;

/// Default number of entries kept by channel and callback audit logs.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Bounded, append-only record of recent activity.
///
/// Once `capacity` entries are held, each push evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct AuditLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> AuditLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for AuditLog<T> {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
