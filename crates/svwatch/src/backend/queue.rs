//! Head-addressed queue of pending subscription ids.

use super::SubscriptionId;

/// Growable queue of subscription ids with a head cursor.
///
/// Entries between the head and the end are pending. Acknowledging moves the
/// head forward; once everything is acknowledged the storage is reset.
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    ids: Vec<SubscriptionId>,
    head: usize,
}

impl PendingQueue {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ids: Vec::new(),
            head: 0,
        }
    }

    /// Appends an id. Duplicates are kept.
    pub fn push(&mut self, id: SubscriptionId) {
        self.ids.push(id);
    }

    /// Number of pending entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.ids.len().saturating_sub(self.head)
    }

    /// Returns `true` when nothing is pending.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending entry at `index`, counted from the head.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<SubscriptionId> {
        self.ids.get(self.head.checked_add(index)?).copied()
    }

    /// Drops up to `count` entries from the head.
    pub fn acknowledge(&mut self, count: usize) {
        self.head = self.head.saturating_add(count).min(self.ids.len());
        if self.head == self.ids.len() {
            self.ids.clear();
            self.head = 0;
        }
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.head = 0;
    }
}
