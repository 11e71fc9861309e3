//! Unseen-message ledger.
//!
//! Tracks, per counterpart, how many messages arrived since that counterpart
//! was last made active or marked seen. The count for the active counterpart
//! is always zero at rest; the engine enforces this by marking seen on
//! selection and on receipt of a message from the open conversation.

use std::collections::HashMap;

use chat_types::UserId;

/// Mapping from counterpart id to a non-negative unseen count.
#[derive(Debug, Clone, Default)]
pub struct UnseenLedger {
    counts: HashMap<UserId, u32>,
}

impl UnseenLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the unseen count for a counterpart (0 if never recorded).
    pub fn count(&self, counterpart: &UserId) -> u32 {
        self.counts.get(counterpart).copied().unwrap_or(0)
    }

    /// Zero the count for a counterpart. Idempotent.
    pub fn mark_seen(&mut self, counterpart: &UserId) {
        self.counts.insert(*counterpart, 0);
    }

    /// Increment the count for a counterpart by exactly 1.
    pub fn increment(&mut self, counterpart: &UserId) {
        let count = self.counts.entry(*counterpart).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Snapshot of all non-zero counts.
    pub fn counts(&self) -> HashMap<UserId, u32> {
        self.counts
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(id, &count)| (*id, count))
            .collect()
    }

    /// Drop every count. Used on session teardown only.
    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
