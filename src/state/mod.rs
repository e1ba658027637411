//! Last historical-data result per conversation
//!
//! Backs the zero-argument `last_history` capability. One slot per thread,
//! last write wins, no expiry of its own: entries go away when the owning
//! conversation ends or is evicted.

use dashmap::DashMap;

/// Text returned when a thread has not fetched any history yet.
pub const NO_PREVIOUS_HISTORY: &str = "No previous history available";

/// Thread-scoped store of the most recent `historical_price` payload.
#[derive(Debug, Default)]
pub struct LastResultCache {
    slots: DashMap<String, String>,
}

impl LastResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the thread's slot.
    pub fn set(&self, thread_id: &str, text: impl Into<String>) {
        self.slots.insert(thread_id.to_string(), text.into());
    }

    /// Stored text, or [`NO_PREVIOUS_HISTORY`].
    pub fn get(&self, thread_id: &str) -> String {
        self.slots
            .get(thread_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| NO_PREVIOUS_HISTORY.to_string())
    }

    pub fn forget(&self, thread_id: &str) -> bool {
        self.slots.remove(thread_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
