//! Per-item action history.
//!
//! An in-memory, bounded log of what happened to each item. It backs the
//! history read surface only and is never persisted; entries for evicted
//! items are pruned by the retention sweep.

use crate::config::DEFAULT_MAX_HISTORY;
use crate::current_timestamp_millis;
use crate::models::{ActionLogEntry, ItemId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bounded action history keyed by item id.
#[derive(Debug)]
pub struct ActionLog {
    entries: Mutex<HashMap<ItemId, VecDeque<ActionLogEntry>>>,
    max_entries: usize,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl ActionLog {
    /// Creates a log keeping at most `max_entries` entries per item.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ItemId, VecDeque<ActionLogEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an entry stamped with the current time and returns it.
    ///
    /// The oldest entry is dropped once the per-item cap is reached.
    pub fn record(&self, id: ItemId, action: &str, actor: &str) -> ActionLogEntry {
        let entry = ActionLogEntry::new(current_timestamp_millis(), action, actor);
        if self.max_entries == 0 {
            return entry;
        }

        let mut entries = self.lock();
        let log = entries.entry(id).or_default();
        while log.len() >= self.max_entries {
            log.pop_front();
        }
        log.push_back(entry.clone());
        entry
    }

    /// Returns the entries for `id`, oldest first.
    #[must_use]
    pub fn history(&self, id: ItemId) -> Vec<ActionLogEntry> {
        self.lock()
            .get(&id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops the history of every id in `ids`.
    pub fn prune(&self, ids: &[ItemId]) {
        let mut entries = self.lock();
        for id in ids {
            entries.remove(id);
        }
    }

    /// Drops the history of every id for which `keep` returns false.
    ///
    /// Returns the number of histories dropped.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(ItemId) -> bool,
    {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|id, _| keep(*id));
        before - entries.len()
    }

    /// Returns the number of items with at least one entry.
    #[must_use]
    pub fn tracked_items(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_ordered_and_capped() {
        let log = ActionLog::new(3);
        let id = ItemId::new(7);
        for action in ["CRAFTED", "PICKUP", "DROP", "TRADE"] {
            log.record(id, action, "alice");
        }

        let actions: Vec<_> = log.history(id).into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["PICKUP", "DROP", "TRADE"]);
    }

    #[test]
    fn test_unknown_id_has_empty_history() {
        assert!(ActionLog::default().history(ItemId::new(1)).is_empty());
    }

    #[test]
    fn test_prune_removes_only_named_ids() {
        let log = ActionLog::default();
        log.record(ItemId::new(1), "CRAFTED", "alice");
        log.record(ItemId::new(2), "CRAFTED", "bob");

        log.prune(&[ItemId::new(1)]);

        assert!(log.history(ItemId::new(1)).is_empty());
        assert_eq!(log.history(ItemId::new(2)).len(), 1);
        assert_eq!(log.tracked_items(), 1);
    }

    #[test]
    fn test_zero_cap_keeps_nothing() {
        let log = ActionLog::new(0);
        log.record(ItemId::new(1), "CRAFTED", "alice");
        assert!(log.history(ItemId::new(1)).is_empty());
    }

    #[test]
    fn test_retain_drops_unknown_ids() {
        let log = ActionLog::new(5);
        for raw in 0..10 {
            log.record(ItemId::new(raw), "PICKUP", "alice");
        }

        let dropped = log.retain(|id| id.get() % 2 == 0);

        assert_eq!(dropped, 5);
        assert_eq!(log.tracked_items(), 5);
        assert!(log.history(ItemId::new(3)).is_empty());
        assert_eq!(log.history(ItemId::new(4)).len(), 1);
    }
}
