//! Concurrent in-memory index of tracked records.
//!
//! # Locking
//!
//! One mutex covers both the id index and the type-count aggregate. Every
//! mutation and every full-table scan takes it, so a fingerprint scan sees a
//! consistent table and concurrent registrations wait for the scan to finish.
//! Scans are bounded because the periodic retention sweep keeps the table
//! near its capacity.
//!
//! # Lock Poisoning
//!
//! A poisoned lock is recovered rather than propagated. Each critical
//! section leaves the table consistent at every await-free step, so the data
//! behind a poisoned lock is still valid.

use crate::models::{ItemId, TrackedRecord};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Initial map capacity, sized for a busy node.
const INITIAL_CAPACITY: usize = 16_384;

/// A record plus the content type it was registered with.
///
/// The type is known only for records registered by this process; records
/// restored from a snapshot carry `None`.
#[derive(Debug, Clone)]
struct StoreEntry {
    record: TrackedRecord,
    kind: Option<String>,
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<ItemId, StoreEntry>,
    type_counts: HashMap<String, u64>,
}

impl StoreInner {
    fn scan(&self, fingerprint: &str, excluding: Option<ItemId>, limit: usize) -> Vec<TrackedRecord> {
        self.records
            .values()
            .filter(|entry| Some(entry.record.id) != excluding)
            .filter(|entry| entry.record.fingerprint == fingerprint)
            .take(limit)
            .map(|entry| entry.record.clone())
            .collect()
    }

    fn count_added(&mut self, kind: Option<&str>) {
        if let Some(kind) = kind {
            *self.type_counts.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    fn count_removed(&mut self, kind: Option<&str>) {
        let Some(kind) = kind else {
            return;
        };
        if let Some(count) = self.type_counts.get_mut(kind) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.type_counts.remove(kind);
            }
        }
    }
}

/// Lock-guarded store of tracked records.
///
/// The store exclusively owns every record; callers only ever receive clones.
#[derive(Debug)]
pub struct ItemStore {
    inner: Mutex<StoreInner>,
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                records: HashMap::with_capacity(INITIAL_CAPACITY),
                type_counts: HashMap::with_capacity(256),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces a record.
    ///
    /// `kind` is the content type to count the record under, if known.
    pub fn put(&self, record: TrackedRecord, kind: Option<&str>) {
        let mut inner = self.lock();
        let entry = StoreEntry {
            record,
            kind: kind.map(ToString::to_string),
        };
        if let Some(previous) = inner.records.insert(entry.record.id, entry) {
            inner.count_removed(previous.kind.as_deref());
        }
        inner.count_added(kind);
    }

    /// Inserts a record only if its id is unused.
    ///
    /// Returns `false` and leaves the store untouched if the id already exists.
    /// Capacity is not checked here; the retention sweep enforces it later.
    pub fn insert_new(&self, record: TrackedRecord, kind: &str) -> bool {
        let mut inner = self.lock();
        if inner.records.contains_key(&record.id) {
            return false;
        }
        inner.records.insert(
            record.id,
            StoreEntry {
                record,
                kind: Some(kind.to_string()),
            },
        );
        inner.count_added(Some(kind));
        true
    }

    /// Returns a copy of the record with the given id.
    #[must_use]
    pub fn get(&self, id: ItemId) -> Option<TrackedRecord> {
        self.lock().records.get(&id).map(|entry| entry.record.clone())
    }

    /// Returns true if a record with the given id exists.
    #[must_use]
    pub fn contains(&self, id: ItemId) -> bool {
        self.lock().records.contains_key(&id)
    }

    /// Scans the whole table for records with `fingerprint`.
    ///
    /// The record with id `excluding` is skipped. At most `limit` records are
    /// returned, in no particular order.
    #[must_use]
    pub fn find_by_fingerprint(
        &self,
        fingerprint: &str,
        excluding: Option<ItemId>,
        limit: usize,
    ) -> Vec<TrackedRecord> {
        if limit == 0 {
            return Vec::new();
        }
        self.lock().scan(fingerprint, excluding, limit)
    }

    /// Returns up to `limit` records sharing the fingerprint of `id`,
    /// excluding `id` itself.
    ///
    /// The target is resolved and the table scanned under one lock, so a
    /// concurrent eviction cannot land between the two. `None` if `id` is
    /// unknown.
    #[must_use]
    pub fn find_duplicates_of(&self, id: ItemId, limit: usize) -> Option<Vec<TrackedRecord>> {
        let inner = self.lock();
        let target = inner.records.get(&id)?;
        if limit == 0 {
            return Some(Vec::new());
        }
        Some(inner.scan(&target.record.fingerprint, Some(id), limit))
    }

    /// Returns an independent copy of the type-count aggregate.
    #[must_use]
    pub fn snapshot_type_counts(&self) -> HashMap<String, u64> {
        self.lock().type_counts.clone()
    }

    /// Returns a point-in-time copy of every record.
    #[must_use]
    pub fn snapshot_records(&self) -> Vec<TrackedRecord> {
        self.lock()
            .records
            .values()
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Replaces the whole record set, e.g. with the contents of a snapshot.
    ///
    /// Restored records have no known type, so the type-count aggregate is
    /// reset. Later duplicates of an id win.
    pub fn replace_all(&self, records: Vec<TrackedRecord>) {
        let mut inner = self.lock();
        inner.records.clear();
        inner.type_counts.clear();
        for record in records {
            inner
                .records
                .insert(record.id, StoreEntry { record, kind: None });
        }
    }

    /// Removes every record created before `cutoff_ms`.
    ///
    /// Returns the evicted ids.
    pub fn evict_older_than(&self, cutoff_ms: u64) -> Vec<ItemId> {
        let mut inner = self.lock();
        let expired: Vec<ItemId> = inner
            .records
            .values()
            .filter(|entry| entry.record.is_older_than(cutoff_ms))
            .map(|entry| entry.record.id)
            .collect();

        for id in &expired {
            if let Some(entry) = inner.records.remove(id) {
                inner.count_removed(entry.kind.as_deref());
            }
        }
        expired
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(id: u64, fingerprint: &str, created_at: u64) -> TrackedRecord {
        TrackedRecord::new(ItemId::new(id), fingerprint, created_at, "alice")
    }

    #[test]
    fn test_insert_new_refuses_existing_id() {
        let store = ItemStore::new();
        assert!(store.insert_new(record(1, "aa", 10), "STONE"));
        assert!(!store.insert_new(record(1, "bb", 20), "DIRT"));

        let stored = store.get(ItemId::new(1)).expect("record present");
        assert_eq!(stored.fingerprint, "aa");
        assert_eq!(store.snapshot_type_counts().get("DIRT"), None);
        assert_eq!(store.snapshot_type_counts().get("STONE"), Some(&1));
    }

    #[test]
    fn test_put_replaces_and_recounts() {
        let store = ItemStore::new();
        store.put(record(1, "aa", 10), Some("STONE"));
        store.put(record(1, "aa", 10), Some("DIRT"));

        let counts = store.snapshot_type_counts();
        assert_eq!(counts.get("STONE"), None);
        assert_eq!(counts.get("DIRT"), Some(&1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_find_by_fingerprint_excludes_and_caps() {
        let store = ItemStore::new();
        for id in 1..=10 {
            store.put(record(id, "same", id), Some("STONE"));
        }
        store.put(record(11, "other", 11), Some("STONE"));

        let all = store.find_by_fingerprint("same", Some(ItemId::new(3)), 100);
        assert_eq!(all.len(), 9);
        assert!(all.iter().all(|r| r.id != ItemId::new(3)));
        assert!(all.iter().all(|r| r.fingerprint == "same"));

        let capped = store.find_by_fingerprint("same", None, 4);
        assert_eq!(capped.len(), 4);

        assert!(store.find_by_fingerprint("same", None, 0).is_empty());
        assert!(store.find_by_fingerprint("missing", None, 10).is_empty());
    }

    #[test]
    fn test_find_duplicates_of_resolves_target() {
        let store = ItemStore::new();
        for id in 1..=6 {
            store.put(record(id, "same", id), Some("STONE"));
        }
        store.put(record(7, "other", 7), Some("STONE"));

        let found = store.find_duplicates_of(ItemId::new(2), 100).expect("known id");
        assert_eq!(found.len(), 5);
        assert!(found.iter().all(|r| r.id != ItemId::new(2) && r.fingerprint == "same"));

        assert_eq!(store.find_duplicates_of(ItemId::new(2), 3).map(|r| r.len()), Some(3));
        assert_eq!(store.find_duplicates_of(ItemId::new(7), 100), Some(Vec::new()));
        assert_eq!(store.find_duplicates_of(ItemId::new(2), 0), Some(Vec::new()));
        assert_eq!(store.find_duplicates_of(ItemId::new(99), 100), None);
    }

    #[test]
    fn test_find_duplicates_of_during_eviction() {
        let store = Arc::new(ItemStore::new());
        for id in 0..50 {
            store.put(record(id, "same", id), Some("STONE"));
        }

        let evictor = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for cutoff in 1..=49 {
                    store.evict_older_than(cutoff);
                }
            })
        };
        for _ in 0..200 {
            let target = ItemId::new(49);
            let found = store.find_duplicates_of(target, 100).expect("newest survives");
            assert!(found.iter().all(|r| r.id != target && r.fingerprint == "same"));
        }
        evictor.join().expect("thread finished");

        assert_eq!(store.find_duplicates_of(ItemId::new(49), 100), Some(Vec::new()));
        assert_eq!(store.find_duplicates_of(ItemId::new(0), 100), None);
    }

    #[test]
    fn test_type_counts_are_a_copy() {
        let store = ItemStore::new();
        store.put(record(1, "aa", 1), Some("STONE"));

        let mut counts = store.snapshot_type_counts();
        counts.insert("STONE".to_string(), 99);

        assert_eq!(store.snapshot_type_counts().get("STONE"), Some(&1));
    }

    #[test]
    fn test_replace_all_resets_counts() {
        let store = ItemStore::new();
        store.put(record(1, "aa", 1), Some("STONE"));

        store.replace_all(vec![record(2, "bb", 2), record(3, "cc", 3)]);

        assert!(store.get(ItemId::new(1)).is_none());
        assert_eq!(store.len(), 2);
        assert!(store.snapshot_type_counts().is_empty());
    }

    #[test]
    fn test_evict_older_than_decrements_known_kinds() {
        let store = ItemStore::new();
        store.put(record(1, "aa", 100), Some("STONE"));
        store.put(record(2, "bb", 200), Some("STONE"));
        store.put(record(3, "cc", 300), Some("DIRT"));
        store.put(record(4, "dd", 50), None);

        let mut evicted = store.evict_older_than(250);
        evicted.sort();

        assert_eq!(evicted, vec![ItemId::new(1), ItemId::new(2), ItemId::new(4)]);
        assert_eq!(store.len(), 1);
        let counts = store.snapshot_type_counts();
        assert_eq!(counts.get("STONE"), None);
        assert_eq!(counts.get("DIRT"), Some(&1));
    }

    #[test]
    fn test_concurrent_inserts_lose_nothing() {
        let store = Arc::new(ItemStore::new());
        let handles: Vec<_> = (0..8u64)
            .map(|thread| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..250u64 {
                        let id = thread * 1_000 + i;
                        store.insert_new(record(id, &format!("fp-{id}"), id), "STONE");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread finished");
        }

        assert_eq!(store.len(), 2_000);
        assert_eq!(store.snapshot_type_counts().get("STONE"), Some(&2_000));
    }
}
