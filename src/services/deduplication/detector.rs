//! Fingerprint-collision duplicate detection.

use crate::models::{ItemId, NetworkRecord, TrackedRecord};
use crate::storage::ItemStore;
use crate::sync::NodeSync;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, instrument, warn};

use super::config::DEFAULT_MAX_RESULTS;

/// Finds records that share a fingerprint with a given record.
///
/// Two distinct records with equal fingerprints are duplicates; identical
/// content registered twice is indistinguishable from a cloned item, and is
/// treated as one.
pub struct DuplicateDetector {
    store: Arc<ItemStore>,
    sync: Arc<dyn NodeSync>,
    max_results: AtomicUsize,
}

impl DuplicateDetector {
    /// Creates a detector over `store`, asking `sync` for remote matches.
    #[must_use]
    pub fn new(store: Arc<ItemStore>, sync: Arc<dyn NodeSync>) -> Self {
        Self {
            store,
            sync,
            max_results: AtomicUsize::new(DEFAULT_MAX_RESULTS),
        }
    }

    /// Sets the cap on duplicates returned by one scan.
    #[must_use]
    pub fn with_max_results(self, max_results: usize) -> Self {
        self.set_max_results(max_results);
        self
    }

    /// Changes the scan cap at runtime.
    pub fn set_max_results(&self, max_results: usize) {
        self.max_results.store(max_results, Ordering::Relaxed);
    }

    /// Returns the current scan cap.
    #[must_use]
    pub fn max_results(&self) -> usize {
        self.max_results.load(Ordering::Relaxed)
    }

    /// Returns local records sharing `id`'s fingerprint.
    ///
    /// Empty if `id` is unknown. Never contains `id` itself and never exceeds
    /// the scan cap. Order is unspecified.
    #[must_use]
    #[instrument(skip(self), fields(item_id = %id))]
    pub fn find_duplicates(&self, id: ItemId) -> Vec<TrackedRecord> {
        let Some(duplicates) = self.store.find_duplicates_of(id, self.max_results()) else {
            debug!("Unknown id, nothing to compare");
            return Vec::new();
        };

        if !duplicates.is_empty() {
            metrics::counter!("itemtrace_duplicates_detected_total")
                .increment(duplicates.len() as u64);
            debug!(duplicates = duplicates.len(), "Duplicates found");
        }
        duplicates
    }

    /// Returns records on other nodes sharing `id`'s fingerprint.
    ///
    /// Best effort: empty if `id` is unknown or the synchronizer fails.
    pub async fn query_network(&self, id: ItemId) -> Vec<NetworkRecord> {
        let Some(target) = self.store.get(id) else {
            return Vec::new();
        };

        match self.sync.query_network_duplicates(&target.fingerprint).await {
            Ok(records) => records.into_iter().filter(|r| r.id != id).collect(),
            Err(e) => {
                warn!(item_id = %id, error = %e, "Network duplicate query failed");
                Vec::new()
            },
        }
    }
}

impl std::fmt::Debug for DuplicateDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateDetector")
            .field("sync", &self.sync.name())
            .field("max_results", &self.max_results())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{LoopbackHub, LoopbackSync, NoopSync};

    fn record(id: u64, fingerprint: &str) -> TrackedRecord {
        TrackedRecord::new(ItemId::new(id), fingerprint, id, "alice")
    }

    fn detector_with(records: &[TrackedRecord]) -> DuplicateDetector {
        let store = Arc::new(ItemStore::new());
        for r in records {
            store.put(r.clone(), Some("STONE"));
        }
        DuplicateDetector::new(store, Arc::new(NoopSync))
    }

    #[test]
    fn test_pair_sees_each_other() {
        let detector = detector_with(&[record(1, "x"), record(2, "x"), record(3, "y")]);

        assert_eq!(detector.find_duplicates(ItemId::new(1)), vec![record(2, "x")]);
        assert_eq!(detector.find_duplicates(ItemId::new(2)), vec![record(1, "x")]);
        assert!(detector.find_duplicates(ItemId::new(3)).is_empty());
    }

    #[test]
    fn test_unknown_id_is_empty() {
        let detector = detector_with(&[record(1, "x")]);
        assert!(detector.find_duplicates(ItemId::new(99)).is_empty());
    }

    #[test]
    fn test_results_are_capped() {
        let records: Vec<_> = (1..=50).map(|id| record(id, "same")).collect();
        let detector = detector_with(&records).with_max_results(10);

        let found = detector.find_duplicates(ItemId::new(1));
        assert_eq!(found.len(), 10);
        assert!(found.iter().all(|r| r.id != ItemId::new(1)));

        detector.set_max_results(100);
        assert_eq!(detector.find_duplicates(ItemId::new(1)).len(), 49);
    }

    #[tokio::test]
    async fn test_query_network_excludes_self() {
        let hub = LoopbackHub::new();
        let remote = LoopbackSync::new(Arc::clone(&hub), "remote");
        remote
            .publish_fingerprint(ItemId::new(500), "x", "bob", 1)
            .await
            .expect("publish");
        remote
            .publish_fingerprint(ItemId::new(1), "x", "alice", 1)
            .await
            .expect("publish");

        let store = Arc::new(ItemStore::new());
        store.put(record(1, "x"), None);
        let detector = DuplicateDetector::new(store, Arc::new(LoopbackSync::new(hub, "local")));

        let found = detector.query_network(ItemId::new(1)).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ItemId::new(500));
        assert!(detector.query_network(ItemId::new(2)).await.is_empty());
    }

    #[tokio::test]
    async fn test_query_network_failure_is_empty() {
        let hub = LoopbackHub::new();
        hub.set_offline(true);
        let store = Arc::new(ItemStore::new());
        store.put(record(1, "x"), None);
        let detector = DuplicateDetector::new(store, Arc::new(LoopbackSync::new(hub, "local")));

        assert!(detector.query_network(ItemId::new(1)).await.is_empty());
    }
}
