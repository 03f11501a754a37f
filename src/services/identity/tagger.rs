//! Item registration.
//!
//! The tagger is the only writer of new records. Registration does the cheap,
//! synchronous part inline (id allocation, fingerprint, store insert, tag
//! embedding) and hands everything else to background tasks: duplicate
//! detection, alert dispatch, fleet publication and the snapshot write. It
//! never fails loudly; invalid content yields `None`.

use super::{Fingerprinter, id_gen};
use crate::current_timestamp_millis;
use crate::models::{ActionLogEntry, ItemContent, ItemId, TrackedRecord};
use crate::services::AlertDispatcher;
use crate::services::history::ActionLog;
use crate::storage::{ItemStore, SnapshotWriter};
use crate::sync::NodeSync;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

/// Action recorded when an item is inspected through the check surface.
pub const CHECKED_ACTION: &str = "CHECKED";

/// Assigns and confirms item identity.
pub struct IdentityTagger {
    store: Arc<ItemStore>,
    history: Arc<ActionLog>,
    writer: Arc<SnapshotWriter>,
    dispatcher: Arc<AlertDispatcher>,
    sync: Arc<dyn NodeSync>,
    tracker: TaskTracker,
    runtime: Handle,
}

impl IdentityTagger {
    /// Creates a tagger.
    ///
    /// Background work is spawned on `runtime` and tracked by `tracker`, so
    /// registration may be called from threads outside the runtime.
    #[must_use]
    pub fn new(
        store: Arc<ItemStore>,
        history: Arc<ActionLog>,
        writer: Arc<SnapshotWriter>,
        dispatcher: Arc<AlertDispatcher>,
        sync: Arc<dyn NodeSync>,
        tracker: TaskTracker,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            history,
            writer,
            dispatcher,
            sync,
            tracker,
            runtime,
        }
    }

    /// Registers `content`, or confirms its existing identity.
    ///
    /// Tagged content keeps its id: the action is recorded and duplicate
    /// detection is scheduled, but no record is created. Untagged content
    /// gets a fresh id, a record in the store, and the id embedded in its
    /// tags.
    ///
    /// Returns `None` without side effects if the content is not trackable
    /// (empty or air type, zero quantity) or `actor` is blank.
    #[instrument(skip(self, content), fields(kind = %content.kind))]
    pub fn register_item(
        &self,
        content: &mut ItemContent,
        action: &str,
        actor: &str,
    ) -> Option<ItemId> {
        if actor.trim().is_empty() || !content.is_trackable() {
            metrics::counter!("itemtrace_registrations_total", "outcome" => "rejected")
                .increment(1);
            debug!("Rejected untrackable content");
            return None;
        }

        if let Some(id) = content.embedded_id() {
            metrics::counter!("itemtrace_registrations_total", "outcome" => "existing")
                .increment(1);
            self.record_action(id, action, actor);
            self.spawn_detection(id, actor, action);
            return Some(id);
        }

        let fingerprint = Fingerprinter::fingerprint(content);
        let created_at = current_timestamp_millis();
        let record = loop {
            let candidate =
                TrackedRecord::new(id_gen::generate_id(), fingerprint.as_str(), created_at, actor);
            if self.store.insert_new(candidate.clone(), &content.kind) {
                break candidate;
            }
            debug!(item_id = %candidate.id, "Id already in use, retrying");
        };
        let id = record.id;

        content.embed_id(id);
        metrics::counter!("itemtrace_registrations_total", "outcome" => "new").increment(1);
        debug!(item_id = %id, actor, action, "Registered new item");

        self.record_action(id, action, actor);
        self.writer.request_write();

        let sync = Arc::clone(&self.sync);
        self.spawn_supervised("publish_fingerprint", async move {
            sync.publish_fingerprint(
                record.id,
                &record.fingerprint,
                &record.creator,
                record.created_at,
            )
            .await
        });
        self.spawn_detection(id, actor, action);

        Some(id)
    }

    /// Returns the existing id of `content`, or registers it as checked.
    pub fn check_item(&self, content: &mut ItemContent, actor: &str) -> Option<ItemId> {
        self.register_item(content, CHECKED_ACTION, actor)
    }

    /// Reads the id embedded in `content` without side effects.
    #[must_use]
    pub fn read_id(content: &ItemContent) -> Option<ItemId> {
        content.embedded_id()
    }

    fn record_action(&self, id: ItemId, action: &str, actor: &str) {
        // Ids without a local record get fleet history only.
        let entry = if self.store.contains(id) {
            self.history.record(id, action, actor)
        } else {
            debug!(item_id = %id, "No local record, action not kept locally");
            ActionLogEntry::new(current_timestamp_millis(), action, actor)
        };
        let sync = Arc::clone(&self.sync);
        self.spawn_supervised("publish_action", async move {
            sync.publish_action(id, &entry).await
        });
    }

    fn spawn_detection(&self, id: ItemId, actor: &str, action: &str) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let actor = actor.to_string();
        let action = action.to_string();
        self.tracker.spawn_on(
            async move {
                dispatcher.evaluate(id, &actor, &action).await;
            },
            &self.runtime,
        );
    }

    fn spawn_supervised<F>(&self, task: &'static str, future: F)
    where
        F: Future<Output = crate::Result<()>> + Send + 'static,
    {
        let sync_name = self.sync.name();
        self.tracker.spawn_on(
            async move {
                if let Err(e) = future.await {
                    warn!(task, sync = sync_name, error = %e, "Background sync task failed");
                }
            },
            &self.runtime,
        );
    }
}

impl std::fmt::Debug for IdentityTagger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityTagger")
            .field("records", &self.store.len())
            .field("sync", &self.sync.name())
            .finish_non_exhaustive()
    }
}
