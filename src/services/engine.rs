//! Engine wiring and lifecycle.
//!
//! [`Engine::start`] builds every component around one shared
//! [`ItemStore`], restores the snapshot, and starts the background tasks: the
//! debounced snapshot writer, the retention sweep and the fleet subscription.
//! All of them observe one cancellation token and are tracked by one
//! [`TaskTracker`], so [`Engine::shutdown`] can stop them in order.

use super::history::ActionLog;
use super::{AlertDispatcher, DetectionConfig, DuplicateDetector, IdentityTagger};
use crate::config::EngineConfig;
use crate::gc::{RetentionSweeper, SweepResult};
use crate::models::{ActionLogEntry, ItemId, NetworkRecord, TrackedRecord};
use crate::observability::AlertBus;
use crate::storage::{ItemStore, LoadReport, SnapshotWriter, load_snapshot};
use crate::sync::{self, InboundAlertHandler, NodeSync, RemoteAction};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Name of this node.
    pub node_name: String,
    /// Records held in the store.
    pub records: usize,
    /// Registrations per content type observed by this process.
    pub type_counts: HashMap<String, u64>,
    /// Items with at least one history entry.
    pub tracked_histories: usize,
    /// Whether a snapshot write is pending.
    pub write_pending: bool,
    /// Snapshot writes completed since start.
    pub writes_completed: u64,
    /// Active synchronizer transport.
    pub sync: &'static str,
}

impl EngineStats {
    /// Returns the `n` most registered content types, largest first.
    ///
    /// Ties are ordered by type name.
    #[must_use]
    pub fn top_types(&self, n: usize) -> Vec<(String, u64)> {
        let mut types: Vec<_> = self
            .type_counts
            .iter()
            .map(|(kind, count)| (kind.clone(), *count))
            .collect();
        types.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        types.truncate(n);
        types
    }
}

/// A running identity and duplicate-detection engine.
pub struct Engine {
    node_name: String,
    store: Arc<ItemStore>,
    history: Arc<ActionLog>,
    writer: Arc<SnapshotWriter>,
    detector: Arc<DuplicateDetector>,
    dispatcher: Arc<AlertDispatcher>,
    tagger: Arc<IdentityTagger>,
    sweeper: Arc<RetentionSweeper>,
    sync: Arc<dyn NodeSync>,
    load_report: LoadReport,
    grace: Duration,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Engine {
    /// Starts an engine, connecting the synchronizer described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created. Snapshot
    /// and sync failures are logged and never abort startup.
    pub async fn start(config: EngineConfig) -> Result<Self> {
        let sync = sync::connect(&config.sync, &config.node_name).await;
        Self::start_with_sync(config, sync).await
    }

    /// Starts an engine on an existing synchronizer.
    ///
    /// Must be called from within a tokio runtime; background tasks are
    /// spawned on the current one.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created.
    #[instrument(skip_all, fields(node = %config.node_name, data_dir = %config.data_dir.display()))]
    pub async fn start_with_sync(config: EngineConfig, sync: Arc<dyn NodeSync>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "create_data_dir".to_string(),
                cause: format!("{}: {e}", config.data_dir.display()),
            })?;

        let store = Arc::new(ItemStore::new());
        let snapshot_path = config.snapshot_path();
        let load_report = load_snapshot(&snapshot_path, &store).await;

        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        let writer = Arc::new(SnapshotWriter::spawn(
            Arc::clone(&store),
            snapshot_path,
            config.persistence,
            &tracker,
            &cancel,
        ));
        let history = Arc::new(ActionLog::new(config.max_history));
        let detector = Arc::new(DuplicateDetector::new(Arc::clone(&store), Arc::clone(&sync)));
        let dispatcher = Arc::new(AlertDispatcher::new(
            Arc::clone(&detector),
            AlertBus::default(),
            Arc::clone(&sync),
            config.node_name.as_str(),
            config.detection.clone(),
        ));
        let tagger = Arc::new(IdentityTagger::new(
            Arc::clone(&store),
            Arc::clone(&history),
            Arc::clone(&writer),
            Arc::clone(&dispatcher),
            Arc::clone(&sync),
            tracker.clone(),
            Handle::current(),
        ));
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&store),
            Arc::clone(&history),
            Arc::clone(&writer),
            config.retention,
        ));
        Arc::clone(&sweeper).spawn(&tracker, cancel.child_token());

        spawn_subscription(&tracker, &cancel, Arc::clone(&sync), Arc::clone(&dispatcher));

        info!(
            records = load_report.loaded,
            sync = sync.name(),
            "Engine started"
        );

        Ok(Self {
            node_name: config.node_name,
            store,
            history,
            writer,
            detector,
            dispatcher,
            tagger,
            sweeper,
            sync,
            load_report,
            grace: config.persistence.shutdown_grace,
            tracker,
            cancel,
        })
    }

    /// Returns the identity tagger, the registration entry point.
    #[must_use]
    pub fn tagger(&self) -> &IdentityTagger {
        &self.tagger
    }

    /// Returns the shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<ItemStore> {
        &self.store
    }

    /// Returns the duplicate detector.
    #[must_use]
    pub fn detector(&self) -> &DuplicateDetector {
        &self.detector
    }

    /// Returns the alert dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    /// Returns the per-item action history.
    #[must_use]
    pub fn history(&self) -> &ActionLog {
        &self.history
    }

    /// Returns the local alert bus.
    #[must_use]
    pub fn bus(&self) -> &AlertBus {
        self.dispatcher.bus()
    }

    /// Returns the snapshot writer.
    #[must_use]
    pub fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }

    /// Returns the name of this node.
    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Returns what was restored from disk at startup.
    #[must_use]
    pub const fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    /// Looks up the record for `id`.
    #[must_use]
    pub fn lookup(&self, id: ItemId) -> Option<TrackedRecord> {
        self.store.get(id)
    }

    /// Returns local duplicates of `id`.
    #[must_use]
    pub fn find_duplicates(&self, id: ItemId) -> Vec<TrackedRecord> {
        self.detector.find_duplicates(id)
    }

    /// Returns duplicates of `id` registered on other nodes.
    pub async fn find_network_duplicates(&self, id: ItemId) -> Vec<NetworkRecord> {
        self.detector.query_network(id).await
    }

    /// Returns the action history of `id`, oldest first.
    #[must_use]
    pub fn item_history(&self, id: ItemId) -> Vec<ActionLogEntry> {
        self.history.history(id)
    }

    /// Returns the history of `id` shared by the fleet.
    ///
    /// Best effort: empty if the synchronizer fails.
    pub async fn network_history(&self, id: ItemId) -> Vec<RemoteAction> {
        match self.sync.fetch_history(id).await {
            Ok(actions) => actions,
            Err(e) => {
                warn!(item_id = %id, error = %e, "Fleet history query failed");
                Vec::new()
            },
        }
    }

    /// Replaces the detection settings of the running engine.
    pub fn reload_config(&self, config: DetectionConfig) {
        self.dispatcher.reload(config);
    }

    /// Runs a retention sweep immediately.
    pub fn sweep_now(&self) -> SweepResult {
        self.sweeper.sweep()
    }

    /// Returns current statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            node_name: self.node_name.clone(),
            records: self.store.len(),
            type_counts: self.store.snapshot_type_counts(),
            tracked_histories: self.history.tracked_items(),
            write_pending: self.writer.is_dirty(),
            writes_completed: self.writer.writes_completed(),
            sync: self.sync.name(),
        }
    }

    /// Stops the engine.
    ///
    /// Cancels the background tasks, waits for in-flight detection and
    /// dispatch work, then writes the final snapshot. Each wait is bounded by
    /// the shutdown grace period. Returns true if the store was persisted.
    #[instrument(skip(self), fields(node = %self.node_name))]
    pub async fn shutdown(&self) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.tracker.len(),
                "Background tasks still running after grace period"
            );
        }

        let persisted = self.writer.shutdown().await;
        info!(records = self.store.len(), persisted, "Engine stopped");
        persisted
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("node_name", &self.node_name)
            .field("records", &self.store.len())
            .field("sync", &self.sync.name())
            .finish_non_exhaustive()
    }
}

fn spawn_subscription(
    tracker: &TaskTracker,
    cancel: &CancellationToken,
    sync: Arc<dyn NodeSync>,
    dispatcher: Arc<AlertDispatcher>,
) {
    let cancel = cancel.child_token();
    let handler: InboundAlertHandler = Arc::new(move |alert| {
        dispatcher.receive(alert);
    });

    tracker.spawn(async move {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {},
            result = sync.subscribe(handler) => match result {
                // The handler stays registered until shutdown.
                Ok(()) => cancel.cancelled().await,
                Err(e) => warn!(sync = sync.name(), error = %e, "Fleet subscription ended"),
            },
        }
        if let Err(e) = sync.unsubscribe().await {
            debug!(sync = sync.name(), error = %e, "Unsubscribe failed");
        }
        debug!("Fleet subscription task stopped");
    });
}
