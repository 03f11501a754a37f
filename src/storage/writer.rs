//! Debounced snapshot persistence.
//!
//! A single background task owns every periodic write. Requests only wake it;
//! it waits until no request has arrived for the debounce window (or until
//! `max_delay` has passed since the first request of the burst) and then
//! writes a full copy of the store. Because writes are serialized behind one
//! lock and always copy the whole store, the file on disk reflects the most
//! recent completed copy.
//!
//! # Example
//!
//! ```rust,ignore
//! use itemtrace::storage::{ItemStore, PersistenceConfig, SnapshotWriter, load_snapshot};
//! use tokio_util::{sync::CancellationToken, task::TaskTracker};
//!
//! let store = Arc::new(ItemStore::new());
//! load_snapshot(&path, &store).await;
//!
//! let writer = SnapshotWriter::spawn(
//!     Arc::clone(&store),
//!     path,
//!     PersistenceConfig::default(),
//!     &TaskTracker::new(),
//!     &CancellationToken::new(),
//! );
//! writer.request_write();
//! writer.shutdown().await;
//! ```

use crate::config::env_parse;
use crate::models::TrackedRecord;
use crate::storage::ItemStore;
use crate::storage::snapshot::{self, DecodedSnapshot};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

/// Default quiet period after the last write request.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Default bound on the final write during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default upper bound between the first request of a burst and its write.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Snapshot persistence settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Quiet period after the last request before writing.
    pub debounce: Duration,
    /// Bound on the final flush during shutdown.
    pub shutdown_grace: Duration,
    /// A steady stream of requests still writes at least this often.
    pub max_delay: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl PersistenceConfig {
    /// Applies `ITEMTRACE_DEBOUNCE_MS` and `ITEMTRACE_SHUTDOWN_GRACE_MS`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(ms) = env_parse::<u64>("ITEMTRACE_DEBOUNCE_MS") {
            self.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("ITEMTRACE_SHUTDOWN_GRACE_MS") {
            self.shutdown_grace = Duration::from_millis(ms);
        }
        self
    }

    /// Sets the debounce window.
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the maximum delay for a burst of requests.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

/// State shared between the writer handle and its background task.
struct Shared {
    store: Arc<ItemStore>,
    path: PathBuf,
    notify: Notify,
    dirty: AtomicBool,
    write_lock: tokio::sync::Mutex<()>,
    writes_completed: AtomicU64,
}

impl Shared {
    async fn write_now(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        self.dirty.store(false, Ordering::SeqCst);

        let start = std::time::Instant::now();
        let records = self.store.snapshot_records();
        let count = records.len();

        if let Err(e) = write_snapshot(&self.path, &records).await {
            self.dirty.store(true, Ordering::SeqCst);
            metrics::counter!("itemtrace_snapshot_writes_total", "status" => "error").increment(1);
            return Err(e);
        }

        self.writes_completed.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("itemtrace_snapshot_writes_total", "status" => "success").increment(1);
        metrics::histogram!("itemtrace_snapshot_write_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        debug!(records = count, path = %self.path.display(), "Snapshot written");
        Ok(count)
    }
}

/// Owner of the debounced background write task.
pub struct SnapshotWriter {
    shared: Arc<Shared>,
    config: PersistenceConfig,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotWriter {
    /// Spawns the background write task on `tracker`.
    ///
    /// The task stops when `parent` (or the writer's own token) is cancelled.
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        store: Arc<ItemStore>,
        path: PathBuf,
        config: PersistenceConfig,
        tracker: &TaskTracker,
        parent: &CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            store,
            path,
            notify: Notify::new(),
            dirty: AtomicBool::new(false),
            write_lock: tokio::sync::Mutex::new(()),
            writes_completed: AtomicU64::new(0),
        });
        let cancel = parent.child_token();

        let task = tracker.spawn(run_debounce_loop(
            Arc::clone(&shared),
            config,
            cancel.clone(),
        ));

        Self {
            shared,
            config,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Schedules a write. Never blocks; bursts coalesce into one write.
    pub fn request_write(&self) {
        self.shared.dirty.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    /// Writes the current store contents immediately.
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded or written.
    pub async fn flush(&self) -> Result<usize> {
        self.shared.write_now().await
    }

    /// Returns true if a requested write has not completed yet.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::SeqCst)
    }

    /// Returns the number of successful writes so far.
    #[must_use]
    pub fn writes_completed(&self) -> u64 {
        self.shared.writes_completed.load(Ordering::SeqCst)
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Stops the background task and writes the final snapshot.
    ///
    /// The final write happens whether or not anything changed. Both steps
    /// are bounded by the configured grace period. Returns true if
    /// the store was persisted, false if the final write was abandoned or
    /// failed.
    pub async fn shutdown(&self) -> bool {
        let grace = self.config.shutdown_grace;
        self.cancel.cancel();

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && tokio::time::timeout(grace, task).await.is_err()
        {
            warn!(grace_ms = grace.as_millis(), "Snapshot task did not stop in time");
        }

        // Written even when clean: a truncated or legacy file gets replaced.
        match tokio::time::timeout(grace, self.shared.write_now()).await {
            Ok(Ok(count)) => {
                info!(records = count, "Final snapshot written");
                true
            },
            Ok(Err(e)) => {
                error!(error = %e, "Final snapshot write failed");
                false
            },
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis(),
                    "Final snapshot write abandoned after grace period"
                );
                false
            },
        }
    }
}

impl std::fmt::Debug for SnapshotWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWriter")
            .field("path", &self.shared.path)
            .field("config", &self.config)
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

async fn run_debounce_loop(shared: Arc<Shared>, config: PersistenceConfig, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = shared.notify.notified() => {},
        }

        let burst_deadline = Instant::now() + config.max_delay;
        loop {
            let deadline = (Instant::now() + config.debounce).min(burst_deadline);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = shared.notify.notified() => {
                    if Instant::now() >= burst_deadline {
                        break;
                    }
                },
                () = tokio::time::sleep_until(deadline) => break,
            }
        }

        if let Err(e) = shared.write_now().await {
            warn!(error = %e, "Snapshot write failed, in-memory store remains authoritative");
        }
    }
    debug!("Snapshot task stopped");
}

/// Outcome of loading a snapshot at startup.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Records placed into the store.
    pub loaded: usize,
    /// Format version of the file, if one was read.
    pub version: Option<u16>,
    /// The I/O or decode error encountered, if any. Already logged.
    pub error: Option<Error>,
}

/// Replaces the store contents with the snapshot at `path`.
///
/// Never fails: a missing or empty file yields an empty store, and read errors or
/// corrupt data are logged while every complete record before the defect is
/// kept.
#[instrument(skip(store), fields(path = %path.display()))]
pub async fn load_snapshot(path: &Path, store: &ItemStore) -> LoadReport {
    let data = match tokio::fs::read(path).await {
        Ok(data) if data.is_empty() => {
            debug!("Snapshot file is empty, starting empty");
            return LoadReport::default();
        },
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No snapshot found, starting empty");
            return LoadReport::default();
        },
        Err(e) => {
            error!(error = %e, "Failed to read snapshot, starting empty");
            return LoadReport {
                error: Some(Error::OperationFailed {
                    operation: "read_snapshot".to_string(),
                    cause: format!("{}: {e}", path.display()),
                }),
                ..LoadReport::default()
            };
        },
    };

    let DecodedSnapshot {
        records,
        version,
        error,
    } = snapshot::decode(&data);
    let loaded = records.len();

    if let Some(e) = &error {
        error!(error = %e, loaded, "Snapshot is corrupt, keeping the valid prefix");
    }

    store.replace_all(records);
    info!(loaded, version, "Snapshot loaded");

    LoadReport {
        loaded,
        version: Some(version),
        error,
    }
}

/// Encodes `records` and atomically replaces the file at `path`.
///
/// Writes to a sibling temporary file first, then renames it into place.
///
/// # Errors
///
/// Returns an error if encoding, writing, or renaming fails.
pub async fn write_snapshot(path: &Path, records: &[TrackedRecord]) -> Result<()> {
    let bytes = snapshot::encode(records)?;
    let tmp = temp_path(path);

    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "write_snapshot".to_string(),
            cause: format!("{}: {e}", tmp.display()),
        })?;

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::OperationFailed {
            operation: "rename_snapshot".to_string(),
            cause: format!("{} -> {}: {e}", tmp.display(), path.display()),
        })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
