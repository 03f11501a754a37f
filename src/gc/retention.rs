//! Retention sweep.
//!
//! The store is never capped on insert. Instead a periodic sweep checks the
//! record count and, once it exceeds the capacity bound, evicts every record
//! older than the retention window. Between sweeps the store may run over
//! capacity; registration always succeeds.
//!
//! # Configuration
//!
//! | Variable | Default |
//! |----------|---------|
//! | `ITEMTRACE_CAPACITY` | `50000` |
//! | `ITEMTRACE_RETENTION_DAYS` | `7` |
//! | `ITEMTRACE_SWEEP_INTERVAL_SECS` | `3600` |
//!
//! # Example
//!
//! ```rust,ignore
//! use itemtrace::gc::{RetentionConfig, RetentionSweeper};
//!
//! let sweeper = RetentionSweeper::new(store, history, writer, RetentionConfig::default());
//! let result = sweeper.sweep();
//! println!("{}", result.summary());
//! ```

use crate::config::env_parse;
use crate::current_timestamp_millis;
use crate::services::ActionLog;
use crate::storage::{ItemStore, SnapshotWriter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument};

/// Default record count above which the sweep evicts.
pub const DEFAULT_CAPACITY: usize = 50_000;

/// Default retention window in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

const MILLIS_PER_DAY: u64 = 86_400_000;

/// Safely converts Duration to milliseconds as u64, capping at `u64::MAX`.
#[inline]
fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Converts usize to f64 for metrics, capping at `u32::MAX`.
#[inline]
fn usize_to_f64(value: usize) -> f64 {
    let capped = u32::try_from(value).unwrap_or(u32::MAX);
    f64::from(capped)
}

/// Retention sweep configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Record count above which old records are evicted.
    pub capacity: usize,
    /// Records younger than this many days are never evicted.
    pub retention_days: u32,
    /// Time between sweeps.
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            retention_days: DEFAULT_RETENTION_DAYS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl RetentionConfig {
    /// Applies `ITEMTRACE_*` retention overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("ITEMTRACE_CAPACITY") {
            self.capacity = v;
        }
        if let Some(v) = env_parse("ITEMTRACE_RETENTION_DAYS") {
            self.retention_days = v;
        }
        if let Some(secs) = env_parse::<u64>("ITEMTRACE_SWEEP_INTERVAL_SECS") {
            self.sweep_interval = Duration::from_secs(secs);
        }
        self
    }

    /// Sets the capacity bound.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the retention window.
    #[must_use]
    pub const fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Returns the creation-time cutoff relative to `now_ms`.
    ///
    /// Records created before the cutoff are eligible for eviction.
    #[must_use]
    pub fn cutoff_millis(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(u64::from(self.retention_days) * MILLIS_PER_DAY)
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    /// Records in the store when the sweep started.
    pub records_checked: usize,
    /// Records evicted.
    pub records_evicted: usize,
    /// Action histories dropped because their id has no record.
    pub histories_pruned: usize,
    /// False if the store was within capacity and nothing was scanned.
    pub ran: bool,
    /// Duration of the sweep in milliseconds.
    pub duration_ms: u64,
}

impl SweepResult {
    /// Returns a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if !self.ran {
            format!("Within capacity ({} records), nothing to sweep", self.records_checked)
        } else if self.records_evicted == 0 {
            format!(
                "Over capacity but no expired records ({} checked in {}ms)",
                self.records_checked, self.duration_ms
            )
        } else {
            format!(
                "Evicted {} of {} records in {}ms",
                self.records_evicted, self.records_checked, self.duration_ms
            )
        }
    }
}

/// Periodic capacity-bound eviction of old records.
pub struct RetentionSweeper {
    store: Arc<ItemStore>,
    history: Arc<ActionLog>,
    writer: Arc<SnapshotWriter>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    /// Creates a sweeper.
    #[must_use]
    pub const fn new(
        store: Arc<ItemStore>,
        history: Arc<ActionLog>,
        writer: Arc<SnapshotWriter>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            store,
            history,
            writer,
            config,
        }
    }

    /// Returns the sweep configuration.
    #[must_use]
    pub const fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Runs one sweep now.
    ///
    /// Drops action histories whose id has no record, then evicts records
    /// older than the retention window if the store holds more than
    /// `capacity` records, prunes their history, and schedules a snapshot
    /// write when anything was evicted.
    #[instrument(skip(self), fields(capacity = self.config.capacity))]
    pub fn sweep(&self) -> SweepResult {
        let start = Instant::now();
        let histories_pruned = self.history.retain(|id| self.store.contains(id));
        if histories_pruned > 0 {
            debug!(histories_pruned, "Dropped histories without a record");
        }

        let records_checked = self.store.len();
        if records_checked <= self.config.capacity {
            debug!(records = records_checked, "Store within capacity");
            return SweepResult {
                records_checked,
                histories_pruned,
                ..SweepResult::default()
            };
        }

        let cutoff = self.config.cutoff_millis(current_timestamp_millis());
        let evicted = self.store.evict_older_than(cutoff);
        self.history.prune(&evicted);
        if !evicted.is_empty() {
            self.writer.request_write();
        }

        let result = SweepResult {
            records_checked,
            records_evicted: evicted.len(),
            histories_pruned,
            ran: true,
            duration_ms: duration_to_millis(start.elapsed()),
        };

        metrics::counter!("itemtrace_retention_sweeps_total").increment(1);
        metrics::gauge!("itemtrace_retention_evicted").set(usize_to_f64(result.records_evicted));
        metrics::histogram!("itemtrace_retention_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        info!(
            records_checked = result.records_checked,
            records_evicted = result.records_evicted,
            histories_pruned = result.histories_pruned,
            duration_ms = result.duration_ms,
            "Retention sweep completed"
        );
        result
    }

    /// Runs [`Self::sweep`] on a fixed interval until `cancel` fires.
    ///
    /// The first sweep happens one interval after spawning.
    pub fn spawn(
        self: Arc<Self>,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tracker.spawn(async move {
            let period = self.config.sweep_interval.max(Duration::from_millis(1));
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.sweep();
                    },
                }
            }
            debug!("Retention sweeper stopped");
        })
    }
}

impl std::fmt::Debug for RetentionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionSweeper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
