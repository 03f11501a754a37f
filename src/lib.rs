//! # Itemtrace
//!
//! Persistent identity and duplicate detection for interactive content objects.
//!
//! Itemtrace assigns a stable id to every piece of content it sees, derives a
//! content fingerprint, and keeps a concurrent in-memory index that is
//! snapshotted to disk in the background. Two distinct records sharing a
//! fingerprint are duplicates; duplicates raise alerts for local subscribers
//! and, optionally, for other nodes in a fleet.
//!
//! ## Features
//!
//! - Deterministic SHA-256 content fingerprints (canonical attribute order)
//! - Lock-guarded store with bounded full-table scans
//! - Debounced, last-write-wins binary snapshots
//! - Off-path duplicate detection and alert dispatch
//! - Pluggable best-effort cross-node sync (Redis behind the `redis` feature)
//!
//! ## Example
//!
//! ```rust,ignore
//! use itemtrace::{Engine, EngineConfig, ItemContent};
//!
//! let engine = Engine::start(EngineConfig::default()).await?;
//! let mut sword = ItemContent::new("DIAMOND_SWORD", 1).with_display_name("Excalibur");
//! let id = engine.tagger().register_item(&mut sword, "CRAFTED", "alice");
//! assert!(id.is_some());
//! engine.shutdown().await;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod commands;
pub mod config;
pub mod gc;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;
pub mod sync;

// Re-exports for convenience
pub use config::EngineConfig;
pub use models::{ActionLogEntry, Alert, ItemContent, ItemId, PersistentTags, TrackedRecord};
pub use services::{AlertDispatcher, DuplicateDetector, Engine, Fingerprinter, IdentityTagger};
pub use storage::{ItemStore, SnapshotWriter};
pub use sync::NodeSync;

/// Error type for itemtrace operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty or reserved content, unparsable ids, malformed requests |
/// | `OperationFailed` | Snapshot or config I/O fails, data directory cannot be created |
/// | `CorruptSnapshot` | A snapshot is truncated, has a bad header, or holds invalid UTF-8 |
/// | `Sync` | The cross-node synchronizer cannot reach its transport |
///
/// None of these escape the registration or detection paths; they surface only
/// from startup, explicit I/O helpers, and background task boundaries.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Snapshot reads or writes fail
    /// - The configuration file cannot be read or parsed
    /// - The data directory cannot be created
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A snapshot could not be fully decoded.
    ///
    /// `records_read` complete records preceded the failure and remain usable.
    #[error("corrupt snapshot after {records_read} records: {reason}")]
    CorruptSnapshot {
        /// Number of complete records decoded before the failure.
        records_read: usize,
        /// What was wrong with the data.
        reason: String,
    },

    /// Cross-node synchronization failed.
    #[error("sync failed: {0}")]
    Sync(String),
}

/// Result type alias for itemtrace operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use itemtrace::current_timestamp_millis;
///
/// let ts = current_timestamp_millis();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn current_timestamp_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
