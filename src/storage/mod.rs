//! Storage layer.
//!
//! - **Store**: the lock-guarded in-memory index of tracked records
//! - **Snapshot**: the versioned binary format the store is persisted in
//! - **Writer**: debounced background persistence and startup loading
//!
//! The in-memory store is always the source of truth. Snapshot failures are
//! logged and never surface to registration callers.

// Allow significant_drop_tightening - the store lock deliberately spans whole scans.
#![allow(clippy::significant_drop_tightening)]

pub mod snapshot;
mod store;
mod writer;

pub use snapshot::{DecodedSnapshot, SNAPSHOT_MAGIC, SNAPSHOT_VERSION, decode, encode};
pub use store::ItemStore;
pub use writer::{
    DEFAULT_DEBOUNCE, DEFAULT_MAX_DELAY, DEFAULT_SHUTDOWN_GRACE, LoadReport, PersistenceConfig,
    SnapshotWriter, load_snapshot, write_snapshot,
};
