//! Garbage collection.
//!
//! The only collector is the retention sweep: once the store grows past its
//! capacity bound, records older than the retention window are evicted on the
//! next periodic run.
//!
//! ```rust,ignore
//! use itemtrace::gc::{RetentionConfig, RetentionSweeper};
//!
//! let sweeper = Arc::new(RetentionSweeper::new(store, history, writer, RetentionConfig::default()));
//! sweeper.spawn(&tracker, cancel.child_token());
//! ```

mod retention;

pub use retention::{
    DEFAULT_CAPACITY, DEFAULT_RETENTION_DAYS, DEFAULT_SWEEP_INTERVAL, RetentionConfig,
    RetentionSweeper, SweepResult,
};
