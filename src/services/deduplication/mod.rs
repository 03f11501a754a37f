//! Duplicate detection and alerting.
//!
//! Detection runs off the registration path: the tagger records the item and
//! returns, and a background task asks the [`AlertDispatcher`] to evaluate
//! it. The dispatcher consults its settings, runs the
//! [`DuplicateDetector`] scan, and fans alerts out.
//!
//! ```text
//! register_item ──spawn──▶ AlertDispatcher::evaluate
//!                              │ ignored action? ──▶ stop
//!                              ▼
//!                          DuplicateDetector::find_duplicates
//!                              │ below threshold? ──▶ stop
//!                              ▼
//!                          AlertBus (local) ──▶ NodeSync::publish (fleet)
//! ```

mod alerts;
mod config;
mod detector;

pub use alerts::AlertDispatcher;
pub use config::{
    DEFAULT_IGNORED_ACTIONS, DEFAULT_MAX_RESULTS, DEFAULT_MIN_DUPLICATES, DetectionConfig,
};
pub use detector::DuplicateDetector;
