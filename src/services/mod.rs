//! Business logic services.
//!
//! Services sit between the host and the store: identity assignment,
//! duplicate detection, action history, and the [`Engine`] that wires them
//! together.

pub mod deduplication;
mod engine;
pub mod history;
pub mod identity;

pub use deduplication::{AlertDispatcher, DetectionConfig, DuplicateDetector};
pub use engine::{Engine, EngineStats};
pub use history::ActionLog;
pub use identity::{CHECKED_ACTION, Fingerprinter, IdentityTagger};
