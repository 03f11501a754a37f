//! Data models for itemtrace.
//!
//! This module contains the core data structures shared by the store, the
//! identity services and the sync boundary.

mod alert;
mod item;
mod record;

pub use alert::{Alert, AlertSource};
pub use item::{AIR_TYPES, ITEM_ID_KEY, ItemContent, PersistentTags, TagValue};
pub use record::{ActionLogEntry, ItemId, NetworkRecord, TrackedRecord};
