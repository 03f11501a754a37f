//! Tracked record types and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a tracked item.
///
/// Ids are opaque 64-bit values. Freshly generated ids combine a coarse
/// wall-clock component with random low-order bits, but nothing downstream
/// relies on that structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(u64);

impl ItemId {
    /// Creates an item id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the id as the signed value stored in persistent tags.
    #[must_use]
    pub const fn to_tag_value(self) -> i64 {
        self.0.cast_signed()
    }

    /// Rebuilds an id from a signed persistent tag value.
    #[must_use]
    pub const fn from_tag_value(value: i64) -> Self {
        Self(value.cast_unsigned())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| crate::Error::InvalidInput(format!("invalid item id '{s}': {e}")))
    }
}

impl From<u64> for ItemId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Durable record binding an id to a fingerprint, creator and creation time.
///
/// Records are immutable once created. The only way a record changes is full
/// replacement when a snapshot is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRecord {
    /// Unique identifier.
    pub id: ItemId,
    /// Lowercase hex SHA-256 content fingerprint.
    pub fingerprint: String,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: u64,
    /// Name of the actor that first registered the content.
    pub creator: String,
}

impl TrackedRecord {
    /// Creates a new tracked record.
    #[must_use]
    pub fn new(
        id: ItemId,
        fingerprint: impl Into<String>,
        created_at: u64,
        creator: impl Into<String>,
    ) -> Self {
        Self {
            id,
            fingerprint: fingerprint.into(),
            created_at,
            creator: creator.into(),
        }
    }

    /// Returns true if the record was created strictly before `cutoff_ms`.
    #[must_use]
    pub const fn is_older_than(&self, cutoff_ms: u64) -> bool {
        self.created_at < cutoff_ms
    }
}

/// One action performed against a tracked item, kept for history display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// When the action happened (Unix epoch milliseconds).
    pub timestamp: u64,
    /// Kind of action, e.g. `CRAFTED` or `LOGIN_SCAN`.
    pub action: String,
    /// Actor that performed it.
    pub actor: String,
}

impl ActionLogEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(timestamp: u64, action: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            timestamp,
            action: action.into(),
            actor: actor.into(),
        }
    }
}

/// A record reported by another node through the cross-node synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Id assigned by the remote node.
    pub id: ItemId,
    /// Creator on the remote node.
    pub creator: String,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: u64,
    /// Node that registered the record.
    pub origin_node: String,
}
