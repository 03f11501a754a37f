//! Duplicate alert types.

use super::ItemId;
use serde::{Deserialize, Serialize};

/// Where an alert was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    /// Raised by this node's own detector.
    Local,
    /// Received from another node through the synchronizer.
    Network,
}

/// A duplicate alert.
///
/// Alerts are ephemeral: they are never persisted, and a dropped alert is
/// never replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Actor whose action triggered the check.
    pub actor: String,
    /// The item that has duplicates.
    pub id: ItemId,
    /// Number of duplicates found.
    pub duplicate_count: usize,
    /// Node that raised the alert.
    pub origin_node: String,
    /// Whether the alert was raised here or received from the network.
    pub source: AlertSource,
}

impl Alert {
    /// Creates a locally raised alert.
    #[must_use]
    pub fn local(
        actor: impl Into<String>,
        id: ItemId,
        duplicate_count: usize,
        origin_node: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            id,
            duplicate_count,
            origin_node: origin_node.into(),
            source: AlertSource::Local,
        }
    }

    /// Marks the alert as received from another node.
    #[must_use]
    pub fn into_network(mut self) -> Self {
        self.source = AlertSource::Network;
        self
    }

    /// Returns true if the alert was raised by `node`.
    #[must_use]
    pub fn is_from(&self, node: &str) -> bool {
        self.origin_node == node
    }
}
