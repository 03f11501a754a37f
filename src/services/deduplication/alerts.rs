//! Alert evaluation and dispatch.
//!
//! The dispatcher decides whether a registration event warrants an alert and
//! fans it out: first to the local [`AlertBus`], then to the fleet. Settings
//! live behind a lock so they can be reloaded while the engine runs.

use super::{DetectionConfig, DuplicateDetector};
use crate::models::{Alert, ItemId};
use crate::observability::AlertBus;
use crate::sync::NodeSync;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, instrument, warn};

/// Evaluates registration events and dispatches duplicate alerts.
pub struct AlertDispatcher {
    detector: Arc<DuplicateDetector>,
    bus: AlertBus,
    sync: Arc<dyn NodeSync>,
    node_name: String,
    config: RwLock<DetectionConfig>,
}

impl AlertDispatcher {
    /// Creates a dispatcher.
    ///
    /// The detector's scan cap is set from `config`.
    #[must_use]
    pub fn new(
        detector: Arc<DuplicateDetector>,
        bus: AlertBus,
        sync: Arc<dyn NodeSync>,
        node_name: impl Into<String>,
        config: DetectionConfig,
    ) -> Self {
        detector.set_max_results(config.max_results);
        Self {
            detector,
            bus,
            sync,
            node_name: node_name.into(),
            config: RwLock::new(config),
        }
    }

    /// Returns a copy of the current settings.
    #[must_use]
    pub fn config(&self) -> DetectionConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the settings. Takes effect for the next evaluation.
    pub fn reload(&self, config: DetectionConfig) {
        self.detector.set_max_results(config.max_results);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        info!("Detection settings reloaded");
    }

    /// Returns the local alert bus.
    #[must_use]
    pub const fn bus(&self) -> &AlertBus {
        &self.bus
    }

    /// Checks `id` for duplicates and dispatches an alert if warranted.
    ///
    /// Nothing is scanned when alerts are disabled or `action` is ignored.
    /// Returns the alert that was dispatched, if any. Fleet publication is
    /// best effort; a failure is logged and the local alert still stands.
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn evaluate(&self, id: ItemId, actor: &str, action: &str) -> Option<Alert> {
        let threshold = {
            let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
            if !config.alerts_enabled || config.is_ignored(action) {
                debug!("Alerts disabled for this action");
                return None;
            }
            config.alert_threshold()
        };

        let duplicates = self.detector.find_duplicates(id);
        if duplicates.len() < threshold {
            return None;
        }

        let alert = Alert::local(actor, id, duplicates.len(), self.node_name.as_str());
        warn!(
            actor,
            duplicates = alert.duplicate_count,
            "Duplicate item detected"
        );
        self.dispatch(alert.clone()).await;
        Some(alert)
    }

    /// Sends `alert` to local subscribers and then to the fleet.
    pub async fn dispatch(&self, alert: Alert) {
        metrics::counter!("itemtrace_alerts_dispatched_total").increment(1);
        let delivered = self.bus.publish(alert.clone());
        debug!(delivered, "Alert delivered locally");

        if let Err(e) = self.sync.publish(&alert).await {
            warn!(error = %e, sync = self.sync.name(), "Failed to publish alert to fleet");
        }
    }

    /// Handles an alert received from the fleet.
    ///
    /// Alerts this node raised are dropped; others are re-broadcast locally.
    /// Returns true if the alert was re-broadcast.
    pub fn receive(&self, alert: Alert) -> bool {
        if alert.is_from(&self.node_name) {
            return false;
        }
        metrics::counter!("itemtrace_alerts_received_total").increment(1);
        info!(
            origin = %alert.origin_node,
            actor = %alert.actor,
            item_id = %alert.id,
            duplicates = alert.duplicate_count,
            "Duplicate alert from fleet"
        );
        self.bus.publish(alert.into_network());
        true
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("node_name", &self.node_name)
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}
