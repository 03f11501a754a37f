//! Tokio broadcast bus delivering duplicate alerts to local subscribers.
//!
//! Subscribing is the opt-in: only receivers that exist when an alert is
//! published see it. Slow receivers lag and lose the oldest alerts rather
//! than blocking the publisher.

use crate::models::{Alert, AlertSource};
use tokio::sync::broadcast;

/// Default number of buffered alerts per receiver.
pub const DEFAULT_ALERT_BUS_CAPACITY: usize = 1024;

/// Local alert bus.
#[derive(Clone)]
pub struct AlertBus {
    sender: broadcast::Sender<Alert>,
}

/// Filtered receiver that yields alerts matching a predicate.
pub struct FilteredReceiver<F> {
    receiver: broadcast::Receiver<Alert>,
    predicate: F,
}

impl AlertBus {
    /// Creates a new alert bus with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an alert to all current subscribers (best effort).
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, alert: Alert) -> usize {
        metrics::counter!("itemtrace_alert_bus_publish_total").increment(1);
        match self.sender.send(alert) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::debug!("No local alert subscribers");
                0
            },
        }
    }

    /// Subscribes to every alert.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        metrics::counter!("itemtrace_alert_bus_subscriptions_total").increment(1);
        self.sender.subscribe()
    }

    /// Subscribes with a predicate.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, predicate: F) -> FilteredReceiver<F>
    where
        F: Fn(&Alert) -> bool,
    {
        metrics::counter!("itemtrace_alert_bus_subscriptions_total").increment(1);
        FilteredReceiver {
            receiver: self.sender.subscribe(),
            predicate,
        }
    }

    /// Subscribes to alerts received from other nodes only.
    #[must_use]
    pub fn subscribe_network(&self) -> FilteredReceiver<impl Fn(&Alert) -> bool> {
        self.subscribe_filtered(|alert| alert.source == AlertSource::Network)
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_BUS_CAPACITY)
    }
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&Alert) -> bool,
{
    /// Receives the next alert that matches the predicate.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Closed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<Alert, broadcast::error::RecvError> {
        loop {
            match self.receiver.recv().await {
                Ok(alert) => {
                    if (self.predicate)(&alert) {
                        return Ok(alert);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::counter!("itemtrace_alert_bus_lagged_total").increment(skipped);
                },
                Err(err) => return Err(err),
            }
        }
    }
}
