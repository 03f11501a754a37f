//! In-process synchronizer.
//!
//! A [`LoopbackHub`] stands in for the shared transport: every engine given a
//! [`LoopbackSync`] on the same hub behaves as a member of one fleet. Values
//! pass through the same text encodings the Redis transport uses.

use super::{InboundAlertHandler, NodeSync, RemoteAction, wire};
use crate::models::{ActionLogEntry, Alert, ItemId, NetworkRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct HubState {
    subscribers: Vec<(String, InboundAlertHandler)>,
    items: HashMap<String, String>,
    fingerprints: HashMap<String, HashMap<String, String>>,
    history: HashMap<String, VecDeque<String>>,
}

/// Shared in-memory transport.
#[derive(Default)]
pub struct LoopbackHub {
    state: Mutex<HubState>,
    offline: AtomicBool,
}

impl LoopbackHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulates the transport going down or coming back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Sync("loopback hub offline".to_string()));
        }
        Ok(())
    }

    /// Returns the number of registered alert handlers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Returns the raw history list for `id`, oldest first.
    #[must_use]
    pub fn history_entries(&self, id: ItemId) -> Vec<String> {
        self.lock()
            .history
            .get(&wire::history_key(id))
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the raw `itemtrace:items` value for `id`.
    #[must_use]
    pub fn item_entry(&self, id: ItemId) -> Option<String> {
        self.lock().items.get(&id.to_string()).cloned()
    }
}

impl std::fmt::Debug for LoopbackHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LoopbackHub")
            .field("subscribers", &state.subscribers.len())
            .field("items", &state.items.len())
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish()
    }
}

/// One node's handle onto a [`LoopbackHub`].
#[derive(Debug, Clone)]
pub struct LoopbackSync {
    hub: Arc<LoopbackHub>,
    node_name: String,
    max_history: usize,
}

impl LoopbackSync {
    /// Joins `hub` as `node_name`.
    #[must_use]
    pub fn new(hub: Arc<LoopbackHub>, node_name: impl Into<String>) -> Self {
        Self {
            hub,
            node_name: node_name.into(),
            max_history: crate::config::DEFAULT_MAX_HISTORY,
        }
    }

    /// Sets the number of history entries kept per item.
    #[must_use]
    pub const fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }
}

#[async_trait]
impl NodeSync for LoopbackSync {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn publish(&self, alert: &Alert) -> Result<()> {
        self.hub.check_online()?;
        let message = wire::encode_alert(alert);
        // Handlers run outside the lock so they may call back into the hub.
        let subscribers = self.hub.lock().subscribers.clone();
        for (_, handler) in subscribers {
            match wire::decode_alert(&message) {
                Ok(inbound) => handler(inbound),
                Err(e) => tracing::warn!(error = %e, "Dropping undecodable alert"),
            }
        }
        Ok(())
    }

    async fn publish_fingerprint(
        &self,
        id: ItemId,
        fingerprint: &str,
        creator: &str,
        timestamp: u64,
    ) -> Result<()> {
        self.hub.check_online()?;
        let mut state = self.hub.lock();
        state.items.insert(
            id.to_string(),
            wire::encode_item_entry(fingerprint, creator, timestamp),
        );
        state
            .fingerprints
            .entry(wire::fingerprint_key(fingerprint))
            .or_default()
            .insert(
                id.to_string(),
                wire::encode_fingerprint_entry(creator, timestamp, &self.node_name),
            );
        Ok(())
    }

    async fn query_network_duplicates(&self, fingerprint: &str) -> Result<Vec<NetworkRecord>> {
        self.hub.check_online()?;
        let state = self.hub.lock();
        let Some(entries) = state.fingerprints.get(&wire::fingerprint_key(fingerprint)) else {
            return Ok(Vec::new());
        };

        let records = entries
            .iter()
            .filter_map(|(field, value)| match wire::decode_fingerprint_entry(field, value) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed fingerprint entry");
                    None
                },
            })
            .collect();
        Ok(records)
    }

    async fn subscribe(&self, handler: InboundAlertHandler) -> Result<()> {
        self.hub.check_online()?;
        self.hub
            .lock()
            .subscribers
            .push((self.node_name.clone(), handler));
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.hub
            .lock()
            .subscribers
            .retain(|(node, _)| *node != self.node_name);
        Ok(())
    }

    async fn publish_action(&self, id: ItemId, entry: &ActionLogEntry) -> Result<()> {
        self.hub.check_online()?;
        let value = wire::encode_history_entry(id, entry, &self.node_name);
        let mut state = self.hub.lock();
        let list = state.history.entry(wire::history_key(id)).or_default();
        list.push_back(value);
        while list.len() > self.max_history {
            list.pop_front();
        }
        Ok(())
    }

    async fn fetch_history(&self, id: ItemId) -> Result<Vec<RemoteAction>> {
        self.hub.check_online()?;
        Ok(self
            .hub
            .history_entries(id)
            .iter()
            .filter_map(|value| wire::decode_history_entry(value).ok())
            .map(|(_, entry, origin_node)| RemoteAction { entry, origin_node })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.hub.check_online()
    }
}
