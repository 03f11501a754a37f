//! Cross-node synchronization.
//!
//! Nodes in a fleet share three things through the synchronizer: duplicate
//! alerts, the fingerprints of newly registered items, and action history.
//! Everything here is best effort and eventually consistent. The engine only
//! calls a [`NodeSync`] from supervised background tasks, so a slow or
//! unreachable transport never delays registration or detection.
//!
//! # Implementations
//!
//! | Type | Transport |
//! |------|-----------|
//! | [`NoopSync`] | none; sync disabled |
//! | [`LoopbackSync`] | in-process hub shared by several engines |
//! | [`RedisSync`] | Redis pub/sub and hashes (feature `redis`) |

mod loopback;
mod redis;
pub mod wire;

pub use self::redis::RedisSync;
pub use loopback::{LoopbackHub, LoopbackSync};

use crate::config::{env_flag, env_parse};
use crate::models::{ActionLogEntry, Alert, ItemId, NetworkRecord};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Default Redis connection URL.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Default TTL of fingerprint entries (one day).
pub const DEFAULT_ITEM_TTL_SECS: u64 = 86_400;

/// Default TTL of history lists (one week).
pub const DEFAULT_HISTORY_TTL_SECS: u64 = 604_800;

/// Callback invoked for every alert received from the network.
pub type InboundAlertHandler = Arc<dyn Fn(Alert) + Send + Sync>;

/// Cross-node synchronizer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Whether to connect to the fleet at all.
    pub enabled: bool,
    /// Redis connection URL.
    pub redis_url: String,
    /// TTL of fingerprint entries in seconds.
    pub item_ttl_secs: u64,
    /// TTL of history lists in seconds.
    pub history_ttl_secs: u64,
    /// Entries kept per remote history list.
    pub max_history: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            item_ttl_secs: DEFAULT_ITEM_TTL_SECS,
            history_ttl_secs: DEFAULT_HISTORY_TTL_SECS,
            max_history: crate::config::DEFAULT_MAX_HISTORY,
        }
    }
}

impl SyncConfig {
    /// Applies `ITEMTRACE_SYNC_ENABLED` and `ITEMTRACE_REDIS_URL`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(enabled) = env_flag("ITEMTRACE_SYNC_ENABLED") {
            self.enabled = enabled;
        }
        if let Some(url) = env_parse::<String>("ITEMTRACE_REDIS_URL").filter(|u| !u.is_empty()) {
            self.redis_url = url;
        }
        self
    }
}

/// A history entry read back from the fleet.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RemoteAction {
    /// The recorded action.
    #[serde(flatten)]
    pub entry: ActionLogEntry,
    /// Node that recorded it.
    pub origin_node: String,
}

/// Best-effort publish/subscribe boundary between nodes.
///
/// Implementations report transport failures as [`crate::Error::Sync`]. The
/// engine logs them and carries on.
#[async_trait]
pub trait NodeSync: Send + Sync {
    /// Short name of the transport, for logs.
    fn name(&self) -> &'static str;

    /// Broadcasts a locally raised alert to the fleet.
    async fn publish(&self, alert: &Alert) -> Result<()>;

    /// Announces a newly registered item's fingerprint.
    async fn publish_fingerprint(
        &self,
        id: ItemId,
        fingerprint: &str,
        creator: &str,
        timestamp: u64,
    ) -> Result<()>;

    /// Returns items other nodes registered with `fingerprint`.
    async fn query_network_duplicates(&self, fingerprint: &str) -> Result<Vec<NetworkRecord>>;

    /// Delivers alerts from the fleet to `handler`.
    ///
    /// Alerts this node published may be delivered back; callers filter by
    /// origin. A transport may keep the returned future pending for as long
    /// as the subscription lives, so callers run it as a cancellable task.
    async fn subscribe(&self, handler: InboundAlertHandler) -> Result<()>;

    /// Releases the handlers this node registered with [`Self::subscribe`].
    ///
    /// Transports whose subscription lives inside the `subscribe` future
    /// release it when that future is dropped and keep this default.
    async fn unsubscribe(&self) -> Result<()> {
        Ok(())
    }

    /// Appends an entry to the shared history of `id`.
    async fn publish_action(&self, _id: ItemId, _entry: &ActionLogEntry) -> Result<()> {
        Ok(())
    }

    /// Returns the shared history of `id`, oldest first.
    async fn fetch_history(&self, _id: ItemId) -> Result<Vec<RemoteAction>> {
        Ok(Vec::new())
    }

    /// Checks that the transport is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Synchronizer used when cross-node sync is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSync;

#[async_trait]
impl NodeSync for NoopSync {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn publish(&self, _alert: &Alert) -> Result<()> {
        Ok(())
    }

    async fn publish_fingerprint(
        &self,
        _id: ItemId,
        _fingerprint: &str,
        _creator: &str,
        _timestamp: u64,
    ) -> Result<()> {
        Ok(())
    }

    async fn query_network_duplicates(&self, _fingerprint: &str) -> Result<Vec<NetworkRecord>> {
        Ok(Vec::new())
    }

    async fn subscribe(&self, _handler: InboundAlertHandler) -> Result<()> {
        Ok(())
    }
}

/// Connects the synchronizer described by `config`.
///
/// Falls back to [`NoopSync`] when sync is disabled or the transport cannot
/// be reached; the failure is logged.
pub async fn connect(config: &SyncConfig, node_name: &str) -> Arc<dyn NodeSync> {
    if !config.enabled {
        return Arc::new(NoopSync);
    }

    match RedisSync::connect(config, node_name).await {
        Ok(sync) => {
            tracing::info!(url = %config.redis_url, "Connected to fleet sync");
            Arc::new(sync)
        },
        Err(e) => {
            tracing::warn!(error = %e, "Fleet sync unavailable, continuing standalone");
            Arc::new(NoopSync)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_sync_accepts_everything() {
        let sync = NoopSync;
        let alert = Alert::local("alice", ItemId::new(1), 1, "n1");
        assert!(sync.publish(&alert).await.is_ok());
        assert!(
            sync.publish_fingerprint(ItemId::new(1), "fp", "alice", 1)
                .await
                .is_ok()
        );
        assert!(sync.query_network_duplicates("fp").await.expect("ok").is_empty());
        assert!(sync.ping().await.is_ok());
        assert_eq!(sync.name(), "noop");
    }

    #[tokio::test]
    async fn test_disabled_config_connects_noop() {
        let sync = connect(&SyncConfig::default(), "n1").await;
        assert_eq!(sync.name(), "noop");
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.item_ttl_secs, 86_400);
        assert_eq!(config.history_ttl_secs, 604_800);
    }
}
