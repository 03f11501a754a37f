//! Redis transport for fleet sync.
//!
//! Alerts travel over pub/sub; fingerprints and history live in hashes and
//! lists with a TTL, so a fleet that stops writing cleans up after itself.
//! See [`super::wire`] for the key layout.

#[cfg(feature = "redis")]
mod implementation {
    use crate::models::{ActionLogEntry, Alert, ItemId, NetworkRecord};
    use crate::sync::{InboundAlertHandler, NodeSync, RemoteAction, SyncConfig, wire};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use futures::StreamExt;
    use redis::AsyncCommands;
    use redis::aio::ConnectionManager;
    use std::collections::HashMap;

    fn sync_error(operation: &'static str) -> impl Fn(redis::RedisError) -> Error {
        move |e| Error::Sync(format!("redis {operation}: {e}"))
    }

    fn ttl_arg(secs: u64) -> i64 {
        i64::try_from(secs).unwrap_or(i64::MAX)
    }

    /// Fleet sync over Redis.
    pub struct RedisSync {
        client: redis::Client,
        conn: ConnectionManager,
        node_name: String,
        item_ttl_secs: u64,
        history_ttl_secs: u64,
        max_history: usize,
    }

    impl RedisSync {
        /// Connects to the Redis server named in `config`.
        ///
        /// # Errors
        ///
        /// Returns `Sync` if the URL is invalid or the server is unreachable.
        pub async fn connect(config: &SyncConfig, node_name: &str) -> Result<Self> {
            let client = redis::Client::open(config.redis_url.as_str()).map_err(sync_error("open"))?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(sync_error("connect"))?;

            let sync = Self {
                client,
                conn,
                node_name: node_name.to_string(),
                item_ttl_secs: config.item_ttl_secs,
                history_ttl_secs: config.history_ttl_secs,
                max_history: config.max_history,
            };
            sync.ping().await?;
            Ok(sync)
        }
    }

    #[async_trait]
    impl NodeSync for RedisSync {
        fn name(&self) -> &'static str {
            "redis"
        }

        async fn publish(&self, alert: &Alert) -> Result<()> {
            let mut conn = self.conn.clone();
            let _: () = conn
                .publish(wire::ALERT_CHANNEL, wire::encode_alert(alert))
                .await
                .map_err(sync_error("publish"))?;
            Ok(())
        }

        async fn publish_fingerprint(
            &self,
            id: ItemId,
            fingerprint: &str,
            creator: &str,
            timestamp: u64,
        ) -> Result<()> {
            let fingerprint_key = wire::fingerprint_key(fingerprint);
            let ttl = ttl_arg(self.item_ttl_secs);
            let mut conn = self.conn.clone();

            redis::pipe()
                .atomic()
                .hset(
                    wire::ITEMS_KEY,
                    id.to_string(),
                    wire::encode_item_entry(fingerprint, creator, timestamp),
                )
                .ignore()
                .expire(wire::ITEMS_KEY, ttl)
                .ignore()
                .hset(
                    &fingerprint_key,
                    id.to_string(),
                    wire::encode_fingerprint_entry(creator, timestamp, &self.node_name),
                )
                .ignore()
                .expire(&fingerprint_key, ttl)
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .map_err(sync_error("publish_fingerprint"))
        }

        async fn query_network_duplicates(&self, fingerprint: &str) -> Result<Vec<NetworkRecord>> {
            let mut conn = self.conn.clone();
            let entries: HashMap<String, String> = conn
                .hgetall(wire::fingerprint_key(fingerprint))
                .await
                .map_err(sync_error("query_network_duplicates"))?;

            Ok(entries
                .iter()
                .filter_map(|(field, value)| wire::decode_fingerprint_entry(field, value).ok())
                .collect())
        }

        async fn subscribe(&self, handler: InboundAlertHandler) -> Result<()> {
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(sync_error("subscribe"))?;
            pubsub
                .subscribe(wire::ALERT_CHANNEL)
                .await
                .map_err(sync_error("subscribe"))?;

            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping non-text alert payload");
                        continue;
                    },
                };
                match wire::decode_alert(&payload) {
                    Ok(alert) => handler(alert),
                    Err(e) => tracing::warn!(error = %e, "Dropping malformed alert"),
                }
            }

            Err(Error::Sync("redis alert subscription closed".to_string()))
        }

        async fn publish_action(&self, id: ItemId, entry: &ActionLogEntry) -> Result<()> {
            let key = wire::history_key(id);
            let keep = isize::try_from(self.max_history).unwrap_or(isize::MAX);
            let mut conn = self.conn.clone();

            redis::pipe()
                .atomic()
                .rpush(&key, wire::encode_history_entry(id, entry, &self.node_name))
                .ignore()
                .ltrim(&key, -keep, -1)
                .ignore()
                .expire(&key, ttl_arg(self.history_ttl_secs))
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .map_err(sync_error("publish_action"))
        }

        async fn fetch_history(&self, id: ItemId) -> Result<Vec<RemoteAction>> {
            let mut conn = self.conn.clone();
            let values: Vec<String> = conn
                .lrange(wire::history_key(id), 0, -1)
                .await
                .map_err(sync_error("fetch_history"))?;

            Ok(values
                .iter()
                .filter_map(|value| wire::decode_history_entry(value).ok())
                .map(|(_, entry, origin_node)| RemoteAction { entry, origin_node })
                .collect())
        }

        async fn ping(&self) -> Result<()> {
            let mut conn = self.conn.clone();
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(sync_error("ping"))?;
            Ok(())
        }
    }
}

#[cfg(feature = "redis")]
pub use implementation::RedisSync;

#[cfg(not(feature = "redis"))]
mod stub {
    use crate::models::{Alert, ItemId, NetworkRecord};
    use crate::sync::{InboundAlertHandler, NodeSync, SyncConfig};
    use crate::{Error, Result};
    use async_trait::async_trait;

    fn not_enabled() -> Error {
        Error::Sync("redis support not compiled in (enable the `redis` feature)".to_string())
    }

    /// Stub Redis sync when the feature is not enabled.
    #[derive(Debug)]
    pub struct RedisSync;

    impl RedisSync {
        /// Always fails because the feature is not enabled.
        ///
        /// # Errors
        ///
        /// Always returns `Sync`.
        #[allow(clippy::unused_async)]
        pub async fn connect(_config: &SyncConfig, _node_name: &str) -> Result<Self> {
            Err(not_enabled())
        }
    }

    #[async_trait]
    impl NodeSync for RedisSync {
        fn name(&self) -> &'static str {
            "redis"
        }

        async fn publish(&self, _alert: &Alert) -> Result<()> {
            Err(not_enabled())
        }

        async fn publish_fingerprint(
            &self,
            _id: ItemId,
            _fingerprint: &str,
            _creator: &str,
            _timestamp: u64,
        ) -> Result<()> {
            Err(not_enabled())
        }

        async fn query_network_duplicates(&self, _fingerprint: &str) -> Result<Vec<NetworkRecord>> {
            Err(not_enabled())
        }

        async fn subscribe(&self, _handler: InboundAlertHandler) -> Result<()> {
            Err(not_enabled())
        }
    }
}

#[cfg(not(feature = "redis"))]
pub use stub::RedisSync;
