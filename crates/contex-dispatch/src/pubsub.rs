//! Redis pub/sub publisher for agent notification channels.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use contex_core::{Error, PubSubPublisher, Result};

/// Redis-backed publisher. Channel naming is `agent:{agent_id}:updates`.
///
/// Publishes are best-effort: a zero receiver count (no live subscriber) is
/// not an error; agents reconcile via the event stream on reconnect.
pub struct RedisPubSub {
    connection: ConnectionManager,
}

impl RedisPubSub {
    /// Connect to Redis. The connection manager reconnects automatically.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("invalid Redis URL: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::TransientBackend(format!("Redis connection failed: {e}")))?;
        info!(
            subsystem = "dispatch",
            component = "pubsub",
            "Connected to Redis for pub/sub"
        );
        Ok(Self { connection })
    }
}

#[async_trait]
impl PubSubPublisher for RedisPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut connection = self.connection.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut connection)
            .await
            .map_err(|e| Error::TransientBackend(format!("Redis publish failed: {e}")))?;
        debug!(
            subsystem = "dispatch",
            component = "pubsub",
            destination = channel,
            receivers,
            "Published notification"
        );
        Ok(receivers as usize)
    }

    async fn health_check(&self) -> Result<bool> {
        let mut connection = self.connection.clone();
        let pong: redis::RedisResult<String> =
            redis::cmd("PING").query_async(&mut connection).await;
        Ok(matches!(pong, Ok(p) if p == "PONG"))
    }
}
