use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::Client;

use crate::{error::AppResult, models::DomainEvent, services::providers::EventPublisher};

/// Pub/sub channel carrying recommendation domain events
pub const EVENTS_CHANNEL: &str = "track-recs.events";

/// Publishes domain events as JSON on a Redis channel
///
/// Holds one reconnecting connection shared by every publish call.
#[derive(Clone)]
pub struct RedisEventPublisher {
    connection: ConnectionManager,
}

impl RedisEventPublisher {
    pub async fn new(redis_client: Client) -> AppResult<Self> {
        let connection = ConnectionManager::new(redis_client).await?;
        Ok(Self { connection })
    }
}

#[async_trait::async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> AppResult<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.connection.clone();
        let receivers: i64 = conn.publish(EVENTS_CHANNEL, payload).await?;

        tracing::debug!(receivers, "Published domain event");
        Ok(())
    }
}

/// Publisher that only records events in the log
#[derive(Clone, Default)]
pub struct LogEventPublisher;

#[async_trait::async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> AppResult<()> {
        tracing::info!(event = ?event, "Domain event");
        Ok(())
    }
}
