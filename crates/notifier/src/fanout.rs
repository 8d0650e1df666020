//! Realtime fanout transport.
//!
//! Successful primary delivery emits an event so connected clients see the
//! notification immediately. Connection handling and clustering belong to
//! the realtime gateway; this side only publishes to the shared Redis bus it
//! subscribes on.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use herald_common::error::AppError;
use herald_common::types::DeliveredNotification;

/// Channel name for events addressed to every connected client.
const BROADCAST_CHANNEL: &str = "notification:broadcast";

/// Realtime "emit to all" / "emit to subscribers of a user" capability.
#[async_trait]
pub trait RealtimeFanout: Send + Sync {
    async fn emit_broadcast(&self, event: &DeliveredNotification) -> Result<(), AppError>;
    async fn emit_to_user(
        &self,
        user_id: &str,
        event: &DeliveredNotification,
    ) -> Result<(), AppError>;
}

/// `RealtimeFanout` over Redis pub/sub.
#[derive(Clone)]
pub struct RedisFanout {
    redis: ConnectionManager,
}

impl RedisFanout {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    async fn publish(&self, channel: &str, event: &DeliveredNotification) -> Result<(), AppError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Internal(format!("failed to encode fanout event: {e}")))?;

        let mut conn = self.redis.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;

        tracing::debug!(channel, notification_id = %event.id, "Fanout event published");
        Ok(())
    }
}

#[async_trait]
impl RealtimeFanout for RedisFanout {
    async fn emit_broadcast(&self, event: &DeliveredNotification) -> Result<(), AppError> {
        self.publish(BROADCAST_CHANNEL, event).await
    }

    async fn emit_to_user(
        &self,
        user_id: &str,
        event: &DeliveredNotification,
    ) -> Result<(), AppError> {
        self.publish(&format!("notification:{user_id}"), event).await
    }
}
