//! In-app delivery over Redis pub/sub, one channel per platform app.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::json;

use herald_common::types::DeliveryKey;
use herald_engine::processor::DispatchError;

#[derive(Clone)]
pub struct InAppPublisher {
    redis: ConnectionManager,
}

impl InAppPublisher {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn publish(
        &self,
        key: &DeliveryKey,
        platform_app_ids: &[String],
        content: &str,
    ) -> Result<(), DispatchError> {
        let message = json!({
            "id": key.request_id,
            "userId": key.recipient_id,
            "type": key.notification_type,
            "content": content,
        })
        .to_string();

        let mut redis = self.redis.clone();
        for app_id in platform_app_ids {
            let receivers: i64 = redis
                .publish(channel_name(app_id), &message)
                .await
                .map_err(|e| DispatchError::Transport(format!("Redis publish failed: {e}")))?;
            tracing::debug!(app_id = %app_id, receivers, "In-app notification published");
        }
        Ok(())
    }
}

pub fn channel_name(app_id: &str) -> String {
    format!("in_app:{app_id}")
}
