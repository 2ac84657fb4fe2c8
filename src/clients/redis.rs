use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, warn};

use crate::models::message::NotificationMessage;

/// Recent accepted notifications per merchant/terminal, newest first.
#[async_trait]
pub trait NotificationHistory: Send + Sync {
    async fn record(&self, notification: &NotificationMessage, limit: usize) -> Result<()>;

    async fn recent(
        &self,
        merchant_id: &str,
        terminal_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationMessage>>;

    async fn health_check(&self) -> Result<()>;
}

pub fn history_key(merchant_id: &str, terminal_id: &str) -> String {
    format!("notifications:{}:{}", merchant_id, terminal_id)
}

pub struct RedisHistory {
    connection: MultiplexedConnection,
}

impl RedisHistory {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        debug!("Connecting to Redis");

        let client =
            Client::open(redis_url).map_err(|_| anyhow!("Failed to create redis client"))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|_| anyhow!("Failed to connect to redis client"))?;

        debug!("Redis connection established");

        Ok(Self { connection })
    }
}

#[async_trait]
impl NotificationHistory for RedisHistory {
    async fn record(&self, notification: &NotificationMessage, limit: usize) -> Result<()> {
        let key = history_key(&notification.merchant_id, &notification.terminal_id);
        let payload = serde_json::to_string(notification)?;
        let mut conn = self.connection.clone();

        redis::pipe()
            .atomic()
            .lpush(&key, payload)
            .ignore()
            .ltrim(&key, 0, limit.saturating_sub(1) as isize)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to record notification history: {}", e))?;

        Ok(())
    }

    async fn recent(
        &self,
        merchant_id: &str,
        terminal_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let key = history_key(merchant_id, terminal_id);
        let mut conn = self.connection.clone();

        let entries: Vec<String> = conn
            .lrange(&key, 0, limit as isize - 1)
            .await
            .map_err(|e| anyhow!("Failed to read notification history: {}", e))?;

        let notifications = entries
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(notification) => Some(notification),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable history entry");
                    None
                }
            })
            .collect();

        Ok(notifications)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Redis ping failed: {}", e))?;
        Ok(())
    }
}
