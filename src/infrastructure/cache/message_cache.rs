//! Channel Message Cache
//!
//! Caches the most recent page of messages per channel as a single JSON
//! value. Writes to a channel delete the page; the next read repopulates
//! it from the store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::keys;
use crate::domain::Message;
use crate::shared::error::AppError;

/// Cache contract for per-channel recent-message pages.
///
/// Invalidation is delete-on-write: send, edit, and delete all drop the
/// page so readers never see a stale mix.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelMessageCache: Send + Sync {
    /// The cached page for a channel, newest first. `None` on miss.
    async fn recent_page(&self, channel_id: i64) -> Result<Option<Vec<Message>>, AppError>;

    /// Store a freshly loaded page.
    async fn store_page(&self, channel_id: i64, messages: &[Message]) -> Result<(), AppError>;

    /// Drop the cached page for a channel.
    async fn invalidate(&self, channel_id: i64) -> Result<(), AppError>;
}

/// Redis-backed message cache.
#[derive(Clone)]
pub struct RedisMessageCache {
    redis: ConnectionManager,
    ttl: u64,
}

impl RedisMessageCache {
    pub fn new(redis: ConnectionManager, ttl: u64) -> Self {
        Self { redis, ttl }
    }
}

#[async_trait]
impl ChannelMessageCache for RedisMessageCache {
    async fn recent_page(&self, channel_id: i64) -> Result<Option<Vec<Message>>, AppError> {
        let key = keys::channel_messages(channel_id);

        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(&key).await?;

        match value {
            Some(json) => {
                let page = serde_json::from_str(&json)
                    .map_err(|e| AppError::Internal(format!("Deserialization error: {}", e)))?;
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    async fn store_page(&self, channel_id: i64, messages: &[Message]) -> Result<(), AppError> {
        let key = keys::channel_messages(channel_id);
        let value = serde_json::to_string(messages)
            .map_err(|e| AppError::Internal(format!("Serialization error: {}", e)))?;

        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(&key, value, self.ttl).await?;

        Ok(())
    }

    async fn invalidate(&self, channel_id: i64) -> Result<(), AppError> {
        let key = keys::channel_messages(channel_id);

        let mut conn = self.redis.clone();
        conn.del::<_, ()>(&key).await?;

        Ok(())
    }
}
