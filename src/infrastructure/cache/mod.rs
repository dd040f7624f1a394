//! Cache Module
//!
//! Redis connection management and the gateway's cache services:
//! session lookup, presence storage, and the per-channel recent-message
//! page. All services share a `ConnectionManager` with automatic
//! reconnection.

mod message_cache;
mod presence_cache;

pub use message_cache::{ChannelMessageCache, RedisMessageCache};
#[cfg(test)]
pub use message_cache::MockChannelMessageCache;
pub use presence_cache::{PresenceRecord, PresenceStatus, PresenceStore, PresenceTracker};
#[cfg(test)]
pub use presence_cache::MockPresenceTracker;

use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{info, instrument};

use crate::config::RedisSettings;

/// Creates a Redis connection manager with automatic reconnection.
#[instrument(skip(settings), fields(url = %settings.url))]
pub async fn create_redis_client(
    settings: &RedisSettings,
) -> Result<ConnectionManager, redis::RedisError> {
    info!("Connecting to Redis...");
    let client = Client::open(settings.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    info!("Redis connection established");
    Ok(manager)
}

/// Cache key prefixes.
///
/// Use these helpers to keep key naming consistent across services.
pub mod keys {
    /// Prefix for token-hash keyed session data (e.g. "session:<sha256>")
    pub const SESSION: &str = "session:";

    /// Prefix for user presence records (e.g. "presence:user_id")
    pub const PRESENCE: &str = "presence:";

    /// Prefix for cached recent-message pages (e.g. "channel:messages:channel_id")
    pub const CHANNEL_MESSAGES: &str = "channel:messages:";

    /// Pub/sub channel for presence change notifications
    pub const PRESENCE_EVENTS: &str = "presence:events";

    #[inline]
    pub fn session(token_hash: &str) -> String {
        format!("{}{}", SESSION, token_hash)
    }

    #[inline]
    pub fn presence(user_id: impl std::fmt::Display) -> String {
        format!("{}{}", PRESENCE, user_id)
    }

    #[inline]
    pub fn channel_messages(channel_id: impl std::fmt::Display) -> String {
        format!("{}{}", CHANNEL_MESSAGES, channel_id)
    }
}
