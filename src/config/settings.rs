//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL)
    pub database: DatabaseSettings,

    /// Redis configuration
    pub redis: RedisSettings,

    /// Gateway behavior (admission, timers, cache, broadcast backend)
    pub gateway: GatewaySettings,

    /// Snowflake ID generator settings
    pub snowflake: SnowflakeSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

/// Which broadcast backend fans events out to rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastBackendKind {
    /// Direct dispatch to locally-held connections (single process).
    Local,
    /// Redis pub/sub fan-out across gateway instances.
    Redis,
}

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    /// Maximum simultaneous connections per remote address
    pub max_connections_per_address: u32,

    /// Typing indicator expiry in seconds
    pub typing_ttl_secs: u64,

    /// Presence record TTL in seconds
    pub presence_ttl_secs: u64,

    /// Channel message-page cache TTL in seconds
    pub message_cache_ttl_secs: u64,

    /// Number of messages held in a cached channel page
    pub message_cache_page_size: i32,

    /// Broadcast backend selection
    pub broadcast: BroadcastBackendKind,

    /// Pub/sub channel name used by the redis broadcast backend
    pub event_channel: String,
}

/// Snowflake ID generator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SnowflakeSettings {
    /// Machine/worker ID (0-1023)
    pub machine_id: u16,
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. Built-in defaults
    /// 2. config/default.toml (base configuration)
    /// 3. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 4. Environment variables (highest priority)
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("gateway.max_connections_per_address", 10)?
            .set_default("gateway.typing_ttl_secs", 10)?
            .set_default("gateway.presence_ttl_secs", 300)?
            .set_default("gateway.message_cache_ttl_secs", 60)?
            .set_default("gateway.message_cache_page_size", 50)?
            .set_default("gateway.broadcast", "local")?
            .set_default("gateway.event_channel", "gateway:events")?
            .set_default("snowflake.machine_id", 1)?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option(
                "snowflake.machine_id",
                std::env::var("SNOWFLAKE_MACHINE_ID").ok(),
            )?
            .build()?
            .try_deserialize()
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_backend_kind_deserializes_lowercase() {
        let local: BroadcastBackendKind = serde_json::from_str("\"local\"").unwrap();
        let redis: BroadcastBackendKind = serde_json::from_str("\"redis\"").unwrap();
        assert_eq!(local, BroadcastBackendKind::Local);
        assert_eq!(redis, BroadcastBackendKind::Redis);
    }
}
