//! Configuration management.

mod settings;

pub use settings::{
    BroadcastBackendKind, DatabaseSettings, GatewaySettings, RedisSettings, ServerSettings,
    Settings, SnowflakeSettings,
};
