//! Channel entity and repository trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Channel kinds relevant to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// A text channel inside a guild.
    #[default]
    Text,
    /// A direct-message channel between participants.
    DirectMessage,
}

impl ChannelKind {
    pub fn from_str(s: &str) -> Self {
        match s {
            "direct_message" => Self::DirectMessage,
            _ => Self::Text,
        }
    }
}

/// A channel row. `guild_id` is `None` for DM channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub guild_id: Option<i64>,
    pub kind: ChannelKind,
    pub name: Option<String>,
}

/// Repository trait for channel lookups used by the gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// Find a channel by ID.
    async fn find_by_id(&self, id: i64) -> Result<Option<Channel>, AppError>;

    /// IDs of all channels belonging to a guild.
    async fn channel_ids_in_guild(&self, guild_id: i64) -> Result<Vec<i64>, AppError>;

    /// IDs of all direct-message channels the user participates in.
    async fn dm_channel_ids(&self, user_id: i64) -> Result<Vec<i64>, AppError>;

    /// Whether the user is a participant of the given DM channel.
    async fn is_dm_participant(&self, channel_id: i64, user_id: i64) -> Result<bool, AppError>;
}
