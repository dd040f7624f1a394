//! Guild membership and repository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// A user's membership in a guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub guild_id: i64,
    pub user_id: i64,
    pub joined_at: DateTime<Utc>,
}

/// Repository trait for guild-membership lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MemberRepository: Send + Sync {
    /// Whether the user is an active member of the guild.
    async fn is_member(&self, guild_id: i64, user_id: i64) -> Result<bool, AppError>;

    /// IDs of all guilds the user is a member of.
    async fn guild_ids_of(&self, user_id: i64) -> Result<Vec<i64>, AppError>;
}
