//! Channel Repository Implementation
//!
//! PostgreSQL implementation of the ChannelRepository trait. Covers the
//! lookups the gateway needs: channel hydration for authorization checks,
//! guild channel enumeration for room joins, and DM participation.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::{Channel, ChannelKind, ChannelRepository};
use crate::shared::error::AppError;

#[derive(Debug, sqlx::FromRow)]
struct ChannelRow {
    id: i64,
    guild_id: Option<i64>,
    kind: String,
    name: Option<String>,
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            id: row.id,
            guild_id: row.guild_id,
            kind: ChannelKind::from_str(&row.kind),
            name: row.name,
        }
    }
}

/// PostgreSQL channel repository implementation.
#[derive(Clone)]
pub struct PgChannelRepository {
    pool: PgPool,
}

impl PgChannelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRepository for PgChannelRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Channel>, AppError> {
        let row = sqlx::query_as::<_, ChannelRow>(
            r#"
            SELECT id, guild_id, kind, name
            FROM channels
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Channel::from))
    }

    async fn channel_ids_in_guild(&self, guild_id: i64) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM channels
            WHERE guild_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn dm_channel_ids(&self, user_id: i64) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT channel_id FROM channel_participants
            WHERE user_id = $1
            ORDER BY channel_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn is_dm_participant(&self, channel_id: i64, user_id: i64) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM channel_participants WHERE channel_id = $1 AND user_id = $2)",
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
