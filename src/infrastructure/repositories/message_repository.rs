//! Message Repository Implementation
//!
//! PostgreSQL implementation of the MessageRepository trait. IDs are
//! snowflakes minted by the application layer, so creation is a plain
//! INSERT rather than a sequence round-trip.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Message, MessageRepository};
use crate::shared::error::AppError;

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    channel_id: i64,
    author_id: i64,
    content: Option<String>,
    attachment_ref: Option<String>,
    reply_to_id: Option<i64>,
    edited_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            channel_id: row.channel_id,
            author_id: row.author_id,
            content: row.content,
            attachment_ref: row.attachment_ref,
            reply_to_id: row.reply_to_id,
            edited_at: row.edited_at,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL message repository implementation.
#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Message>, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, channel_id, author_id, content, attachment_ref,
                   reply_to_id, edited_at, created_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Message::from))
    }

    async fn find_recent(&self, channel_id: i64, limit: i32) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, channel_id, author_id, content, attachment_ref,
                   reply_to_id, edited_at, created_at
            FROM messages
            WHERE channel_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(channel_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn create(&self, message: &Message) -> Result<Message, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, channel_id, author_id, content,
                                  attachment_ref, reply_to_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, channel_id, author_id, content, attachment_ref,
                      reply_to_id, edited_at, created_at
            "#,
        )
        .bind(message.id)
        .bind(message.channel_id)
        .bind(message.author_id)
        .bind(&message.content)
        .bind(&message.attachment_ref)
        .bind(message.reply_to_id)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(Message::from(row))
    }

    async fn update(&self, message: &Message) -> Result<Message, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE messages
            SET content = $2, edited_at = $3
            WHERE id = $1
            RETURNING id, channel_id, author_id, content, attachment_ref,
                      reply_to_id, edited_at, created_at
            "#,
        )
        .bind(message.id)
        .bind(&message.content)
        .bind(message.edited_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::from)
            .ok_or_else(|| AppError::NotFound(format!("message {} not found", message.id)))
    }

    async fn delete(&self, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("message {} not found", id)));
        }

        Ok(())
    }
}
