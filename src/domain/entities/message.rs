//! Message entity and repository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Maximum message content length, in Unicode code points.
pub const MAX_CONTENT_CODE_POINTS: usize = 2000;

/// A persisted message. The gateway never holds authoritative copies; the
/// row returned by the store is the ground truth for broadcast payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Snowflake ID (primary key)
    pub id: i64,

    /// Channel the message was sent in
    pub channel_id: i64,

    /// Author user ID
    pub author_id: i64,

    /// Message content; may be absent when an attachment is present
    pub content: Option<String>,

    /// Reference to an uploaded attachment, if any
    pub attachment_ref: Option<String>,

    /// ID of the message being replied to, if this is a reply
    pub reply_to_id: Option<i64>,

    /// Timestamp of the last edit (None if never edited)
    pub edited_at: Option<DateTime<Utc>>,

    /// Timestamp when the message was sent
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }
}

/// Repository trait for message persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Find a message by its snowflake ID.
    async fn find_by_id(&self, id: i64) -> Result<Option<Message>, AppError>;

    /// The most recent messages in a channel, newest first.
    async fn find_recent(&self, channel_id: i64, limit: i32) -> Result<Vec<Message>, AppError>;

    /// Persist a new message; returns the stored row.
    async fn create(&self, message: &Message) -> Result<Message, AppError>;

    /// Persist an edit; returns the updated row.
    async fn update(&self, message: &Message) -> Result<Message, AppError>;

    /// Delete a message row.
    async fn delete(&self, id: i64) -> Result<(), AppError>;
}
