//! Message Pipeline
//!
//! Send, edit, and delete follow the same shape: validate the payload,
//! authorize the actor against the channel, persist, invalidate the
//! channel's cached page, then broadcast. Persistence failures abort
//! before any broadcast; cache failures after a successful write are
//! logged and swallowed so a cache outage never blocks messaging.

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{
    Channel, ChannelRepository, MemberRepository, Message, MessageRepository, UserRepository,
    MAX_CONTENT_CODE_POINTS,
};
use crate::infrastructure::cache::ChannelMessageCache;
use crate::infrastructure::metrics;
use crate::presentation::websocket::{
    parse_wire_id, BroadcastBackend, MessagePayload, RoomKey, SendMessagePayload, ServerEvent,
};
use crate::shared::error::GatewayError;
use crate::shared::snowflake::SnowflakeGenerator;

/// The message pipeline service.
pub struct MessageBroadcastService {
    messages: Arc<dyn MessageRepository>,
    channels: Arc<dyn ChannelRepository>,
    members: Arc<dyn MemberRepository>,
    users: Arc<dyn UserRepository>,
    cache: Arc<dyn ChannelMessageCache>,
    backend: Arc<dyn BroadcastBackend>,
    snowflake: Arc<SnowflakeGenerator>,
    page_size: i32,
}

impl MessageBroadcastService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        channels: Arc<dyn ChannelRepository>,
        members: Arc<dyn MemberRepository>,
        users: Arc<dyn UserRepository>,
        cache: Arc<dyn ChannelMessageCache>,
        backend: Arc<dyn BroadcastBackend>,
        snowflake: Arc<SnowflakeGenerator>,
        page_size: i32,
    ) -> Self {
        Self {
            messages,
            channels,
            members,
            users,
            cache,
            backend,
            snowflake,
            page_size,
        }
    }

    /// Check that a user may act in a channel. Unknown channels read as
    /// validation failures so probing cannot distinguish "does not
    /// exist" from "malformed".
    pub async fn authorize_channel(
        &self,
        user_id: i64,
        channel_id: i64,
    ) -> Result<Channel, GatewayError> {
        let Some(channel) = self.channels.find_by_id(channel_id).await? else {
            return Err(GatewayError::Validation(format!(
                "unknown channel {}",
                channel_id
            )));
        };

        let permitted = match channel.guild_id {
            Some(guild_id) => self.members.is_member(guild_id, user_id).await?,
            None => self.channels.is_dm_participant(channel_id, user_id).await?,
        };
        if !permitted {
            return Err(GatewayError::Authorization(format!(
                "no access to channel {}",
                channel_id
            )));
        }

        Ok(channel)
    }

    /// Send a new message. Returns the wire payload for the sender's ack;
    /// everyone else in the channel room receives `new_message`.
    pub async fn send(
        &self,
        author_id: i64,
        origin: Option<Uuid>,
        request: &SendMessagePayload,
    ) -> Result<MessagePayload, GatewayError> {
        let channel_id = parse_wire_id("channel_id", &request.channel_id)?;
        let reply_to_id = request
            .reply_to
            .as_deref()
            .map(|raw| parse_wire_id("reply_to", raw))
            .transpose()?;

        validate_content(request.content.as_deref(), request.attachment_ref.as_deref())?;
        self.authorize_channel(author_id, channel_id).await?;

        let message = Message {
            id: self.snowflake.generate(),
            channel_id,
            author_id,
            content: request.content.clone(),
            attachment_ref: request.attachment_ref.clone(),
            reply_to_id,
            edited_at: None,
            created_at: Utc::now(),
        };
        let stored = match self.messages.create(&message).await {
            Ok(stored) => stored,
            Err(e) => {
                metrics::record_message_op("send", "error");
                return Err(e.into());
            }
        };

        let payload = self.payload_for(&stored).await?;
        self.invalidate_page(channel_id).await;
        self.backend
            .publish(
                RoomKey::Channel(channel_id),
                ServerEvent::NewMessage {
                    message: payload.clone(),
                },
                origin,
            )
            .await;

        metrics::record_message_op("send", "ok");
        Ok(payload)
    }

    /// Edit a message. Only the author may edit; the full updated
    /// message is broadcast, sender included, so every client converges
    /// on the same content.
    pub async fn edit(
        &self,
        editor_id: i64,
        message_id: i64,
        content: &str,
    ) -> Result<(), GatewayError> {
        let existing = self.load_owned(editor_id, message_id, "edit").await?;
        validate_content(Some(content), None)?;

        let updated = self
            .messages
            .update(&Message {
                content: Some(content.to_string()),
                edited_at: Some(Utc::now()),
                ..existing
            })
            .await?;

        let payload = self.payload_for(&updated).await?;
        self.invalidate_page(updated.channel_id).await;
        self.backend
            .publish(
                RoomKey::Channel(updated.channel_id),
                ServerEvent::MessageEdited { message: payload },
                None,
            )
            .await;

        metrics::record_message_op("edit", "ok");
        Ok(())
    }

    /// Delete a message. Only the author may delete.
    pub async fn delete(&self, requester_id: i64, message_id: i64) -> Result<(), GatewayError> {
        let existing = self.load_owned(requester_id, message_id, "delete").await?;

        self.messages.delete(message_id).await?;

        self.invalidate_page(existing.channel_id).await;
        self.backend
            .publish(
                RoomKey::Channel(existing.channel_id),
                ServerEvent::MessageDeleted {
                    message_id: message_id.to_string(),
                    channel_id: existing.channel_id.to_string(),
                },
                None,
            )
            .await;

        metrics::record_message_op("delete", "ok");
        Ok(())
    }

    /// Read-through page of the most recent messages in a channel.
    pub async fn recent_messages(&self, channel_id: i64) -> Result<Vec<Message>, GatewayError> {
        match self.cache.recent_page(channel_id).await {
            Ok(Some(page)) => return Ok(page),
            Ok(None) => {}
            Err(e) => warn!(channel_id, error = %e, "message page read failed, falling back to store"),
        }

        let page = self.messages.find_recent(channel_id, self.page_size).await?;
        if let Err(e) = self.cache.store_page(channel_id, &page).await {
            warn!(channel_id, error = %e, "message page store failed");
        }
        Ok(page)
    }

    async fn load_owned(
        &self,
        user_id: i64,
        message_id: i64,
        op: &str,
    ) -> Result<Message, GatewayError> {
        let Some(message) = self.messages.find_by_id(message_id).await? else {
            metrics::record_message_op(op, "error");
            return Err(GatewayError::Validation(format!(
                "unknown message {}",
                message_id
            )));
        };
        if message.author_id != user_id {
            metrics::record_message_op(op, "denied");
            return Err(GatewayError::Authorization(format!(
                "message {} belongs to another user",
                message_id
            )));
        }
        Ok(message)
    }

    async fn payload_for(&self, message: &Message) -> Result<MessagePayload, GatewayError> {
        let Some(author) = self.users.find_by_id(message.author_id).await? else {
            return Err(GatewayError::Persistence(format!(
                "author {} not found",
                message.author_id
            )));
        };
        Ok(MessagePayload::from_message(message, author.profile()))
    }

    // Delete-on-write: failures leave a stale page behind until its TTL,
    // which is acceptable; blocking the message is not.
    async fn invalidate_page(&self, channel_id: i64) {
        if let Err(e) = self.cache.invalidate(channel_id).await {
            warn!(channel_id, error = %e, "message page invalidation failed");
        }
    }
}

fn validate_content(
    content: Option<&str>,
    attachment_ref: Option<&str>,
) -> Result<(), GatewayError> {
    let content_empty = content.map_or(true, |c| c.trim().is_empty());
    if content_empty && attachment_ref.is_none() {
        return Err(GatewayError::Validation(
            "message needs content or an attachment".into(),
        ));
    }
    if let Some(content) = content {
        if content.chars().count() > MAX_CONTENT_CODE_POINTS {
            return Err(GatewayError::Validation(format!(
                "content exceeds {} characters",
                MAX_CONTENT_CODE_POINTS
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ChannelKind, MockChannelRepository, MockMemberRepository, MockMessageRepository,
        MockUserRepository, User,
    };
    use crate::infrastructure::cache::MockChannelMessageCache;
    use crate::presentation::websocket::RecordingBackend;
    use crate::shared::error::AppError;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    struct Fixture {
        messages: MockMessageRepository,
        channels: MockChannelRepository,
        members: MockMemberRepository,
        users: MockUserRepository,
        cache: MockChannelMessageCache,
        backend: Arc<RecordingBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                messages: MockMessageRepository::new(),
                channels: MockChannelRepository::new(),
                members: MockMemberRepository::new(),
                users: MockUserRepository::new(),
                cache: MockChannelMessageCache::new(),
                backend: Arc::new(RecordingBackend::new()),
            }
        }

        fn service(self) -> (MessageBroadcastService, Arc<RecordingBackend>) {
            let backend = self.backend.clone();
            let service = MessageBroadcastService::new(
                Arc::new(self.messages),
                Arc::new(self.channels),
                Arc::new(self.members),
                Arc::new(self.users),
                Arc::new(self.cache),
                backend.clone(),
                Arc::new(SnowflakeGenerator::new(1)),
                50,
            );
            (service, backend)
        }
    }

    fn guild_channel(id: i64, guild_id: i64) -> Channel {
        Channel {
            id,
            guild_id: Some(guild_id),
            kind: ChannelKind::Text,
            name: Some("general".into()),
        }
    }

    fn author(id: i64) -> User {
        User {
            id,
            username: format!("user{}", id),
            display_name: None,
            avatar_url: None,
            created_at: Utc::now(),
        }
    }

    fn send_request(channel_id: i64, content: &str) -> SendMessagePayload {
        SendMessagePayload {
            channel_id: channel_id.to_string(),
            content: Some(content.to_string()),
            attachment_ref: None,
            reply_to: None,
            client_temp_id: "tmp-1".into(),
        }
    }

    fn stored_message(id: i64, channel_id: i64, author_id: i64) -> Message {
        Message {
            id,
            channel_id,
            author_id,
            content: Some("hello".into()),
            attachment_ref: None,
            reply_to_id: None,
            edited_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn send_persists_invalidates_and_broadcasts() {
        let mut fx = Fixture::new();
        fx.channels
            .expect_find_by_id()
            .with(eq(42))
            .returning(|_| Ok(Some(guild_channel(42, 10))));
        fx.members
            .expect_is_member()
            .with(eq(10), eq(1))
            .returning(|_, _| Ok(true));
        fx.messages
            .expect_create()
            .returning(|m| Ok(m.clone()));
        fx.users
            .expect_find_by_id()
            .with(eq(1))
            .returning(|id| Ok(Some(author(id))));
        fx.cache
            .expect_invalidate()
            .with(eq(42))
            .times(1)
            .returning(|_| Ok(()));

        let origin = Uuid::new_v4();
        let (service, backend) = fx.service();
        let payload = service
            .send(1, Some(origin), &send_request(42, "hello"))
            .await
            .unwrap();

        assert_eq!(payload.channel_id, "42");
        assert_eq!(payload.content.as_deref(), Some("hello"));

        let published = backend.take();
        assert_eq!(published.len(), 1);
        let (room, event, exclude) = &published[0];
        assert_eq!(*room, RoomKey::Channel(42));
        assert_eq!(*exclude, Some(origin));
        assert!(matches!(event, ServerEvent::NewMessage { .. }));
    }

    #[tokio::test]
    async fn send_by_non_member_is_denied_before_persistence() {
        let mut fx = Fixture::new();
        fx.channels
            .expect_find_by_id()
            .returning(|_| Ok(Some(guild_channel(42, 10))));
        fx.members
            .expect_is_member()
            .returning(|_, _| Ok(false));
        fx.messages.expect_create().never();

        let (service, backend) = fx.service();
        let err = service.send(1, None, &send_request(42, "hi")).await.unwrap_err();

        assert!(matches!(err, GatewayError::Authorization(_)));
        assert!(backend.take().is_empty());
    }

    #[tokio::test]
    async fn send_to_unknown_channel_is_a_validation_error() {
        let mut fx = Fixture::new();
        fx.channels.expect_find_by_id().returning(|_| Ok(None));

        let (service, _) = fx.service();
        let err = service.send(1, None, &send_request(42, "hi")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_message_without_attachment_is_rejected() {
        let fx = Fixture::new();
        let (service, _) = fx.service();

        let mut request = send_request(42, "   ");
        let err = service.send(1, None, &request).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        request.content = None;
        let err = service.send(1, None, &request).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn attachment_only_message_is_valid() {
        let mut fx = Fixture::new();
        fx.channels
            .expect_find_by_id()
            .returning(|_| Ok(Some(guild_channel(42, 10))));
        fx.members.expect_is_member().returning(|_, _| Ok(true));
        fx.messages.expect_create().returning(|m| Ok(m.clone()));
        fx.users
            .expect_find_by_id()
            .returning(|id| Ok(Some(author(id))));
        fx.cache.expect_invalidate().returning(|_| Ok(()));

        let request = SendMessagePayload {
            channel_id: "42".into(),
            content: None,
            attachment_ref: Some("upload/abc".into()),
            reply_to: None,
            client_temp_id: "tmp-2".into(),
        };
        let (service, _) = fx.service();
        let payload = service.send(1, None, &request).await.unwrap();
        assert_eq!(payload.attachment_ref.as_deref(), Some("upload/abc"));
    }

    #[tokio::test]
    async fn overlong_content_is_rejected() {
        let fx = Fixture::new();
        let (service, _) = fx.service();

        let long = "a".repeat(MAX_CONTENT_CODE_POINTS + 1);
        let err = service
            .send(1, None, &send_request(42, &long))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        // code points, not bytes: 2000 two-byte chars are fine
        let wide = "é".repeat(MAX_CONTENT_CODE_POINTS);
        assert!(validate_content(Some(&wide), None).is_ok());
    }

    #[tokio::test]
    async fn persistence_failure_skips_invalidation_and_broadcast() {
        let mut fx = Fixture::new();
        fx.channels
            .expect_find_by_id()
            .returning(|_| Ok(Some(guild_channel(42, 10))));
        fx.members.expect_is_member().returning(|_, _| Ok(true));
        fx.messages
            .expect_create()
            .returning(|_| Err(AppError::Internal("insert failed".into())));
        fx.cache.expect_invalidate().never();

        let (service, backend) = fx.service();
        let err = service.send(1, None, &send_request(42, "hi")).await.unwrap_err();

        assert!(matches!(err, GatewayError::Persistence(_)));
        assert!(backend.take().is_empty());
    }

    #[tokio::test]
    async fn cache_failure_does_not_block_the_send() {
        let mut fx = Fixture::new();
        fx.channels
            .expect_find_by_id()
            .returning(|_| Ok(Some(guild_channel(42, 10))));
        fx.members.expect_is_member().returning(|_, _| Ok(true));
        fx.messages.expect_create().returning(|m| Ok(m.clone()));
        fx.users
            .expect_find_by_id()
            .returning(|id| Ok(Some(author(id))));
        fx.cache
            .expect_invalidate()
            .returning(|_| Err(AppError::Internal("redis down".into())));

        let (service, backend) = fx.service();
        service.send(1, None, &send_request(42, "hi")).await.unwrap();
        assert_eq!(backend.take().len(), 1);
    }

    #[tokio::test]
    async fn edit_by_non_author_is_denied() {
        let mut fx = Fixture::new();
        fx.messages
            .expect_find_by_id()
            .with(eq(900))
            .returning(|id| Ok(Some(stored_message(id, 42, 1))));
        fx.messages.expect_update().never();

        let (service, backend) = fx.service();
        let err = service.edit(2, 900, "tampered").await.unwrap_err();

        assert!(matches!(err, GatewayError::Authorization(_)));
        assert!(backend.take().is_empty());
    }

    #[tokio::test]
    async fn edit_broadcasts_updated_message_to_everyone() {
        let mut fx = Fixture::new();
        fx.messages
            .expect_find_by_id()
            .returning(|id| Ok(Some(stored_message(id, 42, 1))));
        fx.messages
            .expect_update()
            .withf(|m| m.content.as_deref() == Some("fixed") && m.edited_at.is_some())
            .returning(|m| Ok(m.clone()));
        fx.users
            .expect_find_by_id()
            .returning(|id| Ok(Some(author(id))));
        fx.cache.expect_invalidate().times(1).returning(|_| Ok(()));

        let (service, backend) = fx.service();
        service.edit(1, 900, "fixed").await.unwrap();

        let published = backend.take();
        assert_eq!(published.len(), 1);
        let (room, event, exclude) = &published[0];
        assert_eq!(*room, RoomKey::Channel(42));
        assert_eq!(*exclude, None);
        match event {
            ServerEvent::MessageEdited { message } => {
                assert_eq!(message.content.as_deref(), Some("fixed"));
                assert!(message.edited);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn delete_of_unknown_message_is_a_validation_error() {
        let mut fx = Fixture::new();
        fx.messages.expect_find_by_id().returning(|_| Ok(None));

        let (service, _) = fx.service();
        let err = service.delete(1, 900).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_broadcasts_tombstone() {
        let mut fx = Fixture::new();
        fx.messages
            .expect_find_by_id()
            .returning(|id| Ok(Some(stored_message(id, 42, 1))));
        fx.messages
            .expect_delete()
            .with(eq(900))
            .returning(|_| Ok(()));
        fx.cache.expect_invalidate().times(1).returning(|_| Ok(()));

        let (service, backend) = fx.service();
        service.delete(1, 900).await.unwrap();

        let published = backend.take();
        assert_eq!(published.len(), 1);
        match &published[0].1 {
            ServerEvent::MessageDeleted {
                message_id,
                channel_id,
            } => {
                assert_eq!(message_id, "900");
                assert_eq!(channel_id, "42");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn recent_messages_hits_the_cache_first() {
        let mut fx = Fixture::new();
        let page = vec![stored_message(900, 42, 1)];
        let cached = page.clone();
        fx.cache
            .expect_recent_page()
            .with(eq(42))
            .returning(move |_| Ok(Some(cached.clone())));
        fx.messages.expect_find_recent().never();

        let (service, _) = fx.service();
        let result = service.recent_messages(42).await.unwrap();
        assert_eq!(result, page);
    }

    #[tokio::test]
    async fn recent_messages_falls_back_to_store_and_repopulates() {
        let mut fx = Fixture::new();
        let page = vec![stored_message(900, 42, 1)];
        let stored = page.clone();
        fx.cache.expect_recent_page().returning(|_| Ok(None));
        fx.messages
            .expect_find_recent()
            .with(eq(42), eq(50))
            .returning(move |_, _| Ok(stored.clone()));
        fx.cache
            .expect_store_page()
            .times(1)
            .returning(|_, _| Ok(()));

        let (service, _) = fx.service();
        let result = service.recent_messages(42).await.unwrap();
        assert_eq!(result, page);
    }

    #[tokio::test]
    async fn dm_channel_authorizes_participants_only() {
        let mut fx = Fixture::new();
        fx.channels.expect_find_by_id().returning(|id| {
            Ok(Some(Channel {
                id,
                guild_id: None,
                kind: ChannelKind::DirectMessage,
                name: None,
            }))
        });
        fx.channels
            .expect_is_dm_participant()
            .with(eq(55), eq(3))
            .returning(|_, _| Ok(false));

        let (service, _) = fx.service();
        let err = service.authorize_channel(3, 55).await.unwrap_err();
        assert!(matches!(err, GatewayError::Authorization(_)));
    }
}
