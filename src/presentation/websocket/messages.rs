//! WebSocket Wire Protocol
//!
//! JSON text frames, adjacently tagged as `{"t": "<event>", "d": {...}}`.
//! IDs travel as strings so JavaScript clients never lose snowflake
//! precision.

use serde::{Deserialize, Serialize};

use crate::domain::{Message, UserProfile};
use crate::infrastructure::cache::PresenceStatus;
use crate::shared::error::GatewayError;

/// Events a client sends to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    EditMessage(EditMessagePayload),
    DeleteMessage(DeleteMessagePayload),
    JoinChannel(ChannelRefPayload),
    LeaveChannel(ChannelRefPayload),
    StartTyping(ChannelRefPayload),
    StopTyping(ChannelRefPayload),
    Heartbeat,
    UpdatePresence(UpdatePresencePayload),
}

impl ClientEvent {
    /// Event name used for metrics and logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::EditMessage(_) => "edit_message",
            ClientEvent::DeleteMessage(_) => "delete_message",
            ClientEvent::JoinChannel(_) => "join_channel",
            ClientEvent::LeaveChannel(_) => "leave_channel",
            ClientEvent::StartTyping(_) => "start_typing",
            ClientEvent::StopTyping(_) => "stop_typing",
            ClientEvent::Heartbeat => "heartbeat",
            ClientEvent::UpdatePresence(_) => "update_presence",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessagePayload {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Client-chosen correlation ID echoed back in the ack.
    pub client_temp_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditMessagePayload {
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteMessagePayload {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRefPayload {
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePresencePayload {
    pub status: PresenceStatus,
}

/// Events the gateway sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated { user: UserProfile },
    AuthRequired,
    MessageSent { client_temp_id: String, message: MessagePayload },
    NewMessage { message: MessagePayload },
    MessageEdited { message: MessagePayload },
    MessageDeleted { message_id: String, channel_id: String },
    ChannelJoined { channel_id: String },
    ChannelLeft { channel_id: String },
    UserTyping { channel_id: String, user: UserProfile },
    UserStopTyping { channel_id: String, user_id: String },
    HeartbeatAck,
    PresenceUpdate { user_id: String, status: PresenceStatus },
    Error { message: String },
}

/// Denormalized message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    pub channel_id: String,
    pub author: UserProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
    pub created_at: String,
}

impl MessagePayload {
    /// Build the wire form of a stored message with its author profile.
    pub fn from_message(message: &Message, author: UserProfile) -> Self {
        Self {
            id: message.id.to_string(),
            channel_id: message.channel_id.to_string(),
            author,
            content: message.content.clone(),
            attachment_ref: message.attachment_ref.clone(),
            reply_to: message.reply_to_id.map(|id| id.to_string()),
            edited: message.is_edited(),
            edited_at: message.edited_at.map(|t| t.to_rfc3339()),
            created_at: message.created_at.to_rfc3339(),
        }
    }
}

/// Parse a wire ID string into a snowflake.
pub fn parse_wire_id(field: &str, raw: &str) -> Result<i64, GatewayError> {
    raw.parse::<i64>()
        .map_err(|_| GatewayError::Validation(format!("invalid {}: {:?}", field, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn client_event_deserializes_adjacently_tagged() {
        let json = r#"{"t":"send_message","d":{"channel_id":"42","content":"hi","client_temp_id":"tmp-1"}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage(SendMessagePayload {
                channel_id: "42".into(),
                content: Some("hi".into()),
                attachment_ref: None,
                reply_to: None,
                client_temp_id: "tmp-1".into(),
            })
        );
    }

    #[test]
    fn heartbeat_has_no_payload() {
        let event: ClientEvent = serde_json::from_str(r#"{"t":"heartbeat"}"#).unwrap();
        assert_eq!(event, ClientEvent::Heartbeat);
    }

    #[test]
    fn server_event_serializes_tag_and_data() {
        let event = ServerEvent::ChannelJoined {
            channel_id: "7".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["t"], "channel_joined");
        assert_eq!(json["d"]["channel_id"], "7");
    }

    #[test]
    fn message_payload_carries_string_ids() {
        let message = Message {
            id: 9_007_199_254_740_993, // above 2^53, lossy as a JSON number
            channel_id: 42,
            author_id: 7,
            content: Some("hello".into()),
            attachment_ref: None,
            reply_to_id: Some(5),
            edited_at: None,
            created_at: chrono::Utc::now(),
        };
        let author = UserProfile {
            id: "7".into(),
            username: "mina".into(),
            display_name: None,
            avatar_url: None,
        };
        let payload = MessagePayload::from_message(&message, author);
        assert_eq!(payload.id, "9007199254740993");
        assert_eq!(payload.reply_to.as_deref(), Some("5"));
        assert!(!payload.edited);
    }

    #[test]
    fn parse_wire_id_rejects_garbage() {
        assert!(parse_wire_id("channel_id", "abc").is_err());
        assert_eq!(parse_wire_id("channel_id", "42").unwrap(), 42);
    }
}
