//! WebSocket Gateway
//!
//! Connection registry, wire protocol, room routing, typing indicators,
//! and the pluggable broadcast backends.

mod broadcast;
mod handler;
mod messages;
mod registry;
mod rooms;
mod typing;

pub use broadcast::{run_relay_subscriber, BroadcastBackend, LocalBroadcast, RedisBroadcast};
pub use handler::ws_handler;
pub use messages::{
    parse_wire_id, ChannelRefPayload, ClientEvent, DeleteMessagePayload, EditMessagePayload,
    MessagePayload, SendMessagePayload, ServerEvent, UpdatePresencePayload,
};
pub use registry::{Connection, ConnectionRegistry, UnregisterOutcome};
pub use rooms::RoomKey;
pub use typing::TypingTracker;

#[cfg(test)]
pub(crate) use broadcast::RecordingBackend;
