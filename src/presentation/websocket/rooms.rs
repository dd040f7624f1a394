//! Room Keys
//!
//! Rooms are the broadcast routing unit. A connection joins a set of
//! rooms at registration and events are fanned out to every connection
//! in a room.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a broadcast room.
///
/// - `Channel` carries message traffic and typing indicators.
/// - `User` is the per-user room for direct delivery to every
///   connection of one user.
/// - `Guild` carries guild-scoped events such as presence changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RoomKey {
    Channel(i64),
    User(i64),
    Guild(i64),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Channel(id) => write!(f, "channel:{}", id),
            RoomKey::User(id) => write!(f, "user:{}", id),
            RoomKey::Guild(id) => write!(f, "guild:{}", id),
        }
    }
}
