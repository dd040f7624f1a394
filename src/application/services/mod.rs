//! Application Services
//!
//! The gateway's use cases: session resolution, room membership, and the
//! message pipeline. Services take their repositories, caches, and the
//! broadcast backend as injected trait objects.

mod message_service;
mod room_service;
mod session_service;

pub use message_service::MessageBroadcastService;
pub use room_service::RoomMembershipResolver;
pub use session_service::{token_hash, AuthenticatedUser, CachedSession, SessionResolver};
