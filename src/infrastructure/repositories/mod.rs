//! Repository Implementations
//!
//! sqlx-backed implementations of the domain repository traits.

mod channel_repository;
mod member_repository;
mod message_repository;
mod user_repository;

pub use channel_repository::PgChannelRepository;
pub use member_repository::PgMemberRepository;
pub use message_repository::PgMessageRepository;
pub use user_repository::PgUserRepository;
