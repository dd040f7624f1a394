//! # Domain Entities
//!
//! Entities the gateway reads and writes through the persistence layer,
//! together with the repository traits the infrastructure layer implements.
//! Repository traits are the injection seams: production code binds the
//! sqlx implementations, tests bind mockall doubles.

mod channel;
mod member;
mod message;
mod user;

pub use channel::{Channel, ChannelKind, ChannelRepository};
pub use member::{Member, MemberRepository};
pub use message::{Message, MessageRepository, MAX_CONTENT_CODE_POINTS};
pub use user::{User, UserProfile, UserRepository};

#[cfg(test)]
pub use channel::MockChannelRepository;
#[cfg(test)]
pub use member::MockMemberRepository;
#[cfg(test)]
pub use message::MockMessageRepository;
#[cfg(test)]
pub use user::MockUserRepository;
