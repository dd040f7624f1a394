//! Room Membership Resolution
//!
//! Computes the set of rooms a connection joins at registration: the
//! user's personal room, one room per guild membership, every channel
//! of those guilds, and every DM channel the user participates in. The
//! set is a snapshot taken at connect time.

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::{ChannelRepository, MemberRepository};
use crate::presentation::websocket::RoomKey;
use crate::shared::error::GatewayError;

/// Resolves the room set for a newly authenticated connection.
#[derive(Clone)]
pub struct RoomMembershipResolver {
    members: Arc<dyn MemberRepository>,
    channels: Arc<dyn ChannelRepository>,
}

impl RoomMembershipResolver {
    pub fn new(members: Arc<dyn MemberRepository>, channels: Arc<dyn ChannelRepository>) -> Self {
        Self { members, channels }
    }

    pub async fn resolve(&self, user_id: i64) -> Result<HashSet<RoomKey>, GatewayError> {
        let mut rooms = HashSet::new();
        rooms.insert(RoomKey::User(user_id));

        let guild_ids = self.members.guild_ids_of(user_id).await?;
        for guild_id in guild_ids {
            rooms.insert(RoomKey::Guild(guild_id));
            for channel_id in self.channels.channel_ids_in_guild(guild_id).await? {
                rooms.insert(RoomKey::Channel(channel_id));
            }
        }

        for channel_id in self.channels.dm_channel_ids(user_id).await? {
            rooms.insert(RoomKey::Channel(channel_id));
        }

        Ok(rooms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MockChannelRepository, MockMemberRepository};
    use crate::shared::error::AppError;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn combines_guild_channel_and_dm_rooms() {
        let mut members = MockMemberRepository::new();
        members
            .expect_guild_ids_of()
            .withf(|uid| *uid == 1)
            .returning(|_| Ok(vec![10, 20]));

        let mut channels = MockChannelRepository::new();
        channels
            .expect_channel_ids_in_guild()
            .returning(|guild_id| match guild_id {
                10 => Ok(vec![100, 101]),
                20 => Ok(vec![200]),
                _ => Ok(vec![]),
            });
        channels
            .expect_dm_channel_ids()
            .returning(|_| Ok(vec![300]));

        let resolver = RoomMembershipResolver::new(Arc::new(members), Arc::new(channels));
        let rooms = resolver.resolve(1).await.unwrap();

        let expected: HashSet<RoomKey> = [
            RoomKey::User(1),
            RoomKey::Guild(10),
            RoomKey::Guild(20),
            RoomKey::Channel(100),
            RoomKey::Channel(101),
            RoomKey::Channel(200),
            RoomKey::Channel(300),
        ]
        .into_iter()
        .collect();
        assert_eq!(rooms, expected);
    }

    #[tokio::test]
    async fn user_without_memberships_gets_personal_room_only() {
        let mut members = MockMemberRepository::new();
        members.expect_guild_ids_of().returning(|_| Ok(vec![]));

        let mut channels = MockChannelRepository::new();
        channels.expect_dm_channel_ids().returning(|_| Ok(vec![]));

        let resolver = RoomMembershipResolver::new(Arc::new(members), Arc::new(channels));
        let rooms = resolver.resolve(7).await.unwrap();

        assert_eq!(rooms, HashSet::from([RoomKey::User(7)]));
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_persistence_error() {
        let mut members = MockMemberRepository::new();
        members
            .expect_guild_ids_of()
            .returning(|_| Err(AppError::Internal("pool exhausted".into())));

        let channels = MockChannelRepository::new();

        let resolver = RoomMembershipResolver::new(Arc::new(members), Arc::new(channels));
        let err = resolver.resolve(1).await.unwrap_err();
        assert!(matches!(err, GatewayError::Persistence(_)));
    }
}
