//! Typing Indicators
//!
//! At most one live typing indicator per (channel, user). Starting again
//! while one is live replaces its expiry timer, so a client that keeps
//! typing keeps the indicator alive without flapping. Expiry and explicit
//! stop both publish `user_stop_typing` exactly once.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::broadcast::BroadcastBackend;
use super::messages::ServerEvent;
use super::rooms::RoomKey;
use crate::domain::UserProfile;

type TypingKey = (i64, i64); // (channel_id, user_id)

/// Tracks active typing indicators and their expiry timers.
pub struct TypingTracker {
    entries: Arc<DashMap<TypingKey, JoinHandle<()>>>,
    ttl: Duration,
    backend: Arc<dyn BroadcastBackend>,
}

impl TypingTracker {
    pub fn new(ttl: Duration, backend: Arc<dyn BroadcastBackend>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            backend,
        }
    }

    /// Start (or restart) a typing indicator.
    ///
    /// The sender's own connection is excluded from the `user_typing`
    /// broadcast. The expiry deadline is armed at call time, before the
    /// timer task is ever polled.
    pub async fn start(
        &self,
        channel_id: i64,
        user_id: i64,
        profile: UserProfile,
        exclude: Option<Uuid>,
    ) {
        let key = (channel_id, user_id);
        let deadline = Instant::now() + self.ttl;

        let entries = Arc::clone(&self.entries);
        let backend = Arc::clone(&self.backend);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // losing the race against an explicit stop means no duplicate
            if entries.remove(&key).is_some() {
                backend
                    .publish(
                        RoomKey::Channel(channel_id),
                        ServerEvent::UserStopTyping {
                            channel_id: channel_id.to_string(),
                            user_id: user_id.to_string(),
                        },
                        None,
                    )
                    .await;
            }
        });

        // Replacing the entry and aborting the displaced timer in one step
        // keeps exactly one live timer per key even when two starts race
        // across an await point.
        match self.entries.insert(key, timer) {
            Some(old_timer) => old_timer.abort(),
            None => {
                self.backend
                    .publish(
                        RoomKey::Channel(channel_id),
                        ServerEvent::UserTyping {
                            channel_id: channel_id.to_string(),
                            user: profile,
                        },
                        exclude,
                    )
                    .await;
            }
        }
    }

    /// Explicitly stop a typing indicator. No-op when none is live.
    pub async fn stop(&self, channel_id: i64, user_id: i64) {
        let key = (channel_id, user_id);
        if let Some((_, timer)) = self.entries.remove(&key) {
            timer.abort();
            self.backend
                .publish(
                    RoomKey::Channel(channel_id),
                    ServerEvent::UserStopTyping {
                        channel_id: channel_id.to_string(),
                        user_id: user_id.to_string(),
                    },
                    None,
                )
                .await;
        }
    }

    /// Stop every indicator a user holds. Called when their connection
    /// closes mid-typing.
    pub async fn cleanup_user(&self, user_id: i64) {
        let keys: Vec<TypingKey> = self
            .entries
            .iter()
            .map(|entry| *entry.key())
            .filter(|(_, uid)| *uid == user_id)
            .collect();

        for (channel_id, _) in keys {
            self.stop(channel_id, user_id).await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.len()
    }
}
