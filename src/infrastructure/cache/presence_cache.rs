//! Presence Store
//!
//! Redis-backed presence records with a TTL refreshed by client
//! heartbeats. A record that is never refreshed ages out, so a crashed
//! client converges to offline without any explicit close. Every write
//! also publishes the record on a pub/sub channel for other services.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::keys;
use crate::shared::error::AppError;

/// Presence status values a user can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Invisible,
    Offline,
}

/// A presence record as stored in Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: i64,
    pub status: PresenceStatus,
    pub last_seen: i64,
}

/// Presence writes the gateway performs per connection lifecycle.
/// A trait seam so connection handling can be exercised with doubles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceTracker: Send + Sync {
    async fn set_online(&self, user_id: i64) -> Result<(), AppError>;
    async fn set_status(&self, user_id: i64, status: PresenceStatus) -> Result<(), AppError>;
    async fn set_offline(&self, user_id: i64) -> Result<(), AppError>;
    async fn refresh(&self, user_id: i64) -> Result<bool, AppError>;
}

/// Presence store service.
#[derive(Clone)]
pub struct PresenceStore {
    redis: ConnectionManager,
    ttl: u64,
}

impl PresenceStore {
    pub fn new(redis: ConnectionManager, ttl: u64) -> Self {
        Self { redis, ttl }
    }

    /// Mark a user online. Called when a connection authenticates.
    pub async fn set_online(&self, user_id: i64) -> Result<(), AppError> {
        self.write(PresenceRecord {
            user_id,
            status: PresenceStatus::Online,
            last_seen: chrono::Utc::now().timestamp(),
        })
        .await
    }

    /// Set an explicit status for a user.
    pub async fn set_status(&self, user_id: i64, status: PresenceStatus) -> Result<(), AppError> {
        self.write(PresenceRecord {
            user_id,
            status,
            last_seen: chrono::Utc::now().timestamp(),
        })
        .await
    }

    /// Mark a user offline. Called when their last connection closes.
    /// Writes an offline record rather than deleting, so the disconnect
    /// timestamp stays queryable as last-seen until the TTL ages it out.
    pub async fn set_offline(&self, user_id: i64) -> Result<(), AppError> {
        self.write(PresenceRecord {
            user_id,
            status: PresenceStatus::Offline,
            last_seen: chrono::Utc::now().timestamp(),
        })
        .await
    }

    /// Refresh the presence TTL on heartbeat. Returns false when no
    /// record exists (the client should re-announce its status).
    pub async fn refresh(&self, user_id: i64) -> Result<bool, AppError> {
        let key = keys::presence(user_id);

        let mut conn = self.redis.clone();
        let refreshed: bool = conn.expire(&key, self.ttl as i64).await?;

        Ok(refreshed)
    }

    /// Batch presence lookup. Users without a record come back offline.
    pub async fn get_many(
        &self,
        user_ids: &[i64],
    ) -> Result<Vec<(i64, PresenceStatus)>, AppError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let lookup_keys: Vec<String> = user_ids.iter().map(keys::presence).collect();

        let mut conn = self.redis.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&lookup_keys)
            .query_async(&mut conn)
            .await?;

        let mut results = Vec::with_capacity(user_ids.len());
        for (user_id, value) in user_ids.iter().zip(values.into_iter()) {
            let status = match value {
                Some(json) => serde_json::from_str::<PresenceRecord>(&json)
                    .map(|r| r.status)
                    .unwrap_or(PresenceStatus::Offline),
                None => PresenceStatus::Offline,
            };
            results.push((*user_id, status));
        }

        Ok(results)
    }

    /// All currently live presence records. Full keyspace scan; fine at
    /// the scale this service targets.
    pub async fn list_online(&self) -> Result<Vec<PresenceRecord>, AppError> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", keys::PRESENCE);

        let mut matched = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            matched.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        if matched.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&matched)
            .query_async(&mut conn)
            .await?;

        Ok(live_records(values))
    }

    async fn write(&self, record: PresenceRecord) -> Result<(), AppError> {
        let key = keys::presence(record.user_id);
        let value = serde_json::to_string(&record)
            .map_err(|e| AppError::Internal(format!("Serialization error: {}", e)))?;

        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(&key, value, self.ttl).await?;

        self.notify(&record).await;

        Ok(())
    }

    // Notification failures never fail the presence write itself.
    async fn notify(&self, record: &PresenceRecord) {
        let payload = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize presence notification");
                return;
            }
        };

        let mut conn = self.redis.clone();
        if let Err(e) = conn
            .publish::<_, _, ()>(keys::PRESENCE_EVENTS, payload)
            .await
        {
            warn!(error = %e, user_id = record.user_id, "presence notification publish failed");
        }
    }
}

#[async_trait]
impl PresenceTracker for PresenceStore {
    async fn set_online(&self, user_id: i64) -> Result<(), AppError> {
        PresenceStore::set_online(self, user_id).await
    }

    async fn set_status(&self, user_id: i64, status: PresenceStatus) -> Result<(), AppError> {
        PresenceStore::set_status(self, user_id, status).await
    }

    async fn set_offline(&self, user_id: i64) -> Result<(), AppError> {
        PresenceStore::set_offline(self, user_id).await
    }

    async fn refresh(&self, user_id: i64) -> Result<bool, AppError> {
        PresenceStore::refresh(self, user_id).await
    }
}

/// Parse MGET results into live records. Keys can expire between SCAN
/// and MGET, so holes and garbage are skipped; offline records are kept
/// only for last-seen queries and don't count as live.
fn live_records(values: Vec<Option<String>>) -> Vec<PresenceRecord> {
    values
        .into_iter()
        .flatten()
        .filter_map(|json| serde_json::from_str::<PresenceRecord>(&json).ok())
        .filter(|record| record.status != PresenceStatus::Offline)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PresenceStatus::Invisible).unwrap(),
            "\"invisible\""
        );
        assert_eq!(
            serde_json::from_str::<PresenceStatus>("\"busy\"").unwrap(),
            PresenceStatus::Busy
        );
    }

    #[test]
    fn record_round_trips() {
        let record = PresenceRecord {
            user_id: 42,
            status: PresenceStatus::Away,
            last_seen: 1_700_000_000,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: PresenceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id, 42);
        assert_eq!(back.status, PresenceStatus::Away);
    }

    #[test]
    fn offline_records_are_not_listed_as_live() {
        let online = serde_json::to_string(&PresenceRecord {
            user_id: 1,
            status: PresenceStatus::Online,
            last_seen: 1_700_000_000,
        })
        .unwrap();
        let offline = serde_json::to_string(&PresenceRecord {
            user_id: 2,
            status: PresenceStatus::Offline,
            last_seen: 1_700_000_100,
        })
        .unwrap();

        let records = live_records(vec![
            Some(online),
            Some(offline),
            None,
            Some("not json".into()),
        ]);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, 1);
    }
}
