//! Session Resolution
//!
//! Maps a presented bearer token to an authenticated user. Tokens are
//! never stored raw: the session key is the SHA-256 hex digest of the
//! token, so a dump of the session store does not leak usable tokens.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::domain::{UserProfile, UserRepository};
use crate::infrastructure::cache::keys;
use crate::shared::error::AppError;

/// Session payload stored under `session:<token_hash>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSession {
    pub user_id: i64,
    pub expires_at: i64,
}

/// The identity a connection is bound to after authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub profile: UserProfile,
}

/// Resolves session tokens to users.
#[derive(Clone)]
pub struct SessionResolver {
    redis: ConnectionManager,
    users: Arc<dyn UserRepository>,
}

impl SessionResolver {
    pub fn new(redis: ConnectionManager, users: Arc<dyn UserRepository>) -> Self {
        Self { redis, users }
    }

    /// Resolve a token to its user. Returns `None` for unknown, expired,
    /// or orphaned sessions; `Err` only for infrastructure failures.
    pub async fn resolve(&self, token: &str) -> Result<Option<AuthenticatedUser>, AppError> {
        let key = keys::session(&token_hash(token));

        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(&key).await?;

        let Some(json) = value else {
            return Ok(None);
        };
        let session: CachedSession = serde_json::from_str(&json)
            .map_err(|e| AppError::Internal(format!("Deserialization error: {}", e)))?;

        if session.expires_at <= chrono::Utc::now().timestamp() {
            debug!(user_id = session.user_id, "session expired");
            return Ok(None);
        }

        // session rows can outlive their user row
        let Some(user) = self.users.find_by_id(session.user_id).await? else {
            debug!(user_id = session.user_id, "session references missing user");
            return Ok(None);
        };

        Ok(Some(AuthenticatedUser {
            id: user.id,
            profile: user.profile(),
        }))
    }
}

/// SHA-256 hex digest of a session token.
pub fn token_hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn token_hash_is_deterministic_hex() {
        let a = token_hash("secret-token");
        let b = token_hash("secret-token");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token_hash("other-token"), a);
    }

    #[test]
    fn cached_session_round_trips() {
        let session = CachedSession {
            user_id: 9,
            expires_at: 1_900_000_000,
        };
        let json = serde_json::to_string(&session).unwrap();
        let back: CachedSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id, 9);
        assert_eq!(back.expires_at, 1_900_000_000);
    }
}
