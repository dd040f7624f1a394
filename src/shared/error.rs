//! Application Error Types
//!
//! Two layers: `AppError` for infrastructure failures (database, cache,
//! serialization) and `GatewayError` for the per-operation taxonomy reported
//! over the gateway connection.

/// Infrastructure-level error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Gateway operation error taxonomy.
///
/// `RateLimited` and `Authentication` terminate the connection; all other
/// kinds are reported to the requesting connection only, via a scoped
/// `error` event, and are never broadcast.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("too many connections from this address")]
    RateLimited,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not permitted: {0}")]
    Authorization(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Persistence(String),

    #[error("cache failure: {0}")]
    Cache(String),
}

impl GatewayError {
    /// Whether this error terminates the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited | GatewayError::Authentication(_)
        )
    }
}

impl From<AppError> for GatewayError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Redis(e) => GatewayError::Cache(e.to_string()),
            AppError::Validation(msg) => GatewayError::Validation(msg),
            AppError::NotFound(msg) => GatewayError::Persistence(msg),
            AppError::Database(e) => GatewayError::Persistence(e.to_string()),
            AppError::Internal(msg) => GatewayError::Persistence(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(GatewayError::RateLimited => true; "rate limited")]
    #[test_case(GatewayError::Authentication("bad token".into()) => true; "authentication")]
    #[test_case(GatewayError::Authorization("not a member".into()) => false; "authorization")]
    #[test_case(GatewayError::Validation("too long".into()) => false; "validation")]
    #[test_case(GatewayError::Persistence("insert failed".into()) => false; "persistence")]
    #[test_case(GatewayError::Cache("timeout".into()) => false; "cache")]
    fn fatal_kinds_terminate_the_connection(err: GatewayError) -> bool {
        err.is_fatal()
    }

    #[test]
    fn app_error_maps_onto_the_taxonomy() {
        let err: GatewayError = AppError::Internal("boom".into()).into();
        assert!(matches!(err, GatewayError::Persistence(_)));

        let err: GatewayError = AppError::Validation("bad".into()).into();
        assert!(matches!(err, GatewayError::Validation(_)));
    }
}
