//! Error types for harvest

use thiserror::Error;

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Failure modes of a single `fetch_page` call against a source.
///
/// `Unreachable` and `RateLimited` are transient and retried by the download
/// manager with back-off; `Malformed` and `AuthRequired` are permanent and
/// surfaced immediately.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("source throttled the request (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("authentication required: {0}")]
    AuthRequired(String),
}

impl FetchError {
    /// Transient failures are retried with exponential back-off; permanent
    /// ones fail the source immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Unreachable(_) | FetchError::RateLimited { .. })
    }
}

/// Main error type for harvest
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("source already registered for URL: {0}")]
    DuplicateSource(String),

    #[error("operation already in progress for {0}")]
    AlreadyInProgress(String),

    #[error("source not found: {0}")]
    SourceNotFound(i64),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("integrity mismatch for source {source_id}: score {score:.3} below threshold")]
    IntegrityMismatch { source_id: i64, score: f64 },

    #[error("invalid source configuration: {0}")]
    InvalidSource(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Unreachable("dns".into()).is_transient());
        assert!(FetchError::RateLimited { retry_after_secs: Some(5) }.is_transient());
        assert!(!FetchError::Malformed("bad json".into()).is_transient());
        assert!(!FetchError::AuthRequired("missing token".into()).is_transient());
    }

    #[test]
    fn test_fetch_error_converts_into_harvest_error() {
        let err: HarvestError = FetchError::Malformed("truncated".into()).into();
        assert!(matches!(err, HarvestError::Fetch(FetchError::Malformed(_))));
    }
}
