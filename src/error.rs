//! Error types for the query cache
//!
//! Provides unified error handling using thiserror. `CacheError` covers the
//! cache tiers, `ApiError` is what callers of the request executor see.

use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Errors raised by the cache tiers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Reading or writing the backing files failed
    #[error("I/O error: {0}")]
    Io(String),

    /// A value could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Encryption, decryption or key handling failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// An invalidation pattern is not a valid regular expression
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<regex::Error> for CacheError {
    fn from(err: regex::Error) -> Self {
        CacheError::InvalidPattern(err.to_string())
    }
}

// == Api Error Enum ==
/// Errors surfaced by the request executor.
///
/// The type is `Clone` so that one failure can be handed to every caller
/// waiting on a deduplicated request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The session is not valid; never retried
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The remote API throttled the call
    #[error("Rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Connection failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// 5xx response
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// 4xx response other than auth and throttling
    #[error("Client error ({status}): {message}")]
    Client { status: u16, message: String },

    /// Application-level errors carried in a 200 response
    #[error("GraphQL error: {0}")]
    GraphQL(String),

    /// The response or the request was malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing credentials or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A cache tier failed
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ApiError {
    // == Retry Classification ==
    /// Returns true for the error kinds that are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimit { .. } | ApiError::Network(_) | ApiError::Server { .. }
        )
    }

    /// Returns true if the error means the session must be re-established.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }

    /// Server-provided hint for how long to wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the request executor.
pub type Result<T> = std::result::Result<T, ApiError>;

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ApiError::Network("timeout".to_string()).is_retryable());
        assert!(ApiError::Server {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_retryable());
        assert!(ApiError::RateLimit {
            message: "slow down".to_string(),
            retry_after: None
        }
        .is_retryable());
    }

    #[test]
    fn test_non_retryable_kinds() {
        assert!(!ApiError::Auth("expired".to_string()).is_retryable());
        assert!(!ApiError::Client {
            status: 404,
            message: "missing".to_string()
        }
        .is_retryable());
        assert!(!ApiError::GraphQL("bad field".to_string()).is_retryable());
        assert!(!ApiError::Validation("no data".to_string()).is_retryable());
        assert!(!ApiError::Config("no token".to_string()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let err = ApiError::RateLimit {
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(ApiError::Network("reset".to_string()).retry_after(), None);
    }

    #[test]
    fn test_cache_error_converts() {
        let err: ApiError = CacheError::Io("disk full".to_string()).into();
        assert!(matches!(err, ApiError::Cache(CacheError::Io(_))));
        assert_eq!(err.to_string(), "I/O error: disk full");
    }
}
