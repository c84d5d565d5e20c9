//! Error Types
//!
//! A single error enum shared by the store, the token manager, the engine
//! and the HTTP layer. Each failure kind is its own variant so callers can
//! tell tampering from staleness, and backpressure from a missing record.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the durable engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Store miss or expired entry.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    /// The token could not be decoded.
    #[error("malformed token: {0}")]
    TokenMalformed(String),

    /// The token signature does not match its payload.
    #[error("token signature is not valid")]
    TokenInvalidSignature,

    /// The token was correctly signed but its validity window has passed.
    #[error("token expired at {expired_at}")]
    TokenExpired { expired_at: i64 },

    /// The execution queue stayed full for the whole enqueue timeout.
    #[error("execution queue is full")]
    QueueFull,

    /// The worker dropped its end of the queue.
    #[error("execution queue is closed")]
    QueueClosed,

    /// The engine is shutting down and accepts no new work.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// `run` was called while another worker owns the queue.
    #[error("a worker is already draining the execution queue")]
    WorkerAlreadyRunning,

    /// Outbound HTTP call failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Outbound HTTP call did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Returns true for store misses.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true for any token verification failure.
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Error::TokenMalformed(_) | Error::TokenInvalidSignature | Error::TokenExpired { .. }
        )
    }

    /// Returns true when the engine refused work because of backpressure or shutdown.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::QueueFull | Error::QueueClosed | Error::ShuttingDown
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found("workflow", "wf_123");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "workflow 'wf_123' not found");
    }

    #[test]
    fn test_token_error_classification() {
        assert!(Error::TokenInvalidSignature.is_token_error());
        assert!(Error::TokenExpired { expired_at: 0 }.is_token_error());
        assert!(Error::TokenMalformed("bad".into()).is_token_error());
        assert!(!Error::QueueFull.is_token_error());
    }

    #[test]
    fn test_unavailable_classification() {
        assert!(Error::QueueFull.is_unavailable());
        assert!(Error::ShuttingDown.is_unavailable());
        assert!(Error::QueueClosed.is_unavailable());
        assert!(!Error::not_found("step", "st_1").is_unavailable());
    }
}
