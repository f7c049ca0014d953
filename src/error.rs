//! Error taxonomy for the decision-and-safety engine
//!
//! Every fallible operation in the crate returns [`SentinelError`]. The enum is
//! serializable so a shell (desktop app, CLI) can forward it without mapping.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the engine
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type", content = "details")]
pub enum SentinelError {
    /// Bad or unreadable input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing file or unknown operation id
    #[error("Not found: {0}")]
    NotFound(String),

    /// State mismatch (undo of an undone operation, drifted fingerprint,
    /// single-member duplicate group)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Analyzer timeout or failure. Recovered locally by the classifier.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// The durable store is unreachable. Fatal.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Filesystem failure while moving a file
    #[error("IO error: {0}")]
    Io(String),

    /// Invalid configuration file or environment override
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SentinelError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalService(_) | Self::Io(_))
    }
}

impl From<std::io::Error> for SentinelError {
    fn from(err: std::io::Error) -> Self {
        SentinelError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for SentinelError {
    fn from(err: rusqlite::Error) -> Self {
        SentinelError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SentinelError {
    fn from(err: serde_json::Error) -> Self {
        SentinelError::Config(err.to_string())
    }
}

impl From<SentinelError> for String {
    fn from(err: SentinelError) -> Self {
        err.to_string()
    }
}

pub type Result<T> = std::result::Result<T, SentinelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_tag() {
        let err = SentinelError::Conflict("operation 3 already undone".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(
            json,
            r#"{"type":"conflict","details":"operation 3 already undone"}"#
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SentinelError = io.into();
        assert!(matches!(err, SentinelError::Io(_)));
        assert!(err.is_retryable());
        assert!(!SentinelError::Validation("x".into()).is_retryable());
    }
}
