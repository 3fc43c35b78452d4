//! Error taxonomy for request delivery

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Message shown to callers when a request was parked in the offline queue
pub const QUEUED_FOR_LATER_MESSAGE: &str =
    "You are currently offline. Your request has been saved and will be sent when you reconnect.";

/// Classified failure kind of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    ServerError,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::ServerError
        )
    }

    /// Fixed, display-ready message for this kind
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Network error. Please check your internet connection.",
            ErrorKind::Timeout => "The request timed out. Please try again.",
            ErrorKind::BadRequest => "Invalid request. Please check your input.",
            ErrorKind::Unauthorized => "Session expired. Please log in again.",
            ErrorKind::Forbidden => "You don't have permission to perform this action.",
            ErrorKind::NotFound => "The requested resource was not found.",
            ErrorKind::Conflict => {
                "This resource was changed by someone else. Refresh and try again."
            }
            ErrorKind::RateLimited => "Too many requests. Please wait a moment and try again.",
            ErrorKind::ServerError => "Server error. We're working on it.",
            ErrorKind::Unknown => "An unexpected error occurred. Please try again.",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub kind: ErrorKind,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub user_message: String,
}

impl RetryOutcome {
    pub fn new(kind: ErrorKind, http_status: Option<u16>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            http_status,
            user_message: kind.user_message().to_string(),
        }
    }
}

impl fmt::Display for RetryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.kind, status, self.user_message),
            None => write!(f, "{}: {}", self.kind, self.user_message),
        }
    }
}

/// Durable storage failure
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// Library error type
#[derive(Error, Debug)]
pub enum CourierError {
    /// Terminal delivery failure, classified
    #[error("Request failed: {0}")]
    Request(RetryOutcome),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CourierError {
    /// The classified outcome, when this is a delivery failure
    pub fn outcome(&self) -> Option<&RetryOutcome> {
        match self {
            CourierError::Request(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Result type alias using CourierError
pub type CourierResult<T> = Result<T, CourierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        let retryable = [
            ErrorKind::Network,
            ErrorKind::Timeout,
            ErrorKind::RateLimited,
            ErrorKind::ServerError,
        ];
        for kind in retryable {
            assert!(kind.is_retryable(), "{} should be retryable", kind);
        }

        let terminal = [
            ErrorKind::BadRequest,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::Unknown,
        ];
        for kind in terminal {
            assert!(!kind.is_retryable(), "{} should not be retryable", kind);
        }
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
    }

    #[test]
    fn test_conversions_pick_their_variant() {
        let parse = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        assert!(matches!(
            CourierError::from(parse),
            CourierError::Serialization(_)
        ));

        let storage = StorageError::InvalidKey("../escape".to_string());
        let err = CourierError::from(storage);
        assert!(matches!(err, CourierError::Storage(_)));
        assert!(err.outcome().is_none());
    }

    #[test]
    fn test_request_error_display() {
        let err = CourierError::Request(RetryOutcome::new(ErrorKind::ServerError, Some(503)));
        assert_eq!(
            err.to_string(),
            "Request failed: server_error (HTTP 503): Server error. We're working on it."
        );
        assert_eq!(err.outcome().map(|o| o.kind), Some(ErrorKind::ServerError));
    }
}
