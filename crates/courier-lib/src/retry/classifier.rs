//! Error classifier
//!
//! Maps what came back from the transport to a typed [`RetryOutcome`].
//! Total over its input: every outcome yields a kind, nothing panics.

use crate::error::{ErrorKind, RetryOutcome};

/// What a single attempt produced, before interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOutcome {
    /// No response reached us (DNS, refused connection, abort before response)
    NoResponse,
    /// The caller-side deadline fired
    TimedOut,
    /// A response arrived with this status
    Status(u16),
    /// A response arrived but its metadata is unusable
    Malformed,
}

/// Classify a failed attempt
pub fn classify(outcome: RawOutcome) -> RetryOutcome {
    let (kind, status) = match outcome {
        RawOutcome::NoResponse => (ErrorKind::Network, None),
        RawOutcome::TimedOut => (ErrorKind::Timeout, None),
        RawOutcome::Status(code) => (kind_for_status(code), Some(code)),
        RawOutcome::Malformed => (ErrorKind::Unknown, None),
    };
    RetryOutcome::new(kind, status)
}

fn kind_for_status(code: u16) -> ErrorKind {
    match code {
        400 => ErrorKind::BadRequest,
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures() {
        let network = classify(RawOutcome::NoResponse);
        assert_eq!(network.kind, ErrorKind::Network);
        assert!(network.retryable);
        assert!(network.http_status.is_none());
        assert_eq!(
            network.user_message,
            "Network error. Please check your internet connection."
        );

        let timeout = classify(RawOutcome::TimedOut);
        assert_eq!(timeout.kind, ErrorKind::Timeout);
        assert!(timeout.retryable);
    }

    #[test]
    fn test_client_errors_are_terminal() {
        let cases = [
            (400, ErrorKind::BadRequest),
            (401, ErrorKind::Unauthorized),
            (403, ErrorKind::Forbidden),
            (404, ErrorKind::NotFound),
            (409, ErrorKind::Conflict),
        ];

        for (status, kind) in cases {
            let outcome = classify(RawOutcome::Status(status));
            assert_eq!(outcome.kind, kind);
            assert!(!outcome.retryable);
            assert_eq!(outcome.http_status, Some(status));
        }
    }

    #[test]
    fn test_rate_limit_and_server_errors_retry() {
        let limited = classify(RawOutcome::Status(429));
        assert_eq!(limited.kind, ErrorKind::RateLimited);
        assert!(limited.retryable);

        for status in [500, 502, 503, 504, 599] {
            let outcome = classify(RawOutcome::Status(status));
            assert_eq!(outcome.kind, ErrorKind::ServerError);
            assert!(outcome.retryable);
        }
    }

    #[test]
    fn test_everything_else_is_unknown() {
        for status in [0, 302, 418, 422, 600] {
            let outcome = classify(RawOutcome::Status(status));
            assert_eq!(outcome.kind, ErrorKind::Unknown);
            assert!(!outcome.retryable);
        }

        let malformed = classify(RawOutcome::Malformed);
        assert_eq!(malformed.kind, ErrorKind::Unknown);
        assert_eq!(
            malformed.user_message,
            "An unexpected error occurred. Please try again."
        );
    }
}
