//! Error Classification
//!
//! Maps every [`Mt5Error`] to the recovery action the retry loops take.
//!
//! | Class       | Action                           | Examples                                   |
//! |-------------|----------------------------------|--------------------------------------------|
//! | `Retry`     | back off, call again             | `ResourceExhausted`, `Aborted`             |
//! | `Reconnect` | back off, re-establish, call again | transport reset, `Unavailable`, expired session |
//! | `Permanent` | surface immediately              | `InvalidArgument`, trade rejected          |
//! | `Cancelled` | stop, no retry                   | caller cancelled                           |

use tonic::Code;

use crate::Mt5Error;

/// Terminal API codes meaning the server no longer knows our terminal instance.
pub const TERMINAL_LOOKUP_CODES: &[&str] = &[
    "TERMINAL_INSTANCE_NOT_FOUND",
    "TERMINAL_REGISTRY_TERMINAL_NOT_FOUND",
];

/// Recovery action for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; retry on the same session.
    Retry,
    /// Transient; re-establish the session before retrying.
    Reconnect,
    /// Caused by the request itself; retrying cannot help.
    Permanent,
    /// Caller-initiated shutdown.
    Cancelled,
}

impl ErrorClass {
    /// Check if the failure should be retried in some form.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Retry | Self::Reconnect)
    }

    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Reconnect => "reconnect",
            Self::Permanent => "permanent",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Classify an error.
#[must_use]
pub fn classify(error: &Mt5Error) -> ErrorClass {
    match error {
        Mt5Error::Transport(_)
        | Mt5Error::Unavailable(_)
        | Mt5Error::SessionExpired(_)
        | Mt5Error::NotConnected
        | Mt5Error::StreamClosed(_) => ErrorClass::Reconnect,
        Mt5Error::Rpc { code, message } => classify_code(*code, message),
        Mt5Error::Api { code, .. } => {
            if TERMINAL_LOOKUP_CODES.contains(&code.as_str()) {
                ErrorClass::Reconnect
            } else {
                ErrorClass::Permanent
            }
        }
        Mt5Error::Cancelled => ErrorClass::Cancelled,
        Mt5Error::DeadlineExceeded(_)
        | Mt5Error::RetriesExhausted { .. }
        | Mt5Error::SessionClosed
        | Mt5Error::InvalidConfig(_) => ErrorClass::Permanent,
    }
}

fn classify_code(code: Code, message: &str) -> ErrorClass {
    match code {
        Code::Unavailable | Code::Unauthenticated | Code::Unknown => ErrorClass::Reconnect,
        Code::ResourceExhausted | Code::Aborted | Code::DeadlineExceeded | Code::Cancelled => {
            ErrorClass::Retry
        }
        Code::Internal if is_transport_message(message) => ErrorClass::Reconnect,
        _ => ErrorClass::Permanent,
    }
}

/// tonic reports broken HTTP/2 connections as `Internal` with these texts.
fn is_transport_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("h2 protocol error")
        || lower.contains("transport")
        || lower.contains("connection reset")
        || lower.contains("broken pipe")
}

impl Mt5Error {
    /// Classify this error. See [`classify`].
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        classify(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_case::test_case;

    use super::*;

    fn rpc(code: Code) -> Mt5Error {
        Mt5Error::Rpc {
            code,
            message: String::new(),
        }
    }

    #[test_case(Mt5Error::Transport("reset".into()), ErrorClass::Reconnect; "transport")]
    #[test_case(Mt5Error::Unavailable("down".into()), ErrorClass::Reconnect; "unavailable")]
    #[test_case(Mt5Error::SessionExpired("gone".into()), ErrorClass::Reconnect; "session expired")]
    #[test_case(Mt5Error::NotConnected, ErrorClass::Reconnect; "not connected")]
    #[test_case(Mt5Error::StreamClosed("eof".into()), ErrorClass::Reconnect; "stream closed")]
    #[test_case(Mt5Error::Cancelled, ErrorClass::Cancelled; "cancelled")]
    #[test_case(Mt5Error::DeadlineExceeded(Duration::from_secs(1)), ErrorClass::Permanent; "deadline")]
    #[test_case(Mt5Error::InvalidConfig("x".into()), ErrorClass::Permanent; "invalid config")]
    #[test_case(Mt5Error::SessionClosed, ErrorClass::Permanent; "session closed")]
    fn classifies_variants(error: Mt5Error, expected: ErrorClass) {
        assert_eq!(classify(&error), expected);
    }

    #[test_case(Code::Unavailable, ErrorClass::Reconnect)]
    #[test_case(Code::Unauthenticated, ErrorClass::Reconnect)]
    #[test_case(Code::Unknown, ErrorClass::Reconnect)]
    #[test_case(Code::ResourceExhausted, ErrorClass::Retry)]
    #[test_case(Code::Aborted, ErrorClass::Retry)]
    #[test_case(Code::DeadlineExceeded, ErrorClass::Retry)]
    #[test_case(Code::InvalidArgument, ErrorClass::Permanent)]
    #[test_case(Code::FailedPrecondition, ErrorClass::Permanent)]
    #[test_case(Code::PermissionDenied, ErrorClass::Permanent)]
    #[test_case(Code::NotFound, ErrorClass::Permanent)]
    #[test_case(Code::Unimplemented, ErrorClass::Permanent)]
    #[test_case(Code::Internal, ErrorClass::Permanent)]
    fn classifies_grpc_codes(code: Code, expected: ErrorClass) {
        assert_eq!(classify(&rpc(code)), expected);
    }

    #[test]
    fn internal_transport_failure_reconnects() {
        let error = Mt5Error::Rpc {
            code: Code::Internal,
            message: "h2 protocol error: connection reset".to_string(),
        };
        assert_eq!(error.class(), ErrorClass::Reconnect);
    }

    #[test_case("TERMINAL_INSTANCE_NOT_FOUND", ErrorClass::Reconnect)]
    #[test_case("TERMINAL_REGISTRY_TERMINAL_NOT_FOUND", ErrorClass::Reconnect)]
    #[test_case("TRADE_RETCODE_NO_MONEY", ErrorClass::Permanent)]
    #[test_case("INVALID_SYMBOL", ErrorClass::Permanent)]
    fn classifies_api_codes(code: &str, expected: ErrorClass) {
        let error = Mt5Error::Api {
            code: code.to_string(),
            message: String::new(),
        };
        assert_eq!(error.class(), expected);
    }

    #[test]
    fn transient_flag() {
        assert!(ErrorClass::Retry.is_transient());
        assert!(ErrorClass::Reconnect.is_transient());
        assert!(!ErrorClass::Permanent.is_transient());
        assert!(!ErrorClass::Cancelled.is_transient());
    }
}
