use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FirestoreErrorCode {
    InvalidArgument,
    ConversionFailed,
    Cancelled,
    Internal,
    NotFound,
    PermissionDenied,
    Unauthenticated,
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Aborted,
    Rejected,
}

impl FirestoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirestoreErrorCode::InvalidArgument => "firestore/invalid-argument",
            FirestoreErrorCode::ConversionFailed => "firestore/conversion-failed",
            FirestoreErrorCode::Cancelled => "firestore/cancelled",
            FirestoreErrorCode::Internal => "firestore/internal",
            FirestoreErrorCode::NotFound => "firestore/not-found",
            FirestoreErrorCode::PermissionDenied => "firestore/permission-denied",
            FirestoreErrorCode::Unauthenticated => "firestore/unauthenticated",
            FirestoreErrorCode::Unavailable => "firestore/unavailable",
            FirestoreErrorCode::DeadlineExceeded => "firestore/deadline-exceeded",
            FirestoreErrorCode::ResourceExhausted => "firestore/resource-exhausted",
            FirestoreErrorCode::Aborted => "firestore/aborted",
            FirestoreErrorCode::Rejected => "firestore/rejected",
        }
    }
}

/// Coarse classification used by callers to decide whether to stop, log, or retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed query or schema composition, raised before any I/O.
    Validation,
    /// A wire value could not be converted into (or from) the requested Rust type.
    Conversion,
    /// Caller-triggered cancellation or an expired per-request timeout.
    Cancellation,
    /// Non-success responses, malformed payloads and connectivity failures.
    Transport,
}

#[derive(Clone, Debug)]
pub struct FirestoreError {
    pub code: FirestoreErrorCode,
    message: String,
}

impl FirestoreError {
    pub fn new(code: FirestoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code {
            FirestoreErrorCode::InvalidArgument => ErrorKind::Validation,
            FirestoreErrorCode::ConversionFailed => ErrorKind::Conversion,
            FirestoreErrorCode::Cancelled => ErrorKind::Cancellation,
            _ => ErrorKind::Transport,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }
}

impl Display for FirestoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for FirestoreError {}

pub type FirestoreResult<T> = Result<T, FirestoreError>;

pub fn invalid_argument(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::InvalidArgument, message)
}

pub fn conversion_failed(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::ConversionFailed, message)
}

pub fn cancelled(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Cancelled, message)
}

pub fn internal_error(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Internal, message)
}

/// A response body that does not follow the wire format.
pub fn malformed_payload(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(
        FirestoreErrorCode::Internal,
        format!("Malformed Firestore payload: {}", message.into()),
    )
}

pub fn not_found(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::NotFound, message)
}

pub fn permission_denied(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::PermissionDenied, message)
}

pub fn unauthenticated(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unauthenticated, message)
}

pub fn unavailable(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unavailable, message)
}

pub fn deadline_exceeded(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::DeadlineExceeded, message)
}

pub fn resource_exhausted(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::ResourceExhausted, message)
}

pub fn aborted(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Aborted, message)
}

pub fn rejected(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Rejected, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_codes_into_kinds() {
        assert_eq!(invalid_argument("x").kind(), ErrorKind::Validation);
        assert_eq!(conversion_failed("x").kind(), ErrorKind::Conversion);
        assert_eq!(cancelled("x").kind(), ErrorKind::Cancellation);
        assert_eq!(rejected("x").kind(), ErrorKind::Transport);
        assert_eq!(malformed_payload("x").kind(), ErrorKind::Transport);
    }

    #[test]
    fn display_includes_code() {
        let err = cancelled("request timed out");
        assert_eq!(err.to_string(), "request timed out (firestore/cancelled)");
        assert!(err.is_cancellation());
    }
}
