//! Wire status codes and the per-call error value.

use std::fmt;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;

/// Generic message returned to callers for internal failures.
pub const INTERNAL_MESSAGE: &str = "internal error";

/// Call outcome codes understood by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    /// Payload failed validation.
    InvalidArgument,
    /// Token missing, malformed, unverifiable or expired.
    Unauthenticated,
    /// Token valid but lacks audience or scope.
    PermissionDenied,
    /// Entity does not exist.
    NotFound,
    /// Entity already exists.
    AlreadyExists,
    /// Concurrent modification; the caller's version is stale.
    Aborted,
    /// Method not served here.
    Unimplemented,
    /// Call exceeded the configured timeout.
    DeadlineExceeded,
    /// Dependency unavailable.
    Unavailable,
    /// Unexpected server failure.
    Internal,
    /// Unclassified failure; never leaves the chain.
    Unknown,
}

impl Code {
    /// Canonical upper-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Aborted => "ABORTED",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// HTTP status carrying this code.
    #[must_use]
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists | Self::Aborted => StatusCode::CONFLICT,
            Self::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal | Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call.
///
/// `cause` carries internal detail for server-side logs only; it is dropped
/// by the error-normalization stage and never serialized.
#[derive(Debug)]
pub struct Status {
    code: Code,
    message: String,
    cause: Option<anyhow::Error>,
}

impl Status {
    /// New status with a caller-visible message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// `INVALID_ARGUMENT`
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// `UNAUTHENTICATED`
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    /// `PERMISSION_DENIED`
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    /// `NOT_FOUND`
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// `ALREADY_EXISTS`
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(Code::AlreadyExists, message)
    }

    /// `ABORTED`
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(Code::Aborted, message)
    }

    /// `UNIMPLEMENTED`
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// `DEADLINE_EXCEEDED`
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// `UNAVAILABLE`
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// `INTERNAL` with a cause that is logged but not returned.
    pub fn internal(cause: impl Into<anyhow::Error>) -> Self {
        Self {
            code: Code::Internal,
            message: INTERNAL_MESSAGE.to_string(),
            cause: Some(cause.into()),
        }
    }

    /// Code.
    #[must_use]
    pub fn code(&self) -> Code {
        self.code
    }

    /// Caller-visible message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Internal cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }

    /// Drop the internal cause, keeping code and message.
    #[must_use]
    pub fn without_cause(self) -> Self {
        Self {
            cause: None,
            ..self
        }
    }

    /// Serializable body.
    #[must_use]
    pub fn body(&self) -> StatusBody {
        StatusBody {
            code: self.code,
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Unclassified errors enter the chain as `UNKNOWN` and are normalized.
impl From<anyhow::Error> for Status {
    fn from(err: anyhow::Error) -> Self {
        Self {
            code: Code::Unknown,
            message: err.to_string(),
            cause: Some(err),
        }
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated(m) => Self::unauthenticated(m),
            AuthError::PermissionDenied(m) => Self::permission_denied(m),
        }
    }
}

/// JSON body of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBody {
    /// Outcome code.
    pub code: Code,
    /// Message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_names_and_http_mapping() {
        assert_eq!(Code::PermissionDenied.as_str(), "PERMISSION_DENIED");
        assert_eq!(Code::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Code::InvalidArgument.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(Code::Unknown.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn code_serializes_screaming_snake() {
        let json = serde_json::to_string(&Code::DeadlineExceeded).unwrap();
        assert_eq!(json, "\"DEADLINE_EXCEEDED\"");
    }

    #[test]
    fn internal_hides_cause_from_message() {
        let status = Status::internal(anyhow::anyhow!("connection to crdb refused"));
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), INTERNAL_MESSAGE);
        assert!(status.cause().is_some());
        assert!(!serde_json::to_string(&status.body()).unwrap().contains("crdb"));
    }

    #[test]
    fn auth_errors_map_to_codes() {
        let s: Status = AuthError::Unauthenticated("x".into()).into();
        assert_eq!(s.code(), Code::Unauthenticated);
        let s: Status = AuthError::PermissionDenied("y".into()).into();
        assert_eq!(s.code(), Code::PermissionDenied);
    }
}
