// Error handling module
// Defines the classified error type and the status/body classifier

use serde_json::Value;
use thiserror::Error;

const UNAUTHORIZED: u16 = 401;
const FAILED_VALIDATION: u16 = 422;
const INTERNAL_SERVER_ERROR: u16 = 500;

/// Category of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Access token rejected (401), recoverable once through a refresh
    AuthExpired,

    /// Request failed server-side validation (422)
    Validation,

    /// Server error (500)
    Server,

    /// Any other non-2xx status
    Unknown,

    /// The refresh call failed; the session has been torn down
    RefreshFailed,

    /// No refresh token was available; the session has been torn down
    NoRefreshToken,

    /// The transport failed before a response was received
    Network,
}

impl ErrorKind {
    /// Whether this failure ends the session (logout has already happened)
    pub fn is_session_ending(self) -> bool {
        matches!(self, ErrorKind::RefreshFailed | ErrorKind::NoRefreshToken)
    }
}

/// A classified request failure.
///
/// Every error carries a human-readable message suitable for showing to the
/// user. Only [`ErrorKind::AuthExpired`] is retryable, and only after a
/// successful token refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind == ErrorKind::AuthExpired,
        }
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthExpired, message)
    }

    pub fn refresh_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RefreshFailed, message)
    }

    pub fn no_refresh_token() -> Self {
        Self::new(ErrorKind::NoRefreshToken, "No refresh token")
    }

    /// The session was torn down while the request was in flight
    pub fn session_expired() -> Self {
        Self::new(ErrorKind::RefreshFailed, "Session expired, please sign in again")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }
}

/// Classify a non-2xx response into an [`ApiError`].
///
/// A top-level `message` string in the body wins for 401, 500 and unknown
/// statuses. Otherwise the fallbacks are "Unauthorized", "Server error" and
/// "Something went wrong". A 422 takes the first error of the first field in
/// the `errors` map, in the order the server sent them, or "Failed validation".
pub fn classify(status: u16, body: &Value) -> ApiError {
    match status {
        UNAUTHORIZED => ApiError::auth_expired(
            server_message(body).unwrap_or_else(|| "Unauthorized".to_string()),
        ),
        FAILED_VALIDATION => ApiError::new(
            ErrorKind::Validation,
            first_validation_error(body).unwrap_or_else(|| "Failed validation".to_string()),
        ),
        INTERNAL_SERVER_ERROR => ApiError::new(
            ErrorKind::Server,
            server_message(body).unwrap_or_else(|| "Server error".to_string()),
        ),
        _ => ApiError::new(
            ErrorKind::Unknown,
            server_message(body).unwrap_or_else(|| "Something went wrong".to_string()),
        ),
    }
}

/// Top-level `message` string of an error body
fn server_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// First error string of the first field in an `errors` map
fn first_validation_error(body: &Value) -> Option<String> {
    let (_, messages) = body.get("errors")?.as_object()?.iter().next()?;
    match messages {
        Value::Array(items) => items.first()?.as_str().map(str::to_string),
        Value::String(message) => Some(message.clone()),
        _ => None,
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;
