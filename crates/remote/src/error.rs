//! Error types for the remote crate.

use schoolops_core::errors::{classify_http_status, RemoteFailure, RetryClass};
use thiserror::Error;

/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors that can occur talking to the data API.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the data service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (bad identifier, unusable filter, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or malformed credentials)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl RemoteError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Http(err) => match err.status() {
                Some(status) => classify_http_status(status.as_u16()),
                None => RetryClass::Retryable,
            },
            Self::Json(_) => RetryClass::Permanent,
            Self::InvalidRequest(_) => RetryClass::Permanent,
            Self::Auth(_) => RetryClass::ReauthRequired,
        }
    }
}

impl From<RemoteError> for RemoteFailure {
    fn from(err: RemoteError) -> Self {
        let message = err.to_string();
        match err {
            RemoteError::Api { status, .. } => RemoteFailure::with_status(status, message),
            RemoteError::Http(ref http) => match http.status() {
                Some(status) => RemoteFailure::with_status(status.as_u16(), message),
                None => RemoteFailure::new(message),
            },
            RemoteError::Json(_) | RemoteError::InvalidRequest(_) => {
                RemoteFailure::with_status(400, message)
            }
            RemoteError::Auth(_) => RemoteFailure::with_status(401, message),
        }
    }
}
