//! Error types for the sync core.

use thiserror::Error;

use crate::sessions::TransitionError;

/// Result type alias for sync core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Retry policy class for remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Classify HTTP status into retry behavior.
pub fn classify_http_status(status: u16) -> RetryClass {
    match status {
        401 | 403 => RetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
        500..=599 => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

/// Failure reported by a remote collaborator (query, mutation or feed).
///
/// `status` is the HTTP status when the failure came from an API response;
/// `None` means the request never produced one (transport, decoding).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(404, message)
    }

    pub fn retry_class(&self) -> RetryClass {
        match self.status {
            Some(status) => classify_http_status(status),
            None => RetryClass::Retryable,
        }
    }
}

/// Errors surfaced by views, the CRUD facade and session workflows.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Initial (or refresh) load of a view failed.
    #[error("Fetch from '{collection}' failed: {source}")]
    Fetch {
        collection: String,
        source: RemoteFailure,
    },

    /// Change feed could not be established or dropped; the view is stale.
    #[error("Live updates for '{collection}' paused: {source}")]
    Subscription {
        collection: String,
        source: RemoteFailure,
    },

    /// A create/update/remove call failed. Views are left untouched.
    #[error("Mutation on '{collection}' failed: {source}")]
    Mutation {
        collection: String,
        source: RemoteFailure,
    },

    /// A raw notification could not be normalized.
    #[error("Malformed change event: {0}")]
    MalformedEvent(String),

    /// Entity expected to exist was not found.
    #[error("{collection} '{id}' not found")]
    NotFound { collection: String, id: String },

    /// Invalid session lifecycle transition.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn fetch(collection: impl Into<String>, source: RemoteFailure) -> Self {
        Self::Fetch {
            collection: collection.into(),
            source,
        }
    }

    pub fn subscription(collection: impl Into<String>, source: RemoteFailure) -> Self {
        Self::Subscription {
            collection: collection.into(),
            source,
        }
    }

    pub fn mutation(collection: impl Into<String>, source: RemoteFailure) -> Self {
        Self::Mutation {
            collection: collection.into(),
            source,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEvent(message.into())
    }

    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// The remote failure behind this error, if any.
    pub fn remote(&self) -> Option<&RemoteFailure> {
        match self {
            Self::Fetch { source, .. }
            | Self::Subscription { source, .. }
            | Self::Mutation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Fetch { source, .. }
            | Self::Subscription { source, .. }
            | Self::Mutation { source, .. } => source.retry_class(),
            Self::MalformedEvent(_)
            | Self::NotFound { .. }
            | Self::Transition(_)
            | Self::Config(_) => RetryClass::Permanent,
        }
    }
}
