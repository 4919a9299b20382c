//! Error types for the NDB operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for NdbCluster specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A work queue key that cannot be split into namespace and name
    #[error("invalid resource key: {0}")]
    InvalidKey(String),

    /// Invalid operator configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation (rendered config unreadable, missing metadata)
    #[error("internal error: {0}")]
    Internal(String),

    /// An object the user references does not exist (a named Secret)
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a not-found error for a referenced object
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// HTTP status code of the underlying API error, if any
    fn api_code(&self) -> Option<u16> {
        match self {
            Self::Kube(kube::Error::Api(resp)) => Some(resp.code),
            _ => None,
        }
    }

    /// True when the API server answered 404
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// True when an optimistic-concurrency precondition failed (409)
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Whether the work item should be retried with rate limiting.
    ///
    /// Client errors other than conflicts and throttling will not fix
    /// themselves, neither will validation, decoding or invariant failures.
    /// A missing referenced object is retried until the user creates it.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(resp)) => {
                matches!(resp.code, 409 | 429) || resp.code >= 500
            }
            Self::Kube(_) | Self::NotFound(_) => true,
            Self::Validation(_)
            | Self::Serialization(_)
            | Self::InvalidKey(_)
            | Self::Config(_)
            | Self::Internal(_) => false,
        }
    }

    /// Whether the failure belongs on the resource's status and event stream:
    /// anything retrying will not fix, and anything waiting on the user
    pub fn should_report(&self) -> bool {
        !self.is_retryable() || matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
