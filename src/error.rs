//! Error types for pocket-link.

use thiserror::Error;

/// Errors returned by the pocket-link client.
#[derive(Error, Debug, Clone)]
pub enum PocketLinkError {
    /// Transport-level failure (DNS, TCP, TLS, broken body stream).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid client configuration (bad base URL, bad header value, ...).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An operation did not complete within its configured timeout.
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// Request or response body could not be (de)serialized.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Realtime stream could not be opened or was lost for good.
    #[error("Realtime stream error: {0}")]
    StreamError(String),

    /// The server answered with a status code >= 400.
    #[error("Server error ({status_code}) for {url}")]
    ServerError {
        status_code: u16,
        url: String,
        /// Parsed JSON error body, when the server sent one.
        data: Option<serde_json::Value>,
    },

    /// The operation was abandoned before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PocketLinkError {
    /// HTTP status code for [`PocketLinkError::ServerError`], `None` otherwise.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ServerError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::TimeoutError(_) | Self::StreamError(_) => true,
            Self::ServerError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for PocketLinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TimeoutError(err.to_string())
        } else if err.is_decode() {
            Self::SerializationError(err.to_string())
        } else if err.is_builder() {
            Self::ConfigurationError(err.to_string())
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PocketLinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<url::ParseError> for PocketLinkError {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigurationError(format!("Invalid URL: {}", err))
    }
}

/// Result type for pocket-link operations.
pub type Result<T> = std::result::Result<T, PocketLinkError>;
