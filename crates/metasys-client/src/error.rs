//! Error types for Metasys client operations

use metasys_core::IngestError;
use thiserror::Error;

/// Result type alias for Metasys client operations
pub type Result<T> = std::result::Result<T, MetasysClientError>;

/// Errors that can occur during Metasys client operations
#[derive(Error, Debug)]
pub enum MetasysClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Server returned an error response
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Credentials or token rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Object not found
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Timeout
    #[error("Request timed out")]
    Timeout,
}

impl MetasysClientError {
    /// Create a server error from status code and message
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Map into the ingestion taxonomy for a logon call
    pub fn into_logon_error(self) -> IngestError {
        IngestError::LogonFailed(self.to_string())
    }

    /// Map into the ingestion taxonomy for a token refresh call
    pub fn into_refresh_error(self) -> IngestError {
        IngestError::TokenRefreshFailed(self.to_string())
    }

    /// Map into the ingestion taxonomy for a per-object call
    pub fn into_upstream_error(self) -> IngestError {
        match self {
            Self::Unauthorized(message) => IngestError::LogonFailed(message),
            other => IngestError::Upstream(other.to_string()),
        }
    }
}
