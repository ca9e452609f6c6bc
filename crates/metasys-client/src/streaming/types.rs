//! Types for the push-stream connection

use metasys_core::IngestError;
use serde::Serialize;
use thiserror::Error;

/// Lifecycle of one streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never opened
    Idle,
    /// Request sent, waiting for response headers
    Connecting,
    /// Reading frames
    Open,
    /// Closed locally, by the server, or with a 204
    Closed,
    /// Network error or error status; only a new `open_stream` leaves this state
    Failed,
}

/// How a streaming session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// `close()` was called
    Cancelled,
    /// The server ended the response body
    EndOfStream,
    /// The server answered 204: nothing to stream yet
    NoContent,
}

/// Errors that can occur during streaming
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP/connection error
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// Failed to parse a frame
    #[error("Parse error: {0}")]
    Parse(String),

    /// Server returned an error
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The token handed in had already expired
    #[error("Token expired at {0}")]
    TokenExpired(chrono::DateTime<chrono::Utc>),
}

impl From<StreamError> for IngestError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Parse(message) => IngestError::UnparsableFrame(message),
            StreamError::Server { status: 401, message }
            | StreamError::Server { status: 403, message } => IngestError::LogonFailed(message),
            other => IngestError::ConnectionFailed(other.to_string()),
        }
    }
}

/// Result type for streaming operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;
