//! Common error types for stream ingestion

use thiserror::Error;

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors that can occur while ingesting the upstream stream
///
/// Apart from [`IngestError::Config`] and a logon failure during startup,
/// none of these are fatal: the importer recovers from them locally and
/// reports them through the audit trail and metrics.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Credentials rejected or logon endpoint unreachable
    #[error("Logon failed: {0}")]
    LogonFailed(String),

    /// Network or stream error on the push connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A frame could not be parsed
    #[error("Unparsable frame: {0}")]
    UnparsableFrame(String),

    /// A heartbeat timestamp could not be parsed
    #[error("Unparsable timestamp: {0}")]
    UnparsableTimestamp(String),

    /// A value arrived for a reference with no sensor mapping
    #[error("Sensor not mapped: {0}")]
    SensorNotMapped(String),

    /// Refreshing the bearer token failed
    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    /// An upstream call (subscribe, trend read) failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Whether the error should be retried rather than surfaced to the caller
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    /// Short machine-readable kind, used as a metric tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LogonFailed(_) => "logon_failed",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::UnparsableFrame(_) => "unparsable_frame",
            Self::UnparsableTimestamp(_) => "unparsable_timestamp",
            Self::SensorNotMapped(_) => "sensor_not_mapped",
            Self::TokenRefreshFailed(_) => "token_refresh_failed",
            Self::Upstream(_) => "upstream",
            Self::Config(_) => "config",
        }
    }
}
