//! Importer error types

use metasys_client::{MetasysClientError, StreamError};
use metasys_core::IngestError;
use thiserror::Error;

/// Result type alias for importer operations
pub type ImporterResult<T> = std::result::Result<T, ImporterError>;

/// Errors that stop the importer from starting
///
/// Once running, the importer recovers from failures itself and reports them
/// through the audit trail and metrics; these errors only surface from
/// construction and [`start`](crate::StreamImporter::start).
#[derive(Error, Debug)]
pub enum ImporterError {
    /// Initial logon or another ingestion failure
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Upstream client could not be built
    #[error("Client error: {0}")]
    Client(#[from] MetasysClientError),

    /// Streaming client could not be built
    #[error("Stream client error: {0}")]
    Stream(#[from] StreamError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// `start` was called on a running importer
    #[error("Importer already started")]
    AlreadyStarted,
}
