//! Error types for termcast.

use thiserror::Error;

use crate::RecordingId;

/// Main error type for termcast operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No recording registered under this id
    #[error("Recording not found: {0}")]
    RecordingNotFound(RecordingId),

    /// `start` called on a recording that was already started
    #[error("Recording {0} has already been started")]
    AlreadyStarted(RecordingId),

    /// Operation requires a started recording
    #[error("Recording {0} has not been started")]
    NotStarted(RecordingId),

    /// `finalize` called on a recording that was already finalized
    #[error("Recording {0} has already been finalized")]
    AlreadyFinalized(RecordingId),

    /// Another recording is active and the caller only allows one
    #[error("Recording {0} is already in progress")]
    RecordingInProgress(RecordingId),

    /// PTY-related errors
    #[error("PTY error: {0}")]
    Pty(String),

    /// Malformed event log
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error reports caller misuse of the recording lifecycle.
    pub fn is_lifecycle_misuse(&self) -> bool {
        matches!(
            self,
            Error::RecordingNotFound(_)
                | Error::AlreadyStarted(_)
                | Error::NotStarted(_)
                | Error::AlreadyFinalized(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
