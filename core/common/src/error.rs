//! Common error types for DriveSync.

use thiserror::Error;

/// Top-level error type for DriveSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A required argument was missing or empty.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A remote root could not be resolved to a folder.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// An upload or download reported failure mid-stream.
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Archive is malformed or the password does not match.
    #[error("Archive corrupt: {0}")]
    ArchiveCorrupt(String),

    /// Network request failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials were rejected or could not be refreshed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The remote refused access to a resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The run was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
