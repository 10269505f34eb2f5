//! Error types for quiver.

use thiserror::Error;

/// Errors surfaced by index construction, mutation, search, and I/O.
#[derive(Debug, Error)]
pub enum QuiverError {
    /// A caller-supplied argument violates a documented constraint
    /// (dimension mismatch, capacity bounds, duplicate external id, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An external id is not present in the index.
    #[error("external id {0} not found")]
    NotFound(u64),

    /// An external id was soft-deleted more than once.
    #[error("external id {0} is already deleted")]
    AlreadyDeleted(u64),

    /// Underlying I/O failure from a loader or saver.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A file or string failed structural validation.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// The operation requires a state the engine is not in.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An internal consistency check failed. This indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for quiver operations.
pub type Result<T> = std::result::Result<T, QuiverError>;

impl QuiverError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        QuiverError::InvalidArgument(message.into())
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        QuiverError::Malformed(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        QuiverError::Internal(message.into())
    }
}
