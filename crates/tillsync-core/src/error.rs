//! Error types for tillsync-core

use thiserror::Error;

/// Result type alias using tillsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tillsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue item or session not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad enqueue input; rejected immediately, never queued
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payload checksum mismatch; the queued content is untrustworthy
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// The item requires conflict resolution before it can be replayed
    #[error("Unresolved conflict: {0}")]
    Conflict(String),

    /// A domain collaborator failed for a recoverable reason
    #[error("Transient apply failure: {0}")]
    TransientApply(String),

    /// Retries exhausted; terminal failure requiring operator attention
    #[error("Retries exhausted after {0} attempts")]
    ExhaustedRetries(u32),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
