//! Storage error types.

use thiserror::Error;

/// Errors from a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Backend I/O failed (disk, database engine, poisoned lock).
    #[error("storage I/O error: {0}")]
    Io(String),

    /// A stored record could not be encoded or decoded.
    #[error("storage serialization error: {0}")]
    Serialization(String),
}
