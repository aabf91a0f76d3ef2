use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The document changed since it was read (stale revision).
    #[error("concurrent update detected on `{key}`")]
    Conflict { key: String },
    /// The document targeted by an update does not exist.
    #[error("document `{key}` does not exist")]
    Missing { key: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a stale-revision error for the given document key.
    pub fn conflict(key: impl Into<String>) -> Self {
        StorageError::Conflict { key: key.into() }
    }

    /// Construct a missing-document error for the given document key.
    pub fn missing(key: impl Into<String>) -> Self {
        StorageError::Missing { key: key.into() }
    }
}
