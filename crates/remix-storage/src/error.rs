//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised while publishing, listing or deleting artifacts.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("R2 configuration error: {0}")]
    Config(String),

    #[error("Cannot read {} for upload: {message}", .path.display())]
    LocalFile { path: PathBuf, message: String },

    #[error("Upload to {key} failed: {message}")]
    Upload { key: String, message: String },

    #[error("Delete failed: {0}")]
    Delete(String),

    #[error("Listing {prefix} failed: {message}")]
    List { prefix: String, message: String },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Bucket {bucket} unreachable: {message}")]
    Unreachable { bucket: String, message: String },
}

impl StorageError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn upload(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Upload {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn list(prefix: impl Into<String>, message: impl ToString) -> Self {
        Self::List {
            prefix: prefix.into(),
            message: message.to_string(),
        }
    }

    /// Failures of the remote service rather than of the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Upload { .. }
                | StorageError::Delete(_)
                | StorageError::List { .. }
                | StorageError::Unreachable { .. }
        )
    }
}
