//! Worker error types.

use std::fmt;

use thiserror::Error;

use remix_media::MediaError;
use remix_models::{JobStatus, ValidationError};
use remix_storage::StorageError;
use remix_firestore::FirestoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {0} could not be claimed")]
    NotClaimed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure categories reported in a job's error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Network,
    ExternalTool,
    OutputNotProduced,
    MissingInput,
    Timeout,
    Store,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Network => "network_error",
            ErrorKind::ExternalTool => "external_tool_error",
            ErrorKind::OutputNotProduced => "output_not_produced",
            ErrorKind::MissingInput => "missing_input",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Store => "store_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn invalid_transition(job_id: impl fmt::Display, from: JobStatus, to: JobStatus) -> Self {
        Self::InvalidTransition {
            job_id: job_id.to_string(),
            from,
            to,
        }
    }

    /// Classify the failure for job error messages and metrics.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Validation(_) => ErrorKind::Validation,
            WorkerError::Media(e) => match e {
                MediaError::ToolNotFound(_) | MediaError::ToolFailed { .. } => {
                    ErrorKind::ExternalTool
                }
                MediaError::MissingInput(_) => ErrorKind::MissingInput,
                MediaError::OutputNotProduced { .. } => ErrorKind::OutputNotProduced,
                MediaError::Timeout { .. } => ErrorKind::Timeout,
                MediaError::Network { .. } | MediaError::Http(_) => ErrorKind::Network,
                MediaError::Io(_) | MediaError::JsonParse(_) => ErrorKind::Internal,
            },
            WorkerError::Storage(e) => match e {
                StorageError::LocalFile { .. } => ErrorKind::MissingInput,
                StorageError::Config(_) | StorageError::InvalidKey(_) => ErrorKind::Internal,
                _ => ErrorKind::Network,
            },
            WorkerError::Firestore(_)
            | WorkerError::JobNotFound(_)
            | WorkerError::InvalidTransition { .. }
            | WorkerError::NotClaimed(_) => ErrorKind::Store,
            WorkerError::ConfigError(_) | WorkerError::Internal(_) | WorkerError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Error text without the wrapper prefix.
    pub fn detail(&self) -> String {
        match self {
            WorkerError::Validation(e) => e.to_string(),
            WorkerError::Media(e) => e.to_string(),
            WorkerError::Storage(e) => e.to_string(),
            WorkerError::Firestore(e) => e.to_string(),
            WorkerError::Internal(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Whether another attempt at the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_retryable(),
            WorkerError::Firestore(e) => e.is_retryable(),
            WorkerError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_media_classification() {
        let cases = [
            (MediaError::tool_failed("ffmpeg", None, Some(1)), ErrorKind::ExternalTool),
            (MediaError::ToolNotFound("spleeter".into()), ErrorKind::ExternalTool),
            (MediaError::MissingInput(PathBuf::from("a.wav")), ErrorKind::MissingInput),
            (MediaError::output_not_produced("ffmpeg", "b.mp3"), ErrorKind::OutputNotProduced),
            (MediaError::Timeout { tool: "separator".into(), secs: 900 }, ErrorKind::Timeout),
            (MediaError::network("http://x", "HTTP 404", false), ErrorKind::Network),
        ];

        for (err, kind) in cases {
            assert_eq!(WorkerError::from(err).kind(), kind);
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::Network.as_str(), "network_error");
        assert_eq!(ErrorKind::ExternalTool.to_string(), "external_tool_error");
        assert_eq!(ErrorKind::Store.as_str(), "store_error");
        assert_eq!(ErrorKind::Internal.as_str(), "internal_error");
    }

    #[test]
    fn test_store_errors() {
        let err = WorkerError::invalid_transition("j1", JobStatus::Done, JobStatus::Error);
        assert_eq!(err.kind(), ErrorKind::Store);
        assert!(!err.is_retryable());

        let err = WorkerError::from(FirestoreError::ServerError(503, "busy".into()));
        assert_eq!(err.kind(), ErrorKind::Store);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_storage_classification() {
        let err = WorkerError::from(StorageError::upload("remixes/j/remix.mp3", "reset"));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());

        let err = WorkerError::from(StorageError::InvalidKey("../x".into()));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_detail_drops_prefix() {
        let err = WorkerError::from(MediaError::network("http://x/a.mp3", "HTTP 404", false));
        assert_eq!(err.detail(), "Download failed for http://x/a.mp3: HTTP 404");
        assert!(err.to_string().starts_with("Media error: "));
    }
}
