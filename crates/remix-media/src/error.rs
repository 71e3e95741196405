//! Error types for media stages.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running a media stage.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("Missing input file: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("{tool} exited successfully but did not produce {}", .path.display())]
    OutputNotProduced { tool: String, path: PathBuf },

    #[error("{tool} failed ({}): {}", describe_exit(.exit_code), describe_stderr(.stderr))]
    ToolFailed {
        tool: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: String, secs: u64 },

    #[error("Download failed for {url}: {message}")]
    Network {
        url: String,
        message: String,
        retryable: bool,
    },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an external tool failure.
    pub fn tool_failed(tool: impl Into<String>, stderr: Option<String>, exit_code: Option<i32>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an output-missing failure.
    pub fn output_not_produced(tool: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::OutputNotProduced {
            tool: tool.into(),
            path: path.into(),
        }
    }

    /// Create a transport failure.
    pub fn network(url: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
            retryable,
        }
    }

    /// True for transfer failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MediaError::Network { retryable: true, .. })
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn describe_stderr(stderr: &Option<String>) -> &str {
    match stderr.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => text,
        _ => "no diagnostic output",
    }
}
