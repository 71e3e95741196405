//! Submission validation errors.

use thiserror::Error;

/// Result type for input validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A submission that can never reach the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid URL in {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("Unsupported URL scheme in {field}: {scheme}")]
    UnsupportedScheme { field: &'static str, scheme: String },
}

impl ValidationError {
    /// Name of the offending submission field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField(field)
            | ValidationError::InvalidUrl { field, .. }
            | ValidationError::UnsupportedScheme { field, .. } => field,
        }
    }
}
