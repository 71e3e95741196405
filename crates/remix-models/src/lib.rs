//! Shared data models for the remix pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Remix jobs, their inputs and the status state machine
//! - Stage and track naming shared by the worker, media and storage crates
//! - Submission validation errors

pub mod error;
pub mod job;
pub mod stage;

pub use error::{ValidationError, ValidationResult};
pub use job::{JobId, JobStatus, RemixInputs, RemixJob};
pub use stage::{ArtifactRole, IntermediateArtifact, Stage, TrackRole, REMIX_FILE_NAME};
