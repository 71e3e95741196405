//! Remix job worker.
//!
//! This crate provides:
//! - The polling executor that claims pending jobs and bounds concurrency
//! - The fixed stage pipeline with stage-tagged failures
//! - Per-attempt workspaces that never outlive their job
//! - Store, blob and tool seams with production and in-process backends
//! - Retention of published artifacts

pub mod blob;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retention;
pub mod retry;
pub mod store;
pub mod tools;
pub mod workspace;

pub use blob::{BlobObject, BlobStore, LocalBlobStore, R2BlobStore};
pub use config::WorkerConfig;
pub use error::{ErrorKind, WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::{init_tracing, JobLogger};
pub use pipeline::{JobOutcome, Pipeline, StageFailure};
pub use retention::{sweep_expired, SweepReport};
pub use store::{JobStore, JobUpdate, MemoryJobStore};
pub use tools::{MediaToolkit, StageTools};
pub use workspace::{Workspace, WorkspaceManager};
