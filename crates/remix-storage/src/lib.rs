//! Cloudflare R2 publishing for remix artifacts.
//!
//! This crate provides:
//! - An S3-API client configured for R2
//! - Deterministic object keys and public URLs for published artifacts
//! - Prefix listing and batch deletion used by retention

pub mod client;
pub mod error;
pub mod keys;
pub mod operations;

pub use client::{ObjectInfo, R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use keys::{artifact_key, content_type_for, job_prefix, public_url};
