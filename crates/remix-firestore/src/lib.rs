//! Firestore REST API client and remix job repository.
//!
//! This crate provides:
//! - A Firestore REST client with service-account auth, retries and metrics
//! - Structured queries and update-time preconditions
//! - `JobRepository`: create, read, list-by-status and guarded status
//!   transitions for remix job documents

pub mod client;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use jobs::{JobRepository, DEFAULT_COLLECTION};
pub use retry::RetryConfig;
pub use types::{Document, FromFirestoreValue, StructuredQuery, ToFirestoreValue, Value};
