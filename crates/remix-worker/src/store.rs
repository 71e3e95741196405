//! Job store seam.
//!
//! The worker talks to the job record only through [`JobStore`]. Firestore
//! backs it in production; [`MemoryJobStore`] serves tests and single
//! process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use remix_firestore::{FirestoreError, JobRepository};
use remix_models::{JobId, JobStatus, RemixInputs, RemixJob};

use crate::error::{WorkerError, WorkerResult};

/// Partial update of a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    /// Add one entry to `intermediate_urls`.
    Intermediate { key: String, url: String },
    /// `processing -> done` with the result URL.
    Complete { result_url: String },
    /// `processing -> error` with the stage-tagged message.
    Fail { message: String },
}

impl JobUpdate {
    /// Status this update moves the job to, if any.
    pub fn target_status(&self) -> Option<JobStatus> {
        match self {
            JobUpdate::Intermediate { .. } => None,
            JobUpdate::Complete { .. } => Some(JobStatus::Done),
            JobUpdate::Fail { .. } => Some(JobStatus::Error),
        }
    }
}

/// Durable job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Validate `inputs` and write a new pending job.
    async fn create(&self, inputs: RemixInputs) -> WorkerResult<JobId>;

    async fn get(&self, job_id: &JobId) -> WorkerResult<Option<RemixJob>>;

    /// Snapshot of jobs in `status`, in no particular order.
    async fn query_by_status(&self, status: JobStatus) -> WorkerResult<Vec<RemixJob>>;

    /// Compare-and-swap `pending -> processing`; `false` if someone else won.
    async fn claim(&self, job_id: &JobId) -> WorkerResult<bool>;

    /// Merge `update` into the record, enforcing the status state machine.
    async fn update(&self, job_id: &JobId, update: JobUpdate) -> WorkerResult<()>;
}

#[async_trait]
impl JobStore for JobRepository {
    async fn create(&self, inputs: RemixInputs) -> WorkerResult<JobId> {
        let job = RemixJob::new(inputs)?;
        JobRepository::create(self, &job).await?;
        Ok(job.id)
    }

    async fn get(&self, job_id: &JobId) -> WorkerResult<Option<RemixJob>> {
        Ok(JobRepository::get(self, job_id).await?)
    }

    async fn query_by_status(&self, status: JobStatus) -> WorkerResult<Vec<RemixJob>> {
        Ok(self.list_by_status(status, None).await?)
    }

    async fn claim(&self, job_id: &JobId) -> WorkerResult<bool> {
        Ok(JobRepository::claim(self, job_id).await?)
    }

    async fn update(&self, job_id: &JobId, update: JobUpdate) -> WorkerResult<()> {
        let result = match &update {
            JobUpdate::Intermediate { key, url } => {
                self.record_intermediate(job_id, key, url).await
            }
            JobUpdate::Complete { result_url } => self.complete(job_id, result_url).await,
            JobUpdate::Fail { message } => self.fail(job_id, message).await,
        };

        result.map_err(|e| match e {
            FirestoreError::NotFound(_) => WorkerError::JobNotFound(job_id.to_string()),
            other => WorkerError::Firestore(other),
        })
    }
}

/// In-process job store.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, RemixJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a record as-is, bypassing validation.
    pub async fn insert(&self, job: RemixJob) {
        self.jobs.lock().await.insert(job.id.clone(), job);
    }

    /// Every record currently held.
    pub async fn snapshot(&self) -> Vec<RemixJob> {
        self.jobs.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, inputs: RemixInputs) -> WorkerResult<JobId> {
        let job = RemixJob::new(inputs)?;
        let id = job.id.clone();
        self.insert(job).await;
        Ok(id)
    }

    async fn get(&self, job_id: &JobId) -> WorkerResult<Option<RemixJob>> {
        Ok(self.jobs.lock().await.get(job_id).cloned())
    }

    async fn query_by_status(&self, status: JobStatus) -> WorkerResult<Vec<RemixJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect())
    }

    async fn claim(&self, job_id: &JobId) -> WorkerResult<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Processing;
                job.updated_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update(&self, job_id: &JobId, update: JobUpdate) -> WorkerResult<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))?;

        match update.target_status() {
            Some(target) if !job.status.can_transition_to(target) => {
                return Err(WorkerError::invalid_transition(job_id, job.status, target));
            }
            None if job.status != JobStatus::Processing => {
                return Err(WorkerError::invalid_transition(
                    job_id,
                    job.status,
                    job.status,
                ));
            }
            _ => {}
        }

        match update {
            JobUpdate::Intermediate { key, url } => {
                job.intermediate_urls.insert(key, url);
            }
            JobUpdate::Complete { result_url } => {
                job.status = JobStatus::Done;
                job.result_url = Some(result_url);
                job.error_message = None;
            }
            JobUpdate::Fail { message } => {
                job.status = JobStatus::Error;
                job.error_message = Some(message);
                job.result_url = None;
            }
        }
        job.updated_at = Some(Utc::now());
        Ok(())
    }
}
