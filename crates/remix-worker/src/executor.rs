//! Job executor.
//!
//! Discovers pending jobs, claims them, and runs each claimed job on its
//! own task: begin a workspace, run the pipeline, record the outcome, end
//! the workspace. The workspace is ended even when the pipeline panics.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

use remix_firestore::{FirestoreClient, JobRepository};
use remix_models::{JobId, JobStatus, RemixInputs, RemixJob};
use remix_storage::R2Client;

use crate::blob::{BlobStore, LocalBlobStore, R2BlobStore};
use crate::config::{WorkerConfig, MAX_JOB_SLOTS};
use crate::error::{ErrorKind, WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::{record_job_claimed, record_job_finished, set_jobs_in_flight};
use crate::pipeline::{JobOutcome, Pipeline};
use crate::retention::spawn_retention;
use crate::retry::{FailureTracker, RetryConfig};
use crate::store::JobStore;
use crate::tools::{MediaToolkit, StageTools};
use crate::workspace::WorkspaceManager;

/// Consecutive poll failures logged before muting.
const MAX_LOGGED_POLL_FAILURES: u32 = 3;

/// Job executor that processes jobs from the store.
pub struct JobExecutor {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    pipeline: Arc<Pipeline>,
    workspaces: Arc<WorkspaceManager>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(
        mut config: WorkerConfig,
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        tools: Arc<dyn StageTools>,
    ) -> Self {
        config.max_concurrent_jobs = config.max_concurrent_jobs.clamp(1, MAX_JOB_SLOTS);
        let pipeline = Pipeline::new(Arc::clone(&store), Arc::clone(&blobs), tools)
            .with_publish_trimmed(config.publish_trimmed)
            .with_terminal_retry(
                RetryConfig::new("record_outcome").with_max_retries(config.store_retries),
            );
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let workspaces = Arc::new(WorkspaceManager::new(config.work_dir.clone()));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            store,
            blobs,
            pipeline: Arc::new(pipeline),
            workspaces,
            job_semaphore,
            shutdown,
        }
    }

    /// Build the production executor: Firestore jobs, R2 (or local)
    /// artifacts, and the configured media tools.
    pub async fn from_env(config: WorkerConfig) -> WorkerResult<Self> {
        let store = job_store_from_env(&config).await?;
        let blobs = blob_store_from_env(&config).await?;
        let tools: Arc<dyn StageTools> = Arc::new(MediaToolkit::from_env()?);
        Ok(Self::new(config, store, blobs, tools))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Poll for pending jobs until shutdown, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor with {} max concurrent jobs, polling every {:?}",
            self.config.max_concurrent_jobs, self.config.poll_interval
        );
        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let retention_task = self.config.retention.map(|max_age| {
            spawn_retention(
                Arc::clone(&self.blobs),
                max_age,
                self.config.retention_interval,
                self.shutdown.subscribe(),
            )
        });

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut poll_failures = FailureTracker::new(MAX_LOGGED_POLL_FAILURES);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping discovery");
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(dispatched) => {
                            poll_failures.record_success();
                            if dispatched > 0 {
                                debug!("Dispatched {} jobs", dispatched);
                            }
                        }
                        Err(e) => {
                            if poll_failures.record_failure() {
                                warn!("Failed to poll pending jobs: {}", e);
                            }
                        }
                    }
                }
            }
        }

        if let Some(task) = retention_task {
            task.abort();
        }

        info!("Waiting for in-flight jobs to complete...");
        if !self.wait_idle(self.config.shutdown_timeout).await {
            warn!(
                "{} jobs still running after {:?}",
                self.in_flight(),
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// One discovery cycle: claim and dispatch as many pending jobs as
    /// there are free slots. Returns how many were dispatched.
    pub async fn poll_once(&self) -> WorkerResult<usize> {
        let pending = self.store.query_by_status(JobStatus::Pending).await?;
        let mut dispatched = 0;

        for job in pending {
            let Ok(permit) = Arc::clone(&self.job_semaphore).try_acquire_owned() else {
                debug!("All job slots busy, leaving remaining jobs for the next poll");
                break;
            };

            match self.store.claim(&job.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Job {} was claimed elsewhere", job.id);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to claim job {}: {}", job.id, e);
                    continue;
                }
            }

            record_job_claimed();
            self.spawn_job(job, permit);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Create a job and start processing it right away.
    pub async fn submit(&self, inputs: RemixInputs) -> WorkerResult<JobId> {
        let job_id = self.store.create(inputs).await?;
        let permit = Arc::clone(&self.job_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::internal("job semaphore closed"))?;

        let job = self.claim_existing(&job_id).await?;
        record_job_claimed();
        self.spawn_job(job, permit);
        Ok(job_id)
    }

    /// Claim an existing pending job and process it on the caller's task.
    pub async fn process_now(&self, job_id: &JobId) -> WorkerResult<JobOutcome> {
        let _permit = self
            .job_semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::internal("job semaphore closed"))?;

        let job = self.claim_existing(job_id).await?;
        record_job_claimed();
        Ok(Self::process_job(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.workspaces),
            job,
        )
        .await)
    }

    /// Wait until no job is in flight. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.config.max_concurrent_jobs).unwrap_or(u32::MAX);
        tokio::time::timeout(timeout, self.job_semaphore.acquire_many(all))
            .await
            .is_ok()
    }

    /// Jobs currently being processed.
    pub fn in_flight(&self) -> usize {
        self.config
            .max_concurrent_jobs
            .saturating_sub(self.job_semaphore.available_permits())
    }

    async fn claim_existing(&self, job_id: &JobId) -> WorkerResult<RemixJob> {
        if !self.store.claim(job_id).await? {
            return Err(WorkerError::NotClaimed(job_id.to_string()));
        }
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))
    }

    fn spawn_job(&self, job: RemixJob, permit: OwnedSemaphorePermit) {
        let pipeline = Arc::clone(&self.pipeline);
        let workspaces = Arc::clone(&self.workspaces);
        let semaphore = Arc::clone(&self.job_semaphore);
        let max = self.config.max_concurrent_jobs;

        set_jobs_in_flight(max.saturating_sub(semaphore.available_permits()));
        tokio::spawn(async move {
            Self::process_job(pipeline, workspaces, job).await;
            drop(permit);
            set_jobs_in_flight(max.saturating_sub(semaphore.available_permits()));
        });
    }

    /// Process one claimed job end to end.
    async fn process_job(
        pipeline: Arc<Pipeline>,
        workspaces: Arc<WorkspaceManager>,
        job: RemixJob,
    ) -> JobOutcome {
        let logger = JobLogger::new(&job.id);
        let span = logger.span();

        async move {
            logger.started(&job.inputs);

            let workspace = match workspaces.begin(&job.id).await {
                Ok(ws) => Arc::new(ws),
                Err(e) => {
                    let outcome = JobOutcome::Failed {
                        kind: ErrorKind::Internal,
                        message: format!("workspace: {}: {}", ErrorKind::Internal, e.detail()),
                    };
                    Self::finish(&pipeline, &logger, &job.id, &outcome).await;
                    return outcome;
                }
            };

            // The pipeline runs on its own task so a panic is contained.
            let task = {
                let pipeline = Arc::clone(&pipeline);
                let workspace = Arc::clone(&workspace);
                let job = job.clone();
                tokio::spawn(
                    async move { pipeline.execute(&job, &workspace).await }
                        .in_current_span(),
                )
            };

            let outcome = match task.await {
                Ok(Ok(result_url)) => JobOutcome::Done { result_url },
                Ok(Err(failure)) => failure.into(),
                Err(join_error) => JobOutcome::Failed {
                    kind: ErrorKind::Internal,
                    message: format!(
                        "pipeline: {}: {}",
                        ErrorKind::Internal,
                        panic_message(join_error)
                    ),
                },
            };

            Self::finish(&pipeline, &logger, &job.id, &outcome).await;

            match Arc::try_unwrap(workspace) {
                Ok(ws) => ws.end().await,
                // Remaining handles clean up on drop.
                Err(_) => logger.warning("workspace still referenced at end of job"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn finish(pipeline: &Pipeline, logger: &JobLogger, job_id: &JobId, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Done { result_url } => logger.succeeded(result_url),
            JobOutcome::Failed { message, .. } => logger.failed(message),
        }
        record_job_finished(outcome.label());

        if let Err(e) = pipeline.record_outcome(job_id, outcome).await {
            error!("Job {} left without a terminal status: {}", job_id, e);
        }
    }
}

/// Firestore-backed job store for `config.collection`.
pub async fn job_store_from_env(config: &WorkerConfig) -> WorkerResult<Arc<dyn JobStore>> {
    let client = FirestoreClient::from_env().await?;
    Ok(Arc::new(JobRepository::new(client, config.collection.clone())))
}

/// Local directory store when `local_blob_dir` is set, R2 otherwise.
pub async fn blob_store_from_env(config: &WorkerConfig) -> WorkerResult<Arc<dyn BlobStore>> {
    if let Some(dir) = &config.local_blob_dir {
        let store = match &config.local_blob_url {
            Some(url) => LocalBlobStore::new(dir.clone(), url.clone()),
            None => LocalBlobStore::with_file_urls(dir.clone()),
        };
        info!("Publishing artifacts to {}", dir.display());
        return Ok(Arc::new(store));
    }

    let client = R2Client::from_env().await?;
    Ok(Arc::new(R2BlobStore::new(client, config.publish_prefix.clone())))
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return "task cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", s)
    } else {
        "task panicked".to_string()
    }
}
