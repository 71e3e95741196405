//! Job lifecycle tests with in-process store, local blob store and fake
//! stage tools. Downloads go through the real downloader (file:// sources).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use url::Url;

use remix_media::{stem_paths, DownloadConfig, Downloader, MediaError, MediaResult, SeparatedStems};
use remix_firestore::FirestoreError;
use remix_models::{JobId, JobStatus, RemixInputs, RemixJob, Stage};
use remix_worker::{
    JobExecutor, JobOutcome, JobStore, JobUpdate, LocalBlobStore, MemoryJobStore, StageTools,
    WorkerConfig, WorkerError, WorkerResult,
};

/// Stage tools that shuffle bytes instead of running FFmpeg.
struct FakeTools {
    downloader: Downloader,
    fail_at: Option<Stage>,
    panic_at: Option<Stage>,
    merge_delay: Duration,
    attempt_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeTools {
    fn new() -> Self {
        let download = DownloadConfig {
            max_attempts: 1,
            idle_timeout: Duration::from_secs(2),
            base_delay: Duration::from_millis(10),
        };
        Self {
            downloader: Downloader::new(download).unwrap(),
            fail_at: None,
            panic_at: None,
            merge_delay: Duration::ZERO,
            attempt_dirs: Mutex::new(Vec::new()),
        }
    }

    fn failing_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    fn panicking_at(mut self, stage: Stage) -> Self {
        self.panic_at = Some(stage);
        self
    }

    fn with_merge_delay(mut self, delay: Duration) -> Self {
        self.merge_delay = delay;
        self
    }

    fn attempt_dirs(&self) -> Vec<PathBuf> {
        self.attempt_dirs.lock().unwrap().clone()
    }

    fn check(&self, stage: Stage, tool: &str) -> MediaResult<()> {
        if self.panic_at == Some(stage) {
            panic!("{} blew up", tool);
        }
        if self.fail_at == Some(stage) {
            return Err(MediaError::tool_failed(tool, Some("model missing".into()), Some(1)));
        }
        Ok(())
    }
}

async fn copy(input: &Path, output: &Path) -> MediaResult<()> {
    if !input.exists() {
        return Err(MediaError::MissingInput(input.to_path_buf()));
    }
    tokio::fs::copy(input, output).await?;
    Ok(())
}

#[async_trait]
impl StageTools for FakeTools {
    async fn download(&self, url: &str, dest: &Path) -> MediaResult<u64> {
        if let Some(dir) = dest.parent() {
            let mut dirs = self.attempt_dirs.lock().unwrap();
            if !dirs.iter().any(|d| d == dir) {
                dirs.push(dir.to_path_buf());
            }
        }
        self.check(Stage::Download, "downloader")?;
        self.downloader.download(url, dest).await
    }

    async fn trim(&self, input: &Path, output: &Path) -> MediaResult<()> {
        self.check(Stage::Trim, "ffmpeg")?;
        copy(input, output).await
    }

    async fn transcode(&self, input: &Path, output: &Path) -> MediaResult<()> {
        self.check(Stage::Transcode, "ffmpeg")?;
        copy(input, output).await
    }

    async fn separate(&self, input: &Path, output_dir: &Path) -> MediaResult<SeparatedStems> {
        self.check(Stage::Separate, "separator")?;
        let stems = stem_paths(input, output_dir);
        if let Some(dir) = stems.vocals.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        copy(input, &stems.vocals).await?;
        copy(input, &stems.accompaniment).await?;
        Ok(stems)
    }

    async fn merge(&self, accompaniment: &Path, vocals: &Path, output: &Path) -> MediaResult<()> {
        self.check(Stage::Merge, "ffmpeg")?;
        tokio::time::sleep(self.merge_delay).await;
        let mut mixed = tokio::fs::read(accompaniment).await?;
        mixed.extend(tokio::fs::read(vocals).await?);
        tokio::fs::write(output, mixed).await?;
        Ok(())
    }

    async fn probe_duration(&self, _path: &Path) -> MediaResult<f64> {
        Ok(6.0)
    }
}

/// Store whose terminal writes fail with a 503 until the budget runs out.
struct FlakyTerminalStore {
    inner: Arc<MemoryJobStore>,
    failures_left: AtomicU32,
    terminal_attempts: AtomicU32,
}

impl FlakyTerminalStore {
    fn new(inner: Arc<MemoryJobStore>, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            terminal_attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl JobStore for FlakyTerminalStore {
    async fn create(&self, inputs: RemixInputs) -> WorkerResult<JobId> {
        self.inner.create(inputs).await
    }

    async fn get(&self, job_id: &JobId) -> WorkerResult<Option<RemixJob>> {
        self.inner.get(job_id).await
    }

    async fn query_by_status(&self, status: JobStatus) -> WorkerResult<Vec<RemixJob>> {
        self.inner.query_by_status(status).await
    }

    async fn claim(&self, job_id: &JobId) -> WorkerResult<bool> {
        self.inner.claim(job_id).await
    }

    async fn update(&self, job_id: &JobId, update: JobUpdate) -> WorkerResult<()> {
        if update.target_status().is_some() {
            self.terminal_attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(FirestoreError::ServerError(503, "unavailable".into()).into());
            }
        }
        self.inner.update(job_id, update).await
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<MemoryJobStore>,
    blobs: Arc<LocalBlobStore>,
    tools: Arc<FakeTools>,
    executor: JobExecutor,
}

impl Harness {
    fn new(tools: FakeTools, config: WorkerConfig) -> Self {
        Self::with_store(tools, config, |store| store as Arc<dyn JobStore>)
    }

    /// Like [`Harness::new`], with the executor seeing `wrap(store)`.
    fn with_store<F>(tools: FakeTools, config: WorkerConfig, wrap: F) -> Self
    where
        F: FnOnce(Arc<MemoryJobStore>) -> Arc<dyn JobStore>,
    {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(LocalBlobStore::new(
            dir.path().join("published"),
            "https://cdn.example.com/remixes",
        ));
        let tools = Arc::new(tools);

        let config = WorkerConfig {
            work_dir: dir.path().join("work"),
            ..config
        };
        let executor = JobExecutor::new(config, wrap(store.clone()), blobs.clone(), tools.clone());

        Self {
            dir,
            store,
            blobs,
            tools,
            executor,
        }
    }

    fn simple(tools: FakeTools) -> Self {
        let config = WorkerConfig {
            store_retries: 1,
            ..WorkerConfig::default()
        };
        Self::new(tools, config)
    }

    /// A file:// source with some bytes in it.
    fn source(&self, name: &str) -> String {
        let path = self.dir.path().join("sources").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("ID3 {}", name)).unwrap();
        Url::from_file_path(&path).unwrap().to_string()
    }

    async fn create_job(&self) -> JobId {
        let inputs = RemixInputs::new(self.source("inst.mp3"), self.source("vox.mp3"));
        self.store.create(inputs).await.unwrap()
    }

    async fn job(&self, id: &JobId) -> RemixJob {
        self.store.get(id).await.unwrap().unwrap()
    }

    async fn drain(&self) {
        assert!(self.executor.wait_idle(Duration::from_secs(10)).await);
    }

    fn work_dir_entries(&self) -> usize {
        match std::fs::read_dir(self.dir.path().join("work")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

#[tokio::test]
async fn test_successful_job_is_done_and_clean() {
    let h = Harness::simple(FakeTools::new());
    let id = h.create_job().await;

    assert_eq!(h.executor.poll_once().await.unwrap(), 1);
    h.drain().await;

    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.outcome_is_consistent());
    assert_eq!(
        job.result_url.as_deref(),
        Some(format!("https://cdn.example.com/remixes/{}/remix.mp3", id).as_str())
    );
    assert_eq!(
        job.intermediate_urls.keys().collect::<Vec<_>>(),
        ["trimmed_instrumental", "trimmed_vocals"]
    );

    let published = h.blobs.root().join(id.as_str());
    assert!(published.join("remix.mp3").exists());
    assert!(published.join("vocals_trimmed.mp3").exists());

    assert_eq!(h.work_dir_entries(), 0);
    for dir in h.tools.attempt_dirs() {
        assert!(!dir.exists(), "{} left behind", dir.display());
    }
}

#[tokio::test]
async fn test_unreachable_source_fails_with_network_error() {
    let h = Harness::simple(FakeTools::new());
    let inputs = RemixInputs::new("http://127.0.0.1:1/instrumental.mp3", h.source("vox.mp3"));
    let id = h.store.create(inputs).await.unwrap();

    h.executor.poll_once().await.unwrap();
    h.drain().await;

    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.result_url.is_none());
    assert!(job.outcome_is_consistent());

    let message = job.error_message.unwrap();
    assert!(
        message.starts_with("download instrumental: network_error:"),
        "unexpected message: {}",
        message
    );

    assert_eq!(h.work_dir_entries(), 0);
    assert!(!h.blobs.root().join(id.as_str()).exists());
}

#[tokio::test]
async fn test_stage_failure_is_tagged() {
    let h = Harness::simple(FakeTools::new().failing_at(Stage::Separate));
    let id = h.create_job().await;

    h.executor.poll_once().await.unwrap();
    h.drain().await;

    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(
        job.error_message.as_deref(),
        Some("separate instrumental: external_tool_error: separator failed (exit code 1): model missing")
    );
    // Trimmed tracks were published before the failure and stay recorded.
    assert_eq!(job.intermediate_urls.len(), 2);
    assert!(!h.blobs.root().join(id.as_str()).join("remix.mp3").exists());
    assert_eq!(h.work_dir_entries(), 0);
}

#[tokio::test]
async fn test_panicking_stage_still_finishes_job() {
    let h = Harness::simple(FakeTools::new().panicking_at(Stage::Merge));
    let id = h.create_job().await;

    h.executor.poll_once().await.unwrap();
    h.drain().await;

    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Error);
    let message = job.error_message.unwrap();
    assert!(message.starts_with("pipeline: internal_error: task panicked"), "{}", message);
    assert!(job.result_url.is_none());

    assert_eq!(h.work_dir_entries(), 0);
    for dir in h.tools.attempt_dirs() {
        assert!(!dir.exists());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_use_separate_workspaces() {
    let config = WorkerConfig {
        max_concurrent_jobs: 4,
        ..WorkerConfig::default()
    };
    let h = Harness::new(
        FakeTools::new().with_merge_delay(Duration::from_millis(100)),
        config,
    );

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(h.create_job().await);
    }

    assert_eq!(h.executor.poll_once().await.unwrap(), 4);
    h.drain().await;

    for id in &ids {
        let job = h.job(id).await;
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.outcome_is_consistent());
    }

    let dirs = h.tools.attempt_dirs();
    assert_eq!(dirs.len(), 4);
    for (i, a) in dirs.iter().enumerate() {
        assert!(!a.exists());
        for b in &dirs[i + 1..] {
            assert!(!a.starts_with(b) && !b.starts_with(a));
        }
    }

    let urls: HashSet<String> = {
        let mut urls = HashSet::new();
        for id in &ids {
            urls.insert(h.job(id).await.result_url.unwrap());
        }
        urls
    };
    assert_eq!(urls.len(), 4);
}

#[tokio::test]
async fn test_jobs_beyond_capacity_stay_pending() {
    let config = WorkerConfig {
        max_concurrent_jobs: 1,
        ..WorkerConfig::default()
    };
    let h = Harness::new(
        FakeTools::new().with_merge_delay(Duration::from_millis(200)),
        config,
    );

    for _ in 0..3 {
        h.create_job().await;
    }

    assert_eq!(h.executor.poll_once().await.unwrap(), 1);
    assert_eq!(h.executor.in_flight(), 1);
    assert_eq!(
        h.store.query_by_status(JobStatus::Pending).await.unwrap().len(),
        2
    );

    h.drain().await;
    assert_eq!(
        h.store.query_by_status(JobStatus::Pending).await.unwrap().len(),
        2
    );
    assert_eq!(h.store.query_by_status(JobStatus::Done).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unpolled_job_stays_pending() {
    let h = Harness::simple(FakeTools::new());
    let id = h.create_job().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.outcome_is_consistent());
}

#[tokio::test]
async fn test_trimmed_publishing_can_be_disabled() {
    let config = WorkerConfig {
        publish_trimmed: false,
        ..WorkerConfig::default()
    };
    let h = Harness::new(FakeTools::new(), config);
    let id = h.create_job().await;

    h.executor.poll_once().await.unwrap();
    h.drain().await;

    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.intermediate_urls.is_empty());
    assert!(!h.blobs.root().join(id.as_str()).join("vocals_trimmed.mp3").exists());
}

#[tokio::test]
async fn test_submit_processes_without_polling() {
    let h = Harness::simple(FakeTools::new());
    let inputs = RemixInputs::new(h.source("inst.mp3"), h.source("vox.mp3"));

    let id = h.executor.submit(inputs).await.unwrap();
    h.drain().await;

    assert_eq!(h.job(&id).await.status, JobStatus::Done);
    assert_eq!(h.work_dir_entries(), 0);
}

#[tokio::test]
async fn test_submit_rejects_invalid_inputs() {
    let h = Harness::simple(FakeTools::new());
    let err = h
        .executor
        .submit(RemixInputs::new("not a url", h.source("vox.mp3")))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Validation(_)));
    assert!(h.store.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_finished_job_is_not_reprocessed() {
    let h = Harness::simple(FakeTools::new());
    let id = h.create_job().await;

    let outcome = h.executor.process_now(&id).await.unwrap();
    assert!(matches!(outcome, JobOutcome::Done { .. }));

    let err = h.executor.process_now(&id).await.unwrap_err();
    assert!(matches!(err, WorkerError::NotClaimed(_)));
    assert_eq!(h.executor.poll_once().await.unwrap(), 0);
    assert_eq!(h.job(&id).await.status, JobStatus::Done);
}

#[tokio::test]
async fn test_run_loop_processes_and_shuts_down() {
    let config = WorkerConfig {
        poll_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(5),
        ..WorkerConfig::default()
    };
    let h = Arc::new(Harness::new(FakeTools::new(), config));
    let id = h.create_job().await;

    let runner = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.executor.run().await })
    };

    let mut status = JobStatus::Pending;
    for _ in 0..200 {
        status = h.job(&id).await.status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, JobStatus::Done);

    h.executor.shutdown();
    runner.await.unwrap().unwrap();
    assert_eq!(h.work_dir_entries(), 0);
}

#[tokio::test]
async fn test_terminal_write_recovers_within_retry_budget() {
    let config = WorkerConfig {
        store_retries: 2,
        ..WorkerConfig::default()
    };
    let flaky = Arc::new(Mutex::new(None::<Arc<FlakyTerminalStore>>));
    let h = {
        let flaky = Arc::clone(&flaky);
        Harness::with_store(FakeTools::new(), config, move |store| {
            let wrapped = Arc::new(FlakyTerminalStore::new(store, 2));
            *flaky.lock().unwrap() = Some(Arc::clone(&wrapped));
            wrapped as Arc<dyn JobStore>
        })
    };
    let id = h.create_job().await;

    assert_eq!(h.executor.poll_once().await.unwrap(), 1);
    h.drain().await;

    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.outcome_is_consistent());
    let store = flaky.lock().unwrap().clone().unwrap();
    assert_eq!(store.terminal_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(h.work_dir_entries(), 0);
}

#[tokio::test]
async fn test_terminal_write_gives_up_and_worker_moves_on() {
    let config = WorkerConfig {
        store_retries: 2,
        ..WorkerConfig::default()
    };
    let flaky = Arc::new(Mutex::new(None::<Arc<FlakyTerminalStore>>));
    let h = {
        let flaky = Arc::clone(&flaky);
        Harness::with_store(FakeTools::new(), config, move |store| {
            let wrapped = Arc::new(FlakyTerminalStore::new(store, 3));
            *flaky.lock().unwrap() = Some(Arc::clone(&wrapped));
            wrapped as Arc<dyn JobStore>
        })
    };
    let stuck = h.create_job().await;

    assert_eq!(h.executor.poll_once().await.unwrap(), 1);
    h.drain().await;

    // One attempt plus two retries, then the write is abandoned.
    let store = flaky.lock().unwrap().clone().unwrap();
    assert_eq!(store.terminal_attempts.load(Ordering::SeqCst), 3);
    let job = h.job(&stuck).await;
    assert_eq!(job.status, JobStatus::Processing);
    assert!(job.result_url.is_none() && job.error_message.is_none());
    assert_eq!(h.work_dir_entries(), 0);
    for dir in h.tools.attempt_dirs() {
        assert!(!dir.exists());
    }

    // The store has recovered; the next job goes through normally.
    let next = h.create_job().await;
    assert_eq!(h.executor.poll_once().await.unwrap(), 1);
    h.drain().await;
    assert_eq!(h.job(&next).await.status, JobStatus::Done);
    assert_eq!(h.job(&stuck).await.status, JobStatus::Processing);
}

#[test]
fn test_zero_job_slots_are_clamped() {
    let config = WorkerConfig {
        max_concurrent_jobs: 0,
        ..WorkerConfig::default()
    };
    let h = Harness::new(FakeTools::new(), config);
    assert_eq!(h.executor.config().max_concurrent_jobs, 1);
    assert_eq!(h.executor.in_flight(), 0);
}
