//! The remix stage sequence.
//!
//! Download, trim, optionally publish the trimmed tracks, transcode,
//! separate, merge and publish, strictly in that order. The first failing
//! stage ends the run; its error is tagged with the stage and track so the
//! job record says where things went wrong.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info_span, Instrument};

use remix_media::SeparatedStems;
use remix_models::{
    ArtifactRole, IntermediateArtifact, JobId, RemixJob, Stage, TrackRole, REMIX_FILE_NAME,
};

use crate::blob::BlobStore;
use crate::error::{ErrorKind, WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::{record_stage, record_terminal_write_failure};
use crate::retry::{retry_async_when, RetryConfig};
use crate::store::{JobStore, JobUpdate};
use crate::tools::StageTools;
use crate::workspace::Workspace;

/// How a job attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done { result_url: String },
    Failed { kind: ErrorKind, message: String },
}

impl JobOutcome {
    /// `done` or the error kind name.
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Done { .. } => "done",
            JobOutcome::Failed { kind, .. } => kind.as_str(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done { .. })
    }

    fn to_update(&self) -> JobUpdate {
        match self {
            JobOutcome::Done { result_url } => JobUpdate::Complete {
                result_url: result_url.clone(),
            },
            JobOutcome::Failed { message, .. } => JobUpdate::Fail {
                message: message.clone(),
            },
        }
    }
}

/// A stage error together with where it happened.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub track: Option<TrackRole>,
    pub error: WorkerError,
}

impl StageFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for StageFailure {
    /// `<stage>[ <track>]: <kind>: <detail>`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage.as_str())?;
        if let Some(track) = self.track {
            write!(f, " {}", track)?;
        }
        write!(f, ": {}: {}", self.kind(), self.error.detail())
    }
}

impl From<StageFailure> for JobOutcome {
    fn from(failure: StageFailure) -> Self {
        JobOutcome::Failed {
            kind: failure.kind(),
            message: failure.to_string(),
        }
    }
}

/// Runs the stage sequence for claimed jobs and records the result.
pub struct Pipeline {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    tools: Arc<dyn StageTools>,
    publish_trimmed: bool,
    terminal_retry: RetryConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        tools: Arc<dyn StageTools>,
    ) -> Self {
        Self {
            store,
            blobs,
            tools,
            publish_trimmed: true,
            terminal_retry: RetryConfig::new("record_outcome"),
        }
    }

    pub fn with_publish_trimmed(mut self, enabled: bool) -> Self {
        self.publish_trimmed = enabled;
        self
    }

    pub fn with_terminal_retry(mut self, retry: RetryConfig) -> Self {
        self.terminal_retry = retry;
        self
    }

    /// Run every stage and return the published result URL.
    pub async fn execute(&self, job: &RemixJob, ws: &Workspace) -> Result<String, StageFailure> {
        let logger = JobLogger::new(&job.id);

        for role in TrackRole::ALL {
            let raw = ws.path(Stage::Download, role.into());
            let bytes = self
                .run_stage(
                    Stage::Download,
                    Some(role),
                    self.tools.download(job.inputs.source(role), &raw),
                )
                .await?;
            logger.progress(&format!("downloaded {} ({} bytes)", role, bytes));
        }

        for role in TrackRole::ALL {
            let raw = ws.path(Stage::Download, role.into());
            let trimmed = ws.path(Stage::Trim, role.into());
            self.run_stage(Stage::Trim, Some(role), self.tools.trim(&raw, &trimmed))
                .await?;
        }

        if self.publish_trimmed {
            for role in TrackRole::ALL {
                self.publish_trimmed_track(&job.id, ws, role).await?;
            }
            logger.progress("published trimmed tracks");
        }

        for role in TrackRole::ALL {
            let trimmed = ws.path(Stage::Trim, role.into());
            let wav = ws.path(Stage::Transcode, role.into());
            self.run_stage(Stage::Transcode, Some(role), self.tools.transcode(&trimmed, &wav))
                .await?;
        }

        let instrumental = self.separate_track(ws, TrackRole::Instrumental).await?;
        let vocals = self.separate_track(ws, TrackRole::Vocals).await?;
        logger.progress("separated stems");

        let mix = ws.path(Stage::Merge, ArtifactRole::Mix);
        self.run_stage(
            Stage::Merge,
            None,
            self.tools
                .merge(&instrumental.accompaniment, &vocals.vocals, &mix),
        )
        .await?;

        match self.tools.probe_duration(&mix).await {
            Ok(secs) => logger.progress(&format!("mixed output is {:.2}s", secs)),
            Err(e) => logger.warning(&format!("could not probe mixed output: {}", e)),
        }

        self.run_stage(
            Stage::Publish,
            None,
            self.blobs.publish(&mix, &job.id, REMIX_FILE_NAME),
        )
        .await
    }

    /// Write the terminal status, retrying transient store failures.
    pub async fn record_outcome(&self, job_id: &JobId, outcome: &JobOutcome) -> WorkerResult<()> {
        let update = outcome.to_update();

        retry_async_when(
            &self.terminal_retry,
            || self.store.update(job_id, update.clone()),
            |e: &WorkerError| {
                !matches!(
                    e,
                    WorkerError::InvalidTransition { .. } | WorkerError::JobNotFound(_)
                )
            },
        )
        .await
        .map_err(|exhausted| {
            record_terminal_write_failure();
            error!(
                job_id = %job_id,
                outcome = outcome.label(),
                "Failed to record terminal status after {} attempts: {}",
                exhausted.attempts,
                exhausted.error
            );
            exhausted.error
        })
    }

    async fn publish_trimmed_track(
        &self,
        job_id: &JobId,
        ws: &Workspace,
        role: TrackRole,
    ) -> Result<(), StageFailure> {
        let artifact = IntermediateArtifact::trimmed(role);
        let trimmed = ws.path(Stage::Trim, role.into());

        let url = self
            .run_stage(
                Stage::Publish,
                Some(role),
                self.blobs.publish(&trimmed, job_id, artifact.file_name()),
            )
            .await?;

        self.run_stage(
            Stage::Publish,
            Some(role),
            self.store.update(
                job_id,
                JobUpdate::Intermediate {
                    key: artifact.key().to_string(),
                    url,
                },
            ),
        )
        .await
    }

    async fn separate_track(
        &self,
        ws: &Workspace,
        role: TrackRole,
    ) -> Result<SeparatedStems, StageFailure> {
        let wav = ws.path(Stage::Transcode, role.into());
        let dir = ws.path(Stage::Separate, role.into());
        self.run_stage(Stage::Separate, Some(role), self.tools.separate(&wav, &dir))
            .await
    }

    /// Await one stage inside its span, timing it and tagging its error.
    async fn run_stage<T, E, F>(
        &self,
        stage: Stage,
        track: Option<TrackRole>,
        fut: F,
    ) -> Result<T, StageFailure>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<WorkerError>,
    {
        let span = info_span!(
            "stage",
            stage = stage.as_str(),
            track = track.map(|t| t.as_str()).unwrap_or("-")
        );

        let started = Instant::now();
        let result = fut.instrument(span).await;
        record_stage(stage, started.elapsed(), result.is_ok());

        result.map_err(|e| StageFailure {
            stage,
            track,
            error: e.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remix_media::MediaError;

    #[test]
    fn test_failure_message_format() {
        let failure = StageFailure {
            stage: Stage::Download,
            track: Some(TrackRole::Instrumental),
            error: MediaError::network("http://x/a.mp3", "HTTP 404", false).into(),
        };
        assert_eq!(
            failure.to_string(),
            "download instrumental: network_error: Download failed for http://x/a.mp3: HTTP 404"
        );

        let failure = StageFailure {
            stage: Stage::Merge,
            track: None,
            error: MediaError::output_not_produced("ffmpeg", "/w/mix.mp3").into(),
        };
        assert!(failure
            .to_string()
            .starts_with("merge: output_not_produced: ffmpeg exited successfully"));
    }

    #[test]
    fn test_outcome_labels() {
        let failed: JobOutcome = StageFailure {
            stage: Stage::Separate,
            track: Some(TrackRole::Vocals),
            error: MediaError::Timeout { tool: "separator".into(), secs: 900 }.into(),
        }
        .into();

        assert_eq!(failed.label(), "timeout");
        assert!(!failed.is_done());
        assert_eq!(
            JobOutcome::Done { result_url: "u".into() }.label(),
            "done"
        );
    }
}
