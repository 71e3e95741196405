//! Remix job record and status state machine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ValidationError, ValidationResult};
use crate::stage::TrackRole;

/// Unique identifier for a remix job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle status.
///
/// ```text
/// pending ──claim──► processing ──► done
///                               └──► error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, waiting for a worker
    #[default]
    Pending,
    /// Claimed by a worker
    Processing,
    /// Finished with a result URL
    Done,
    /// Finished with an error message
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Error)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// The two source references of a remix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct RemixInputs {
    /// Track whose accompaniment stem is kept
    #[validate(length(min = 1))]
    pub instrumental_url: String,
    /// Track whose vocals stem is kept
    #[validate(length(min = 1))]
    pub vocals_url: String,
}

/// URL schemes a download stage knows how to fetch.
const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file"];

impl RemixInputs {
    pub fn new(instrumental_url: impl Into<String>, vocals_url: impl Into<String>) -> Self {
        Self {
            instrumental_url: instrumental_url.into(),
            vocals_url: vocals_url.into(),
        }
    }

    /// Source reference of one track.
    pub fn source(&self, role: TrackRole) -> &str {
        match role {
            TrackRole::Instrumental => &self.instrumental_url,
            TrackRole::Vocals => &self.vocals_url,
        }
    }

    /// Check that both references are present and fetchable.
    pub fn check(&self) -> ValidationResult<()> {
        if let Err(errors) = self.validate() {
            let fields = errors.field_errors();
            if fields.contains_key("instrumental_url") {
                return Err(ValidationError::MissingField("instrumental_url"));
            }
            return Err(ValidationError::MissingField("vocals_url"));
        }

        check_url("instrumental_url", &self.instrumental_url)?;
        check_url("vocals_url", &self.vocals_url)?;
        Ok(())
    }
}

fn check_url(field: &'static str, raw: &str) -> ValidationResult<()> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field));
    }

    let url = Url::parse(trimmed).map_err(|e| ValidationError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;

    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(ValidationError::UnsupportedScheme {
            field,
            scheme: url.scheme().to_string(),
        });
    }
    Ok(())
}

/// A remix job as stored in the job collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RemixJob {
    /// Unique job ID
    pub id: JobId,

    /// Lifecycle status
    #[serde(default)]
    pub status: JobStatus,

    /// Source references
    #[serde(flatten)]
    pub inputs: RemixInputs,

    /// Published intermediate artifacts, keyed by artifact name
    #[serde(default)]
    pub intermediate_urls: BTreeMap<String, String>,

    /// Public URL of the mixed output (terminal success only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,

    /// Failure description (terminal failure only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last write timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemixJob {
    /// Create a new pending job after validating its inputs.
    pub fn new(inputs: RemixInputs) -> ValidationResult<Self> {
        inputs.check()?;
        Ok(Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            inputs,
            intermediate_urls: BTreeMap::new(),
            result_url: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Exactly one of result/error once terminal, neither before.
    pub fn outcome_is_consistent(&self) -> bool {
        let has_result = self.result_url.as_deref().is_some_and(|s| !s.is_empty());
        let has_error = self.error_message.as_deref().is_some_and(|s| !s.is_empty());

        match self.status {
            JobStatus::Pending | JobStatus::Processing => !has_result && !has_error,
            JobStatus::Done => has_result && !has_error,
            JobStatus::Error => has_error && !has_result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Done));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Error));

        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Done));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Done.can_transition_to(JobStatus::Error));
        assert!(!JobStatus::Error.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("done".parse::<JobStatus>().unwrap(), JobStatus::Done);
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert!("finished".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = RemixJob::new(RemixInputs::new(
            "https://example.com/a.mp3",
            "https://example.com/b.mp3",
        ))
        .unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.outcome_is_consistent());
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_missing_inputs_rejected() {
        let err = RemixJob::new(RemixInputs::new("", "https://example.com/b.mp3")).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("instrumental_url"));

        let err = RemixInputs::new("https://example.com/a.mp3", "   ").check().unwrap_err();
        assert_eq!(err.field(), "vocals_url");
    }

    #[test]
    fn test_bad_urls_rejected() {
        let err = RemixInputs::new("not a url", "https://example.com/b.mp3")
            .check()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUrl { field: "instrumental_url", .. }));

        let err = RemixInputs::new("https://example.com/a.mp3", "ftp://example.com/b.mp3")
            .check()
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedScheme { .. }));
    }

    #[test]
    fn test_outcome_consistency() {
        let mut job = RemixJob::new(RemixInputs::new(
            "file:///tmp/a.mp3",
            "file:///tmp/b.mp3",
        ))
        .unwrap();

        job.status = JobStatus::Done;
        assert!(!job.outcome_is_consistent());

        job.result_url = Some("https://cdn.example.com/remixes/x/remix.mp3".into());
        assert!(job.outcome_is_consistent());

        job.error_message = Some("boom".into());
        assert!(!job.outcome_is_consistent());
    }
}
