//! Repository for remix job documents.
//!
//! Document layout (one document per job, ID = job ID):
//!
//! | field | type |
//! |---|---|
//! | `status` | string: pending, processing, done, error |
//! | `instrumental_url`, `vocals_url` | string |
//! | `intermediate_urls` | map of artifact name to URL |
//! | `remix_url` | string, terminal success only |
//! | `error` | string, terminal failure only |
//! | `created_at`, `updated_at` | timestamp |
//!
//! Every status change is a compare-and-swap on the document's update time,
//! so two workers can never both claim or both finish the same job.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use remix_models::{JobId, JobStatus, RemixInputs, RemixJob};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_claim_conflict;
use crate::types::{Document, FromFirestoreValue, StructuredQuery, ToFirestoreValue, Value};

/// Default collection holding job documents.
pub const DEFAULT_COLLECTION: &str = "remix_jobs";

const FIELD_STATUS: &str = "status";
const FIELD_INSTRUMENTAL_URL: &str = "instrumental_url";
const FIELD_VOCALS_URL: &str = "vocals_url";
const FIELD_INTERMEDIATE_URLS: &str = "intermediate_urls";
const FIELD_RESULT_URL: &str = "remix_url";
const FIELD_ERROR: &str = "error";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_UPDATED_AT: &str = "updated_at";

/// Repository for remix job documents.
#[derive(Clone)]
pub struct JobRepository {
    client: FirestoreClient,
    collection: String,
}

impl JobRepository {
    /// Maximum re-reads when a terminal write races another writer.
    const MAX_TRANSITION_ATTEMPTS: u32 = 5;

    pub fn new(client: FirestoreClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create a pending job record.
    pub async fn create(&self, job: &RemixJob) -> FirestoreResult<()> {
        self.client
            .create_document(&self.collection, job.id.as_str(), job_to_fields(job))
            .await?;
        info!("Created remix job record: {}", job.id);
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get(&self, job_id: &JobId) -> FirestoreResult<Option<RemixJob>> {
        let doc = self
            .client
            .with_retry("get_job", || {
                self.client.get_document(&self.collection, job_id.as_str())
            })
            .await?;

        doc.map(|d| document_to_job(&d, job_id.clone())).transpose()
    }

    /// Snapshot of jobs in `status`, in no particular order.
    pub async fn list_by_status(
        &self,
        status: JobStatus,
        limit: Option<u32>,
    ) -> FirestoreResult<Vec<RemixJob>> {
        let docs = self
            .client
            .with_retry("list_jobs", || {
                let query = StructuredQuery::field_equals(
                    &self.collection,
                    FIELD_STATUS,
                    status.as_str().to_firestore_value(),
                )
                .with_limit(limit);
                self.client.run_query(query)
            })
            .await?;

        let mut jobs = Vec::with_capacity(docs.len());
        for doc in &docs {
            let Some(id) = doc.id() else {
                warn!("Skipping query result without a document name");
                continue;
            };
            match document_to_job(doc, JobId::from_string(id)) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping malformed job document {}: {}", id, e),
            }
        }
        Ok(jobs)
    }

    /// Atomically move a job from `pending` to `processing`.
    ///
    /// Returns `false` if the job is missing, no longer pending, or another
    /// writer changed it between the read and the write.
    pub async fn claim(&self, job_id: &JobId) -> FirestoreResult<bool> {
        let Some(doc) = self.client.get_document(&self.collection, job_id.as_str()).await? else {
            debug!("Job {} vanished before claim", job_id);
            return Ok(false);
        };

        let status = document_status(&doc)?;
        if status != JobStatus::Pending {
            debug!("Job {} is {}, not claiming", job_id, status);
            return Ok(false);
        }

        let mut fields = HashMap::new();
        fields.insert(
            FIELD_STATUS.to_string(),
            JobStatus::Processing.as_str().to_firestore_value(),
        );
        fields.insert(FIELD_UPDATED_AT.to_string(), Utc::now().to_firestore_value());

        match self
            .client
            .update_document(
                &self.collection,
                job_id.as_str(),
                fields,
                &[FIELD_STATUS.to_string(), FIELD_UPDATED_AT.to_string()],
                doc.update_time.as_deref(),
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_precondition_failed() => {
                record_claim_conflict();
                debug!("Lost claim race for job {}", job_id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Record the URL of a published intermediate artifact.
    pub async fn record_intermediate(
        &self,
        job_id: &JobId,
        key: &str,
        url: &str,
    ) -> FirestoreResult<()> {
        let mut urls = BTreeMap::new();
        urls.insert(key.to_string(), url.to_string());

        let mut fields = HashMap::new();
        fields.insert(FIELD_INTERMEDIATE_URLS.to_string(), urls.to_firestore_value());
        fields.insert(FIELD_UPDATED_AT.to_string(), Utc::now().to_firestore_value());

        let mask = [
            format!("{}.{}", FIELD_INTERMEDIATE_URLS, key),
            FIELD_UPDATED_AT.to_string(),
        ];

        self.client
            .with_retry("record_intermediate", || {
                self.client.update_document(
                    &self.collection,
                    job_id.as_str(),
                    fields.clone(),
                    &mask,
                    None,
                )
            })
            .await?;
        Ok(())
    }

    /// Mark a processing job as done with its result URL.
    pub async fn complete(&self, job_id: &JobId, result_url: &str) -> FirestoreResult<()> {
        self.finish(job_id, JobStatus::Done, FIELD_RESULT_URL, result_url)
            .await
    }

    /// Mark a processing job as failed with an error message.
    pub async fn fail(&self, job_id: &JobId, message: &str) -> FirestoreResult<()> {
        self.finish(job_id, JobStatus::Error, FIELD_ERROR, message)
            .await
    }

    /// Guarded terminal write. The opposite outcome field is in the mask
    /// but not in the body, so Firestore deletes it.
    async fn finish(
        &self,
        job_id: &JobId,
        target: JobStatus,
        outcome_field: &str,
        outcome: &str,
    ) -> FirestoreResult<()> {
        let mask = vec![
            FIELD_STATUS.to_string(),
            FIELD_RESULT_URL.to_string(),
            FIELD_ERROR.to_string(),
            FIELD_UPDATED_AT.to_string(),
        ];

        for attempt in 0..Self::MAX_TRANSITION_ATTEMPTS {
            let doc = self
                .client
                .get_document(&self.collection, job_id.as_str())
                .await?
                .ok_or_else(|| {
                    FirestoreError::not_found(format!("{}/{}", self.collection, job_id))
                })?;

            let current = document_status(&doc)?;
            if !current.can_transition_to(target) {
                return Err(FirestoreError::InvalidTransition(format!(
                    "job {}: {} -> {}",
                    job_id, current, target
                )));
            }

            let mut fields = HashMap::new();
            fields.insert(FIELD_STATUS.to_string(), target.as_str().to_firestore_value());
            fields.insert(outcome_field.to_string(), outcome.to_firestore_value());
            fields.insert(FIELD_UPDATED_AT.to_string(), Utc::now().to_firestore_value());

            match self
                .client
                .update_document(
                    &self.collection,
                    job_id.as_str(),
                    fields,
                    &mask,
                    doc.update_time.as_deref(),
                )
                .await
            {
                Ok(_) => {
                    info!("Job {} is now {}", job_id, target);
                    return Ok(());
                }
                Err(e) if e.is_precondition_failed() => {
                    // An intermediate-URL write landed in between; re-read.
                    debug!(
                        "Terminal write for {} raced another writer (attempt {})",
                        job_id,
                        attempt + 1
                    );
                    tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(FirestoreError::request_failed(format!(
            "Failed to mark job {} as {} after {} attempts",
            job_id,
            target,
            Self::MAX_TRANSITION_ATTEMPTS
        )))
    }
}

fn job_to_fields(job: &RemixJob) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert(FIELD_STATUS.to_string(), job.status.as_str().to_firestore_value());
    fields.insert(
        FIELD_INSTRUMENTAL_URL.to_string(),
        job.inputs.instrumental_url.to_firestore_value(),
    );
    fields.insert(
        FIELD_VOCALS_URL.to_string(),
        job.inputs.vocals_url.to_firestore_value(),
    );
    fields.insert(
        FIELD_INTERMEDIATE_URLS.to_string(),
        job.intermediate_urls.to_firestore_value(),
    );
    if let Some(url) = &job.result_url {
        fields.insert(FIELD_RESULT_URL.to_string(), url.to_firestore_value());
    }
    if let Some(message) = &job.error_message {
        fields.insert(FIELD_ERROR.to_string(), message.to_firestore_value());
    }
    fields.insert(FIELD_CREATED_AT.to_string(), job.created_at.to_firestore_value());
    fields.insert(
        FIELD_UPDATED_AT.to_string(),
        job.updated_at.unwrap_or(job.created_at).to_firestore_value(),
    );
    fields
}

fn document_status(doc: &Document) -> FirestoreResult<JobStatus> {
    let raw = doc
        .field(FIELD_STATUS)
        .and_then(String::from_firestore_value)
        .ok_or_else(|| FirestoreError::InvalidResponse("job document has no status".into()))?;
    raw.parse().map_err(FirestoreError::InvalidResponse)
}

fn document_to_job(doc: &Document, id: JobId) -> FirestoreResult<RemixJob> {
    let get_string = |key: &str| doc.field(key).and_then(String::from_firestore_value);
    let get_time = |key: &str| doc.field(key).and_then(DateTime::<Utc>::from_firestore_value);

    Ok(RemixJob {
        id,
        status: document_status(doc)?,
        inputs: RemixInputs {
            instrumental_url: get_string(FIELD_INSTRUMENTAL_URL).unwrap_or_default(),
            vocals_url: get_string(FIELD_VOCALS_URL).unwrap_or_default(),
        },
        intermediate_urls: doc
            .field(FIELD_INTERMEDIATE_URLS)
            .and_then(BTreeMap::<String, String>::from_firestore_value)
            .unwrap_or_default(),
        result_url: get_string(FIELD_RESULT_URL).filter(|s| !s.is_empty()),
        error_message: get_string(FIELD_ERROR).filter(|s| !s.is_empty()),
        created_at: get_time(FIELD_CREATED_AT).unwrap_or_else(Utc::now),
        updated_at: get_time(FIELD_UPDATED_AT),
    })
}
