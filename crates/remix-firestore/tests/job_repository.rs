//! Job repository behavior against a mocked Firestore endpoint.

use std::time::Duration;

use remix_firestore::{FirestoreClient, FirestoreConfig, FirestoreError, JobRepository, RetryConfig};
use remix_models::{JobId, JobStatus};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";
const UPDATE_TIME: &str = "2024-05-01T10:00:00.123456Z";

async fn repository(server: &MockServer) -> JobRepository {
    let config = FirestoreConfig {
        project_id: "test-project".to_string(),
        database_id: "(default)".to_string(),
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        emulator_host: Some(server.address().to_string()),
    };
    let client = FirestoreClient::new(config).await.unwrap();
    JobRepository::new(client, "remix_jobs")
}

fn job_doc(id: &str, status: &str) -> Value {
    json!({
        "name": format!("projects/test-project/databases/(default)/documents/remix_jobs/{id}"),
        "fields": {
            "status": {"stringValue": status},
            "instrumental_url": {"stringValue": "https://example.com/beat.mp3"},
            "vocals_url": {"stringValue": "https://example.com/voice.mp3"},
            "created_at": {"timestampValue": "2024-05-01T09:59:00Z"}
        },
        "updateTime": UPDATE_TIME
    })
}

async fn mount_get(server: &MockServer, id: &str, status: &str) {
    Mock::given(method("GET"))
        .and(path(format!("{DOCS}/remix_jobs/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_doc(id, status)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn claim_uses_update_time_precondition() {
    let server = MockServer::start().await;
    mount_get(&server, "job-1", "pending").await;
    Mock::given(method("PATCH"))
        .and(path(format!("{DOCS}/remix_jobs/job-1")))
        .and(query_param("currentDocument.updateTime", UPDATE_TIME))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_doc("job-1", "processing")))
        .expect(1)
        .mount(&server)
        .await;

    let repo = repository(&server).await;
    assert!(repo.claim(&JobId::from("job-1")).await.unwrap());
}

#[tokio::test]
async fn claim_lost_race_returns_false() {
    let server = MockServer::start().await;
    mount_get(&server, "job-2", "pending").await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "stored version mismatch", "status": "FAILED_PRECONDITION"}
        })))
        .mount(&server)
        .await;

    let repo = repository(&server).await;
    assert!(!repo.claim(&JobId::from("job-2")).await.unwrap());
}

#[tokio::test]
async fn claim_skips_non_pending_job() {
    let server = MockServer::start().await;
    mount_get(&server, "job-3", "processing").await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let repo = repository(&server).await;
    assert!(!repo.claim(&JobId::from("job-3")).await.unwrap());
}

#[tokio::test]
async fn claim_missing_job_returns_false() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let repo = repository(&server).await;
    assert!(!repo.claim(&JobId::from("gone")).await.unwrap());
}

#[tokio::test]
async fn list_by_status_skips_metadata_entries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{DOCS}:runQuery")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"document": job_doc("a", "pending"), "readTime": UPDATE_TIME},
            {"document": job_doc("b", "pending"), "readTime": UPDATE_TIME},
            {"readTime": UPDATE_TIME}
        ])))
        .mount(&server)
        .await;

    let repo = repository(&server).await;
    let mut jobs = repo.list_by_status(JobStatus::Pending, None).await.unwrap();
    jobs.sort_by(|x, y| x.id.cmp(&y.id));

    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id.as_str(), "a");
    assert_eq!(jobs[1].inputs.vocals_url, "https://example.com/voice.mp3");
    assert!(jobs.iter().all(|j| j.status == JobStatus::Pending));
}

#[tokio::test]
async fn complete_requires_processing() {
    let server = MockServer::start().await;
    mount_get(&server, "job-4", "pending").await;

    let repo = repository(&server).await;
    let err = repo
        .complete(&JobId::from("job-4"), "https://cdn.example.com/r.mp3")
        .await
        .unwrap_err();
    assert!(matches!(err, FirestoreError::InvalidTransition(_)));
}

#[tokio::test]
async fn fail_clears_result_field() {
    let server = MockServer::start().await;
    mount_get(&server, "job-5", "processing").await;
    Mock::given(method("PATCH"))
        .and(path(format!("{DOCS}/remix_jobs/job-5")))
        .and(query_param("currentDocument.updateTime", UPDATE_TIME))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_doc("job-5", "error")))
        .expect(1)
        .mount(&server)
        .await;

    let repo = repository(&server).await;
    repo.fail(&JobId::from("job-5"), "download: network_error: HTTP 404")
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let patch = requests
        .iter()
        .find(|r| r.method.to_string() == "PATCH")
        .unwrap();
    let query = patch.url.query().unwrap_or_default();
    assert!(query.contains("updateMask.fieldPaths=remix_url"));
    assert!(query.contains("updateMask.fieldPaths=error"));

    let body: Value = serde_json::from_slice(&patch.body).unwrap();
    assert_eq!(body["fields"]["status"]["stringValue"], "error");
    assert!(body["fields"].get("remix_url").is_none());
}

#[tokio::test]
async fn server_errors_are_retried_on_reads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_get(&server, "job-6", "done").await;

    let repo = repository(&server).await;
    let job = repo.get(&JobId::from("job-6")).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
}
