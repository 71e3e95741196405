//! Firestore REST API client.
//!
//! - Service-account tokens cached with a refresh margin
//! - One transparent re-auth when Firestore reports an expired token
//! - Exponential backoff with jitter for transient failures
//! - Tracing spans and request metrics around every call
//! - Emulator mode (`FIRESTORE_EMULATOR_HOST`): plain HTTP, no auth

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::RetryConfig;
use crate::token_cache::TokenCache;
use crate::types::{Document, RunQueryRequest, RunQueryResponse, StructuredQuery, Value};

const PRODUCTION_HOST: &str = "https://firestore.googleapis.com";

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// GCP project ID
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
    /// `host:port` of a local emulator; disables authentication
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| {
                FirestoreError::auth_error(
                    "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
                )
            })?;

        if project_id.trim().is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID cannot be empty",
            ));
        }

        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.trim().is_empty()),
        })
    }
}

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    /// Absent when talking to the emulator
    token_cache: Option<Arc<TokenCache>>,
}

impl FirestoreClient {
    /// Create a new Firestore client.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let (host, token_cache) = match &config.emulator_host {
            Some(emulator) => (format!("http://{}", emulator), None),
            None => (
                PRODUCTION_HOST.to_string(),
                Some(Arc::new(TokenCache::new(Self::create_auth_provider()?))),
            ),
        };

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("remix-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        let base_url = format!(
            "{}/v1/projects/{}/databases/{}/documents",
            host, config.project_id, config.database_id
        );

        Ok(Self {
            http,
            config,
            base_url,
            token_cache,
        })
    }

    fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            FirestoreError::auth_error(format!("Failed to load service account: {}", e))
        })?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(FirestoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        let config = FirestoreConfig::from_env()?;
        Self::new(config).await
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    fn document_path(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, doc_id)
    }

    /// Send a request, re-authenticating once if the token expired mid-flight.
    async fn send<F>(&self, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let Some(cache) = &self.token_cache else {
            return Ok(build(&self.http).send().await?);
        };

        let token = cache.get_token().await?;
        let response = build(&self.http).bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !Self::is_access_token_expired(&body) {
            return Err(FirestoreError::from_http_status(401, body));
        }

        cache.invalidate().await;
        let token = cache.get_token().await?;
        Ok(build(&self.http).bearer_auth(&token).send().await?)
    }

    /// Get a document.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_path(collection, doc_id);

        self.execute_request("get_document", collection, Some(doc_id), async {
            let response = self.send(|http| http.get(&url)).await?;
            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Create a document; fails with `AlreadyExists` if the ID is taken.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let body = Document::new(fields);

        self.execute_request("create_document", collection, Some(doc_id), async {
            let response = self.send(|http| http.post(&url).json(&body)).await?;
            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
                StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Update the masked fields of a document.
    ///
    /// Masked fields absent from `fields` are deleted. With `update_time`
    /// set the write only applies if the document has not changed since
    /// that read; otherwise `PreconditionFailed` is returned.
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: &[String],
        update_time: Option<&str>,
    ) -> FirestoreResult<Document> {
        let mut params: Vec<String> = update_mask
            .iter()
            .map(|f| format!("updateMask.fieldPaths={}", urlencoding::encode(f)))
            .collect();
        if let Some(ts) = update_time {
            params.push(format!(
                "currentDocument.updateTime={}",
                urlencoding::encode(ts)
            ));
        } else {
            params.push("currentDocument.exists=true".to_string());
        }
        let url = format!(
            "{}?{}",
            self.document_path(collection, doc_id),
            params.join("&")
        );
        let body = Document::new(fields);

        self.execute_request("update_document", collection, Some(doc_id), async {
            let response = self.send(|http| http.patch(&url).json(&body)).await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                StatusCode::NOT_FOUND => Err(FirestoreError::not_found(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                    let body_text = response.text().await.unwrap_or_default();
                    Err(FirestoreError::PreconditionFailed(body_text))
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Run a structured query against the top-level collections.
    pub async fn run_query(&self, query: StructuredQuery) -> FirestoreResult<Vec<Document>> {
        let url = format!("{}:runQuery", self.base_url);
        let collection = query
            .from
            .first()
            .map(|c| c.collection_id.clone())
            .unwrap_or_default();
        let request = RunQueryRequest {
            structured_query: query,
        };

        self.execute_request("run_query", &collection, None, async {
            let response = self.send(|http| http.post(&url).json(&request)).await?;
            match response.status() {
                StatusCode::OK => {
                    let body = response.text().await.unwrap_or_default();
                    // runQuery streams a JSON array; entries without a
                    // document only carry read metadata.
                    let responses: Vec<RunQueryResponse> =
                        serde_json::from_str(&body).map_err(|e| {
                            FirestoreError::InvalidResponse(format!(
                                "Failed to parse runQuery response: {} (body prefix: {})",
                                e,
                                body.chars().take(200).collect::<String>()
                            ))
                        })?;

                    Ok(responses.into_iter().filter_map(|r| r.document).collect())
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Execute with retry.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = FirestoreResult<T>>,
    {
        crate::retry::with_retry(&self.config.retry, operation, op).await
    }

    /// Execute a request with tracing and metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = match doc_id {
            Some(id) => info_span!("firestore_request", operation = %operation, collection = %collection, doc_id = %id),
            None => info_span!("firestore_request", operation = %operation, collection = %collection),
        };

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn handle_error_response(status: StatusCode, url: &str, response: Response) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_response(status.as_u16(), &body, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "GCP_PROJECT_ID",
            "FIREBASE_PROJECT_ID",
            "FIRESTORE_CONNECT_TIMEOUT_SECS",
            "FIRESTORE_EMULATOR_HOST",
            "FIRESTORE_RETRY_BASE_MS",
            "FIRESTORE_RETRY_MAX_MS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_requires_project_id() {
        clear_env();
        assert!(FirestoreConfig::from_env().is_err());

        std::env::set_var("GCP_PROJECT_ID", "");
        assert!(FirestoreConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_prefers_gcp_project_id() {
        clear_env();
        std::env::set_var("GCP_PROJECT_ID", "gcp-project");
        std::env::set_var("FIREBASE_PROJECT_ID", "firebase-project");
        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.project_id, "gcp-project");
        assert_eq!(config.database_id, "(default)");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.emulator_host.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_reads_emulator_and_retry() {
        clear_env();
        std::env::set_var("FIREBASE_PROJECT_ID", "demo");
        std::env::set_var("FIRESTORE_EMULATOR_HOST", "localhost:8080");
        std::env::set_var("FIRESTORE_RETRY_BASE_MS", "50");
        std::env::set_var("FIRESTORE_CONNECT_TIMEOUT_SECS", "not-a-number");
        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.emulator_host.as_deref(), Some("localhost:8080"));
        assert_eq!(config.retry.base_delay_ms, 50);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        clear_env();
    }
}
