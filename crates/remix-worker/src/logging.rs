//! Structured job logging and subscriber setup.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use remix_models::{JobId, RemixInputs};

/// Directive applied when `RUST_LOG` is not set.
const DEFAULT_DIRECTIVE: &str = "remix=info";

/// Install the global subscriber.
///
/// `LOG_FORMAT=json` switches to one JSON object per line; otherwise
/// output is human-readable with ANSI colors.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let registry = tracing_subscriber::registry().with(env_filter);
    if use_json {
        registry.with(fmt::layer().json().with_current_span(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

/// Job-scoped logger; every event carries `job_id`.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.to_string(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn started(&self, inputs: &RemixInputs) {
        info!(
            job_id = %self.job_id,
            instrumental = %inputs.instrumental_url,
            vocals = %inputs.vocals_url,
            "Remix started"
        );
    }

    pub fn progress(&self, message: &str) {
        info!(job_id = %self.job_id, "{}", message);
    }

    pub fn warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "{}", message);
    }

    pub fn succeeded(&self, result_url: &str) {
        info!(job_id = %self.job_id, result_url = %result_url, "Remix done");
    }

    pub fn failed(&self, message: &str) {
        error!(job_id = %self.job_id, "Remix failed: {}", message);
    }

    /// Span the job's stages run under.
    pub fn span(&self) -> Span {
        tracing::info_span!("remix_job", job_id = %self.job_id)
    }
}
