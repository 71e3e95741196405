//! Remix worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};

use remix_worker::metrics::init_metrics;
use remix_worker::{init_tracing, JobExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    // TLS for Firestore, R2 and downloads
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting remix-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        if let Err(e) = init_metrics(port) {
            error!("Failed to start metrics exporter: {}", e);
            std::process::exit(1);
        }
    }

    let executor = match JobExecutor::from_env(config).await {
        Ok(executor) => Arc::new(executor),
        Err(e) => {
            error!("Failed to create job executor: {}", e);
            std::process::exit(1);
        }
    };

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
