use std::path::Path;

use remix_storage::R2Client;
use remix_worker::{MediaToolkit, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_tools()?;
    ensure_any_env_present(&["GCP_PROJECT_ID", "FIREBASE_PROJECT_ID"])?;

    match &config.local_blob_dir {
        Some(dir) => ensure_workdir(dir).await?,
        None => ensure_bucket().await?,
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_tools() -> anyhow::Result<()> {
    let toolkit = MediaToolkit::from_env()?;
    for path in toolkit.check_tools()? {
        println!("worker-selfcheck: found {}", path.display());
    }
    Ok(())
}

async fn ensure_bucket() -> anyhow::Result<()> {
    let client = R2Client::from_env().await?;
    client.check_connectivity().await?;
    println!("worker-selfcheck: bucket {} reachable", client.bucket());
    Ok(())
}

fn ensure_any_env_present(vars: &[&str]) -> anyhow::Result<()> {
    if vars.iter().any(|var| std::env::var(var).is_ok()) {
        Ok(())
    } else {
        Err(anyhow::anyhow!("set one of {}", vars.join(", ")))
    }
}
