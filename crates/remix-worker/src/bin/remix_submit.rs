//! Write a pending remix job, optionally processing it in this process.
//!
//! Usage: `remix-submit <instrumental_url> <vocals_url> [--wait]`

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::json;

use remix_models::RemixInputs;
use remix_worker::{init_tracing, JobExecutor, JobOutcome, JobStore, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "remix-submit", version, about = "Submit a remix job")]
struct SubmitArgs {
    /// Source URL of the instrumental track
    instrumental_url: String,

    /// Source URL of the vocals track
    vocals_url: String,

    /// Claim and process the job in this process, then print the record
    #[arg(long)]
    wait: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = SubmitArgs::parse();
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env();
    let inputs = RemixInputs::new(args.instrumental_url, args.vocals_url);
    inputs.check().context("invalid submission")?;

    let executor = JobExecutor::from_env(config)
        .await
        .context("failed to set up worker")?;
    let job_id = executor.store().create(inputs).await?;
    println!("{}", json!({ "job_id": job_id }));

    if !args.wait {
        return Ok(());
    }

    let outcome = executor.process_now(&job_id).await?;
    let job = executor.store().get(&job_id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);

    if let JobOutcome::Failed { message, .. } = outcome {
        bail!("job {} failed: {}", job_id, message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        SubmitArgs::command().debug_assert();
    }

    #[test]
    fn test_parses_urls_and_wait() {
        let args = SubmitArgs::try_parse_from([
            "remix-submit",
            "https://a.example/inst.mp3",
            "https://a.example/vox.mp3",
            "--wait",
        ])
        .unwrap();
        assert_eq!(args.instrumental_url, "https://a.example/inst.mp3");
        assert_eq!(args.vocals_url, "https://a.example/vox.mp3");
        assert!(args.wait);

        assert!(SubmitArgs::try_parse_from(["remix-submit", "only-one"]).is_err());
    }
}
