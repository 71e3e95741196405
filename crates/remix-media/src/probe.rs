//! FFprobe duration lookup.

use std::path::Path;

use serde::Deserialize;

use crate::command::{ToolCommand, ToolRunner};
use crate::config::MediaConfig;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::require_input;

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Parse the container duration out of `ffprobe -show_format` JSON.
pub fn parse_duration(json: &[u8]) -> MediaResult<f64> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;
    probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| MediaError::tool_failed("ffprobe", Some("no duration reported".into()), Some(0)))
}

/// Duration of an audio file in seconds.
pub async fn probe_duration(config: &MediaConfig, path: &Path) -> MediaResult<f64> {
    require_input(path).await?;

    let cmd = ToolCommand::new(config.tools.ffprobe.clone())
        .label("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path.to_string_lossy());

    let output = ToolRunner::new()
        .with_timeout(config.tool_timeout)
        .run(&cmd)
        .await?;

    parse_duration(&output.stdout)
}
