//! Trim, transcode and merge stages.
//!
//! Each stage checks its inputs, runs exactly one FFmpeg process and
//! verifies that the declared output exists before returning.

use std::path::Path;

use tracing::info;

use crate::command::{FfmpegCommand, ToolRunner};
use crate::config::MediaConfig;
use crate::error::MediaResult;
use crate::fs_utils::{ensure_parent, require_input, require_output};

/// Mixing filter for the two stems. The output ends with the shorter input.
pub const MIX_FILTER: &str = "amix=inputs=2:duration=shortest:dropout_transition=3";

/// Build the trim command: first `trim_seconds` of audio as MP3.
pub fn trim_command(config: &MediaConfig, input: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(input)
        .duration(config.trim_seconds)
        .no_video()
        .audio_codec("libmp3lame")
        .sample_rate(config.sample_rate)
        .audio_bitrate(config.bitrate.clone())
}

/// Build the transcode command: PCM WAV for the separator.
pub fn transcode_command(config: &MediaConfig, input: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(input)
        .no_video()
        .audio_codec("pcm_s16le")
        .sample_rate(config.sample_rate)
}

/// Build the merge command over the accompaniment and vocals stems.
pub fn merge_command(
    config: &MediaConfig,
    accompaniment: &Path,
    vocals: &Path,
    output: &Path,
) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(accompaniment)
        .input(vocals)
        .filter_complex(MIX_FILTER)
        .audio_codec("libmp3lame")
        .sample_rate(config.sample_rate)
        .audio_bitrate(config.bitrate.clone())
}

/// Keep the first `trim_seconds` of `input`, encoded as MP3.
pub async fn trim(config: &MediaConfig, input: &Path, output: &Path) -> MediaResult<()> {
    require_input(input).await?;
    run_ffmpeg(config, trim_command(config, input, output)).await?;
    info!("Trimmed {} to {}s", input.display(), config.trim_seconds);
    Ok(())
}

/// Convert `input` to WAV.
pub async fn transcode(config: &MediaConfig, input: &Path, output: &Path) -> MediaResult<()> {
    require_input(input).await?;
    run_ffmpeg(config, transcode_command(config, input, output)).await
}

/// Mix two stems into one MP3 bounded by the shorter stem.
pub async fn merge(
    config: &MediaConfig,
    accompaniment: &Path,
    vocals: &Path,
    output: &Path,
) -> MediaResult<()> {
    require_input(accompaniment).await?;
    require_input(vocals).await?;
    run_ffmpeg(config, merge_command(config, accompaniment, vocals, output)).await?;
    info!("Merged stems into {}", output.display());
    Ok(())
}

async fn run_ffmpeg(config: &MediaConfig, cmd: FfmpegCommand) -> MediaResult<()> {
    let output = cmd.output().to_path_buf();
    ensure_parent(&output).await?;

    let tool = cmd.into_tool(&config.tools.ffmpeg);
    ToolRunner::new()
        .with_timeout(config.tool_timeout)
        .run(&tool)
        .await?;

    require_output(tool.tool_label(), &output).await
}
