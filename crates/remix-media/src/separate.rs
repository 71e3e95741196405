//! Two-stem source separation.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{ToolCommand, ToolRunner};
use crate::config::MediaConfig;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{is_non_empty_file, require_input};

/// Stem files written by the separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparatedStems {
    pub vocals: PathBuf,
    pub accompaniment: PathBuf,
}

/// Where the separator leaves the stems of `input` under `output_dir`.
///
/// The separator names its per-input directory after the input's file stem.
pub fn stem_paths(input: &Path, output_dir: &Path) -> SeparatedStems {
    let name = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let base = output_dir.join(name);
    SeparatedStems {
        vocals: base.join("vocals.wav"),
        accompaniment: base.join("accompaniment.wav"),
    }
}

/// Build the separator invocation.
pub fn separate_command(config: &MediaConfig, input: &Path, output_dir: &Path) -> ToolCommand {
    let (program, leading) = match config.tools.separator.split_first() {
        Some((program, rest)) => (program.clone(), rest.to_vec()),
        None => ("spleeter".to_string(), Vec::new()),
    };

    ToolCommand::new(program)
        .label("separator")
        .args(leading)
        .arg("separate")
        .arg(input.to_string_lossy())
        .arg("-p")
        .arg(config.separator_model.clone())
        .arg("-o")
        .arg(output_dir.to_string_lossy())
}

/// Split a WAV file into vocals and accompaniment stems.
pub async fn separate(
    config: &MediaConfig,
    input: &Path,
    output_dir: &Path,
) -> MediaResult<SeparatedStems> {
    require_input(input).await?;
    tokio::fs::create_dir_all(output_dir).await?;

    let cmd = separate_command(config, input, output_dir);
    ToolRunner::new()
        .with_timeout(config.tool_timeout)
        .run(&cmd)
        .await?;

    let stems = stem_paths(input, output_dir);
    for stem in [&stems.vocals, &stems.accompaniment] {
        if !is_non_empty_file(stem).await {
            return Err(MediaError::output_not_produced(cmd.tool_label(), stem));
        }
    }

    info!("Separated {} into two stems", input.display());
    Ok(stems)
}
