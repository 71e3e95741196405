//! Stage executors for the remix pipeline.
//!
//! This crate provides:
//! - Streaming source downloads with retry and stall detection
//! - FFmpeg command building and a timeout-bounded tool runner
//! - Trim, transcode, separate and merge stages with input/output checks
//! - FFprobe duration lookup

pub mod audio;
pub mod command;
pub mod config;
pub mod download;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod separate;

pub use audio::{merge, transcode, trim, MIX_FILTER};
pub use command::{check_tool, FfmpegCommand, ToolCommand, ToolOutput, ToolRunner};
pub use config::{DownloadConfig, MediaConfig, ToolPaths};
pub use download::Downloader;
pub use error::{MediaError, MediaResult};
pub use probe::probe_duration;
pub use separate::{separate, stem_paths, SeparatedStems};
