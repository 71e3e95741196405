//! Media stage configuration.

use std::time::Duration;

/// External binaries invoked by the stages.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    /// FFmpeg binary
    pub ffmpeg: String,
    /// FFprobe binary
    pub ffprobe: String,
    /// Separator program followed by any fixed leading arguments,
    /// e.g. `["python", "-m", "spleeter"]`
    pub separator: Vec<String>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            separator: vec!["spleeter".to_string()],
        }
    }
}

/// Retry and stall policy for source downloads.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Total attempts per source, including the first
    pub max_attempts: u32,
    /// Longest wait for the next chunk (or the response head) before the
    /// transfer counts as stalled
    pub idle_timeout: Duration,
    /// First backoff delay, doubled after each failed attempt
    pub base_delay: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            idle_timeout: Duration::from_secs(60),
            base_delay: Duration::from_millis(500),
        }
    }
}

impl DownloadConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: std::env::var("DOWNLOAD_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            idle_timeout: std::env::var("DOWNLOAD_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            base_delay: defaults.base_delay,
        }
    }
}

/// Encoding and invocation parameters for the media stages.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub tools: ToolPaths,
    /// Maximum duration kept from the start of each track
    pub trim_seconds: u32,
    /// Sample rate of trimmed and transcoded audio
    pub sample_rate: u32,
    /// MP3 bitrate of trimmed and mixed audio
    pub bitrate: String,
    /// Separation model passed to the separator
    pub separator_model: String,
    /// Wall-clock ceiling for a single tool invocation
    pub tool_timeout: Duration,
    pub download: DownloadConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            trim_seconds: 60,
            sample_rate: 44_100,
            bitrate: "192k".to_string(),
            separator_model: "spleeter:2stems".to_string(),
            tool_timeout: Duration::from_secs(900),
            download: DownloadConfig::default(),
        }
    }
}

impl MediaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let separator = std::env::var("SEPARATOR_CMD")
            .ok()
            .map(|cmd| cmd.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty())
            .unwrap_or(defaults.tools.separator);

        Self {
            tools: ToolPaths {
                ffmpeg: std::env::var("FFMPEG_BIN").unwrap_or(defaults.tools.ffmpeg),
                ffprobe: std::env::var("FFPROBE_BIN").unwrap_or(defaults.tools.ffprobe),
                separator,
            },
            trim_seconds: std::env::var("MEDIA_TRIM_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.trim_seconds),
            sample_rate: std::env::var("MEDIA_SAMPLE_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.sample_rate),
            bitrate: std::env::var("MEDIA_BITRATE").unwrap_or(defaults.bitrate),
            separator_model: std::env::var("SEPARATOR_MODEL").unwrap_or(defaults.separator_model),
            tool_timeout: Duration::from_secs(
                std::env::var("MEDIA_TOOL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
            download: DownloadConfig::from_env(),
        }
    }
}
