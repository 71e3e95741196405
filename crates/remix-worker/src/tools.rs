//! Stage executor seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use remix_media::{
    check_tool, merge, probe_duration, separate, transcode, trim, Downloader, MediaConfig,
    MediaResult, SeparatedStems,
};

/// The external-tool-backed operations a pipeline needs.
#[async_trait]
pub trait StageTools: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> MediaResult<u64>;

    async fn trim(&self, input: &Path, output: &Path) -> MediaResult<()>;

    async fn transcode(&self, input: &Path, output: &Path) -> MediaResult<()>;

    async fn separate(&self, input: &Path, output_dir: &Path) -> MediaResult<SeparatedStems>;

    async fn merge(&self, accompaniment: &Path, vocals: &Path, output: &Path) -> MediaResult<()>;

    async fn probe_duration(&self, path: &Path) -> MediaResult<f64>;
}

/// FFmpeg, ffprobe and separator backed stages.
#[derive(Debug, Clone)]
pub struct MediaToolkit {
    config: MediaConfig,
    downloader: Downloader,
}

impl MediaToolkit {
    pub fn new(config: MediaConfig) -> MediaResult<Self> {
        let downloader = Downloader::new(config.download.clone())?;
        Ok(Self { config, downloader })
    }

    pub fn from_env() -> MediaResult<Self> {
        Self::new(MediaConfig::from_env())
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Resolve every configured binary on `PATH`.
    pub fn check_tools(&self) -> MediaResult<Vec<PathBuf>> {
        let separator = self
            .config
            .tools
            .separator
            .first()
            .map(String::as_str)
            .unwrap_or("spleeter");

        [
            self.config.tools.ffmpeg.as_str(),
            self.config.tools.ffprobe.as_str(),
            separator,
        ]
        .into_iter()
        .map(check_tool)
        .collect()
    }
}

#[async_trait]
impl StageTools for MediaToolkit {
    async fn download(&self, url: &str, dest: &Path) -> MediaResult<u64> {
        self.downloader.download(url, dest).await
    }

    async fn trim(&self, input: &Path, output: &Path) -> MediaResult<()> {
        trim(&self.config, input, output).await
    }

    async fn transcode(&self, input: &Path, output: &Path) -> MediaResult<()> {
        transcode(&self.config, input, output).await
    }

    async fn separate(&self, input: &Path, output_dir: &Path) -> MediaResult<SeparatedStems> {
        separate(&self.config, input, output_dir).await
    }

    async fn merge(&self, accompaniment: &Path, vocals: &Path, output: &Path) -> MediaResult<()> {
        merge(&self.config, accompaniment, vocals, output).await
    }

    async fn probe_duration(&self, path: &Path) -> MediaResult<f64> {
        probe_duration(&self.config, path).await
    }
}
