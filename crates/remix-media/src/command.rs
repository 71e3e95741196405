//! External tool command builders and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Lines of stderr kept as diagnostic text.
const STDERR_TAIL_LINES: usize = 40;

/// Builder for FFmpeg commands with one or more inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input files, in `-i` order
    inputs: Vec<PathBuf>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after the inputs)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input file.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Limit output duration.
    pub fn duration(self, seconds: u32) -> Self {
        self.output_arg("-t").output_arg(seconds.to_string())
    }

    /// Drop any video stream.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-acodec").output_arg(codec)
    }

    /// Set audio sample rate.
    pub fn sample_rate(self, rate: u32) -> Self {
        self.output_arg("-ar").output_arg(rate.to_string())
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Convert into a runnable invocation of `ffmpeg_bin`.
    pub fn into_tool(self, ffmpeg_bin: &str) -> ToolCommand {
        ToolCommand::new(ffmpeg_bin).label("ffmpeg").args(self.build_args())
    }
}

/// A single external process invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    label: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            label: program.clone(),
            program,
            args: Vec::new(),
        }
    }

    /// Name used in logs and error messages.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn tool_label(&self) -> &str {
        &self.label
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    /// Last lines written to stderr
    pub stderr_tail: String,
}

/// Runs external tools to completion with a wall-clock ceiling.
#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    timeout: Option<Duration>,
}

impl ToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run a command, killing it if the timeout elapses.
    pub async fn run(&self, cmd: &ToolCommand) -> MediaResult<ToolOutput> {
        let program = check_tool(&cmd.program)?;
        debug!("Running {}: {} {}", cmd.label, cmd.program, cmd.args.join(" "));

        let mut child = Command::new(&program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&cmd.label, &cmd.program, e))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                // Drain to EOF: closing the pipe early would SIGPIPE the tool.
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    let line = String::from_utf8_lossy(&buf);
                    tail.push_back(line.trim_end_matches(&['\n', '\r'][..]).to_string());
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let stdout_task = child.stdout.take().map(|mut stdout| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stdout.read_to_end(&mut buf).await;
                buf
            })
        });

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        "{} timed out after {} seconds, killing process",
                        cmd.label,
                        limit.as_secs()
                    );
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout {
                        tool: cmd.label.clone(),
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await?,
        };

        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            return Err(MediaError::tool_failed(
                cmd.label.clone(),
                Some(stderr_tail),
                status.code(),
            ));
        }

        Ok(ToolOutput { stdout, stderr_tail })
    }
}

/// A tool that cannot be started is a tool failure, not an internal one.
fn spawn_error(label: &str, program: &str, err: std::io::Error) -> MediaError {
    match err.kind() {
        std::io::ErrorKind::NotFound => MediaError::ToolNotFound(program.to_string()),
        _ => MediaError::tool_failed(label, Some(format!("could not start {}: {}", program, err)), None),
    }
}

/// Resolve a tool by name or path.
pub fn check_tool(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::ToolNotFound(program.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_orders_inputs() {
        let cmd = FfmpegCommand::new("out.mp3")
            .input("a.wav")
            .input("b.wav")
            .filter_complex("amix=inputs=2")
            .audio_codec("libmp3lame");

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        let first = args.iter().position(|a| a == "a.wav").unwrap();
        let second = args.iter().position(|a| a == "b.wav").unwrap();
        let filter = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert!(first < second && second < filter);
        assert_eq!(args.last().unwrap(), "out.mp3");
    }

    #[test]
    fn test_into_tool_keeps_label() {
        let tool = FfmpegCommand::new("o.wav").input("i.mp3").into_tool("/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(tool.tool_label(), "ffmpeg");
        assert!(tool.get_args().contains(&"i.mp3".to_string()));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let err = ToolRunner::new()
            .run(&ToolCommand::new("definitely-not-a-real-tool-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_keeps_stderr() {
        let cmd = ToolCommand::new("sh").args(["-c", "echo 'bad input' >&2; exit 3"]);
        let err = ToolRunner::new().run(&cmd).await.unwrap_err();
        match err {
            MediaError::ToolFailed { stderr, exit_code, .. } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.unwrap().contains("bad input"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_stderr_is_drained() {
        let cmd = ToolCommand::new("sh").args([
            "-c",
            "printf '\\377\\n' >&2; sleep 0.3; echo 'still working' >&2; exit 0",
        ]);
        let out = ToolRunner::new()
            .with_timeout(Duration::from_secs(3))
            .run(&cmd)
            .await
            .unwrap();
        assert!(out.stderr_tail.contains("still working"));
        assert!(out.stderr_tail.starts_with('\u{FFFD}'));
    }

    #[test]
    fn test_spawn_errors_are_tool_errors() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            spawn_error("separator", "/opt/spleeter", denied),
            MediaError::ToolFailed { ref tool, exit_code: None, .. } if tool == "separator"
        ));

        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            spawn_error("ffmpeg", "ffmpeg", missing),
            MediaError::ToolNotFound(_)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let cmd = ToolCommand::new("sh").args(["-c", "sleep 10"]).label("sleeper");
        let started = std::time::Instant::now();
        let err = ToolRunner::new()
            .with_timeout(Duration::from_millis(200))
            .run(&cmd)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Timeout { ref tool, .. } if tool == "sleeper"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_captured() {
        let cmd = ToolCommand::new("sh").args(["-c", "printf hello"]);
        let out = ToolRunner::new().run(&cmd).await.unwrap();
        assert_eq!(out.stdout, b"hello");
    }
}
