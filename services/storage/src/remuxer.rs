use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Suffix appended to the input path to name the remuxed output
pub const REMUX_SUFFIX: &str = ".processing";

/// Only the tail of ffmpeg's stderr is kept in errors
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Error, Debug)]
pub enum RemuxError {
    #[error("ffmpeg remux failed for {path}: {message}")]
    RemuxFailure { path: PathBuf, message: String },
}

/// Sibling path the remuxed output is written to
pub fn remux_output_path(input: &Path) -> PathBuf {
    let mut name = OsString::from(input.as_os_str());
    name.push(REMUX_SUFFIX);
    PathBuf::from(name)
}

/// Fast-start remux: streams are copied and the index moved to the front
#[async_trait]
pub trait Remuxer: Send + Sync {
    /// Rewrite `input` for progressive playback, returning the new file's path
    async fn remux(&self, input: &Path) -> Result<PathBuf, RemuxError>;

    /// Where [`Remuxer::remux`] writes its output for `input`
    fn output_path(&self, input: &Path) -> PathBuf {
        remux_output_path(input)
    }
}

/// [`Remuxer`] backed by the `ffmpeg` binary
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    ffmpeg_path: String,
}

impl FfmpegRemuxer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    #[instrument(skip(self), fields(input = %input.display()))]
    async fn remux(&self, input: &Path) -> Result<PathBuf, RemuxError> {
        let output_path = self.output_path(input);
        let failure = |message: String| RemuxError::RemuxFailure {
            path: input.to_path_buf(),
            message,
        };

        let output = Command::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(input)
            .arg("-c")
            .arg("copy")
            .arg("-movflags")
            .arg("faststart")
            .arg("-f")
            .arg("mp4")
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| failure(format!("failed to execute {}: {}", self.ffmpeg_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail_start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
            let tail = stderr
                .get(tail_start..)
                .unwrap_or(stderr.as_ref())
                .trim();
            return Err(failure(format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                tail
            )));
        }

        debug!(output = %output_path.display(), "Remuxed video for fast start");

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_appends_suffix() {
        let input = Path::new("/tmp/tubely-upload.abc123.mp4");
        assert_eq!(
            remux_output_path(input),
            PathBuf::from("/tmp/tubely-upload.abc123.mp4.processing")
        );
    }

    #[test]
    fn test_trait_default_output_path() {
        let remuxer = FfmpegRemuxer::new("ffmpeg");
        let input = Path::new("video.mp4");
        assert_eq!(remuxer.output_path(input), remux_output_path(input));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remux_success_returns_output_path() {
        let remuxer = FfmpegRemuxer::new("true");
        let input = Path::new("/tmp/video.mp4");
        let output = remuxer.remux(input).await.unwrap();
        assert_eq!(output, PathBuf::from("/tmp/video.mp4.processing"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remux_non_zero_exit() {
        let remuxer = FfmpegRemuxer::new("false");
        let err = remuxer.remux(Path::new("/tmp/video.mp4")).await.unwrap_err();
        assert!(matches!(err, RemuxError::RemuxFailure { .. }));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[tokio::test]
    async fn test_remux_missing_binary() {
        let remuxer = FfmpegRemuxer::new("/nonexistent/ffmpeg");
        let err = remuxer.remux(Path::new("video.mp4")).await.unwrap_err();
        assert!(matches!(err, RemuxError::RemuxFailure { .. }));
    }
}
