use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// 16:9 in hundredths, rounded
const LANDSCAPE_HUNDREDTHS: i64 = 178;
/// 9:16 in hundredths, rounded
const PORTRAIT_HUNDREDTHS: i64 = 56;

/// Errors raised while probing a media file
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("ffprobe failed for {path}: {message}")]
    ProbeFailure { path: PathBuf, message: String },

    #[error("Failed to parse ffprobe output for {path}: {message}")]
    ParseFailure { path: PathBuf, message: String },
}

/// Coarse aspect-ratio bucket used to partition stored objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Landscape,
    Portrait,
    Other,
}

impl Orientation {
    /// Classify stream dimensions by their rounded aspect ratio.
    /// Only an exact match counts; 1.77 and 1.79 are `Other`.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if height == 0 {
            return Orientation::Other;
        }

        let hundredths = (width as f64 / height as f64 * 100.0).round() as i64;
        match hundredths {
            LANDSCAPE_HUNDREDTHS => Orientation::Landscape,
            PORTRAIT_HUNDREDTHS => Orientation::Portrait,
            _ => Orientation::Other,
        }
    }

    /// Key prefix for objects of this orientation
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
            Orientation::Other => "other",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream-level subset of the ffprobe JSON document
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeOutput {
    pub streams: Vec<ProbeStream>,
}

/// A single stream entry; audio and data streams carry no dimensions
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeStream {
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl ProbeOutput {
    /// Decode ffprobe stdout and classify its first stream
    pub fn classify(stdout: &[u8], path: &Path) -> Result<Orientation, InspectError> {
        let parse_failure = |message: String| InspectError::ParseFailure {
            path: path.to_path_buf(),
            message,
        };

        let output: ProbeOutput =
            serde_json::from_slice(stdout).map_err(|e| parse_failure(e.to_string()))?;

        let first = output
            .streams
            .first()
            .ok_or_else(|| parse_failure("no streams reported".to_string()))?;

        match (first.width, first.height) {
            (Some(width), Some(height)) => Ok(Orientation::from_dimensions(width, height)),
            _ => Err(parse_failure(format!(
                "first stream ({}) has no width/height",
                first.codec_type.as_deref().unwrap_or("unknown")
            ))),
        }
    }
}

/// Classifies a local media file by orientation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaInspector: Send + Sync {
    async fn classify(&self, path: &Path) -> Result<Orientation, InspectError>;
}

/// [`MediaInspector`] backed by the `ffprobe` binary
#[derive(Debug, Clone)]
pub struct FfprobeInspector {
    ffprobe_path: String,
}

impl FfprobeInspector {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait]
impl MediaInspector for FfprobeInspector {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn classify(&self, path: &Path) -> Result<Orientation, InspectError> {
        let probe_failure = |message: String| InspectError::ProbeFailure {
            path: path.to_path_buf(),
            message,
        };

        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| probe_failure(format!("failed to execute {}: {}", self.ffprobe_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(probe_failure(format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(probe_failure("no output".to_string()));
        }

        let orientation = ProbeOutput::classify(&output.stdout, path)?;
        debug!(orientation = %orientation, "Classified video orientation");

        Ok(orientation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_common_dimensions() {
        assert_eq!(Orientation::from_dimensions(1920, 1080), Orientation::Landscape);
        assert_eq!(Orientation::from_dimensions(1280, 720), Orientation::Landscape);
        assert_eq!(Orientation::from_dimensions(1080, 1920), Orientation::Portrait);
        assert_eq!(Orientation::from_dimensions(720, 1280), Orientation::Portrait);
        assert_eq!(Orientation::from_dimensions(1000, 1000), Orientation::Other);
        assert_eq!(Orientation::from_dimensions(640, 480), Orientation::Other);
    }

    #[test]
    fn test_near_misses_are_other() {
        // 1.77
        assert_eq!(Orientation::from_dimensions(177, 100), Orientation::Other);
        // 1.79
        assert_eq!(Orientation::from_dimensions(179, 100), Orientation::Other);
        // 0.55 and 0.57
        assert_eq!(Orientation::from_dimensions(55, 100), Orientation::Other);
        assert_eq!(Orientation::from_dimensions(57, 100), Orientation::Other);
    }

    #[test]
    fn test_rounding_boundaries() {
        assert_eq!(Orientation::from_dimensions(17749, 10000), Orientation::Other);
        assert_eq!(Orientation::from_dimensions(17751, 10000), Orientation::Landscape);
        assert_eq!(Orientation::from_dimensions(17849, 10000), Orientation::Landscape);
        assert_eq!(Orientation::from_dimensions(17851, 10000), Orientation::Other);
    }

    #[test]
    fn test_zero_height_is_other() {
        assert_eq!(Orientation::from_dimensions(1920, 0), Orientation::Other);
    }

    #[test]
    fn test_orientation_prefixes() {
        assert_eq!(Orientation::Landscape.as_str(), "landscape");
        assert_eq!(Orientation::Portrait.as_str(), "portrait");
        assert_eq!(Orientation::Other.to_string(), "other");
    }

    #[test]
    fn test_parse_probe_output_uses_first_stream() {
        let json = br#"{
            "streams": [
                {"index": 0, "codec_type": "video", "width": 1080, "height": 1920},
                {"index": 1, "codec_type": "video", "width": 1920, "height": 1080}
            ]
        }"#;

        let orientation = ProbeOutput::classify(json, Path::new("in.mp4")).unwrap();
        assert_eq!(orientation, Orientation::Portrait);
    }

    #[test]
    fn test_parse_probe_output_empty_streams() {
        let err = ProbeOutput::classify(br#"{"streams": []}"#, Path::new("in.mp4")).unwrap_err();
        assert!(matches!(err, InspectError::ParseFailure { .. }));
    }

    #[test]
    fn test_parse_probe_output_audio_first() {
        let json = br#"{"streams": [{"codec_type": "audio", "sample_rate": "48000"}]}"#;
        let err = ProbeOutput::classify(json, Path::new("in.mp4")).unwrap_err();
        assert!(matches!(err, InspectError::ParseFailure { .. }));
        assert!(err.to_string().contains("audio"));
    }

    #[test]
    fn test_parse_probe_output_not_json() {
        let err = ProbeOutput::classify(b"not json", Path::new("in.mp4")).unwrap_err();
        assert!(matches!(err, InspectError::ParseFailure { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_non_zero_exit() {
        let inspector = FfprobeInspector::new("false");
        let err = inspector.classify(Path::new("in.mp4")).await.unwrap_err();
        assert!(matches!(err, InspectError::ProbeFailure { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_without_output() {
        let inspector = FfprobeInspector::new("true");
        let err = inspector.classify(Path::new("in.mp4")).await.unwrap_err();
        assert!(matches!(err, InspectError::ProbeFailure { .. }));
        assert!(err.to_string().contains("no output"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_unparseable_output() {
        // echo prints the probe arguments, which are not JSON
        let inspector = FfprobeInspector::new("echo");
        let err = inspector.classify(Path::new("in.mp4")).await.unwrap_err();
        assert!(matches!(err, InspectError::ParseFailure { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let inspector = FfprobeInspector::new("/nonexistent/ffprobe");
        let err = inspector.classify(Path::new("in.mp4")).await.unwrap_err();
        assert!(matches!(err, InspectError::ProbeFailure { .. }));
    }
}
