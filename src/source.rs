//! Resolving a video reference to a local, decodable file

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::common::{ExtractError, Result};

/// Container format requested from the downloader, capped at 1080p
pub const DOWNLOAD_FORMAT: &str = "bestvideo[height<=1080]+bestaudio/best[height<=1080]/best";

/// Name of the downloaded file inside the job's working directory
pub const VIDEO_FILE_NAME: &str = "video.mp4";

/// Metadata describing a source video, serialized as the manifest's
/// `video_info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMeta {
    pub title: String,
    /// Whole seconds; 0 when the source does not report a duration
    pub duration: u64,
    pub channel: String,
    pub video_id: String,
}

/// A fetched video: metadata plus the local file to decode
#[derive(Debug, Clone)]
pub struct SourceVideo {
    pub meta: VideoMeta,
    pub path: PathBuf,
}

/// Resolves references to local video files
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Look up metadata without downloading anything
    async fn probe(&self, reference: &str) -> Result<VideoMeta>;

    /// Download the video into `dest_dir`, enforcing the duration ceiling
    /// before any bytes are transferred
    async fn fetch(&self, reference: &str, dest_dir: &Path, cancel: &CancellationToken) -> Result<SourceVideo>;
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(https?://)?(www\.)?(youtube\.com/watch\?v=|youtu\.be/|youtube\.com/shorts/)[\w-]+")
            .expect("reference pattern is valid")
    })
}

/// Reject references that are not recognizable video URLs
pub fn validate_reference(reference: &str) -> Result<()> {
    if reference_pattern().is_match(reference.trim()) {
        Ok(())
    } else {
        Err(ExtractError::InvalidReference {
            reference: reference.to_string(),
        })
    }
}

/// Enforce the duration ceiling; an unknown (zero) duration is let through
pub fn check_duration(meta: &VideoMeta, limit: u64) -> Result<()> {
    if meta.duration > limit {
        return Err(ExtractError::DurationExceeded {
            duration: meta.duration,
            limit,
        });
    }
    Ok(())
}

/// Subset of `yt-dlp --dump-single-json` output we care about
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    #[serde(default)]
    id: String,
    title: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    uploader: Option<String>,
}

impl From<YtDlpInfo> for VideoMeta {
    fn from(info: YtDlpInfo) -> Self {
        Self {
            title: info.title.unwrap_or_else(|| "Unknown".to_string()),
            duration: info.duration.map(|d| d.max(0.0).ceil() as u64).unwrap_or(0),
            channel: info
                .channel
                .or(info.uploader)
                .unwrap_or_else(|| "Unknown".to_string()),
            video_id: info.id,
        }
    }
}

/// [`VideoSource`] backed by the `yt-dlp` command line tool
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    binary: PathBuf,
    max_duration: u64,
    cookie_file: Option<PathBuf>,
}

impl YtDlpSource {
    pub fn new(binary: impl Into<PathBuf>, max_duration: u64) -> Self {
        Self {
            binary: binary.into(),
            max_duration,
            cookie_file: None,
        }
    }

    pub fn with_cookie_file(mut self, cookie_file: Option<PathBuf>) -> Self {
        self.cookie_file = cookie_file;
        self
    }

    pub fn max_duration(&self) -> u64 {
        self.max_duration
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--quiet", "--no-warnings", "--no-playlist"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cookie_file) = &self.cookie_file {
            cmd.arg("--cookies").arg(cookie_file);
        }
        cmd
    }

    /// Run `cmd` to completion, killing it if `cancel` fires first
    async fn run(&self, mut cmd: Command, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let child = cmd.spawn().map_err(|e| ExtractError::SourceUnavailable {
            message: format!("failed to start {}: {}", self.binary.display(), e),
        })?;

        // Dropping the pending future drops the child, which kills it
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::SourceUnavailable {
                message: format!(
                    "{} exited with {:?}: {}",
                    self.binary.display(),
                    output.status.code(),
                    stderr.trim()
                ),
            });
        }
        Ok(output.stdout)
    }

    async fn probe_with_cancel(&self, reference: &str, cancel: &CancellationToken) -> Result<VideoMeta> {
        validate_reference(reference)?;

        let mut cmd = self.command();
        cmd.args(["--dump-single-json", "--skip-download", "--", reference]);
        let stdout = self.run(cmd, cancel).await?;

        let info: YtDlpInfo = serde_json::from_slice(&stdout).map_err(|e| ExtractError::SourceUnavailable {
            message: format!("unreadable metadata: {}", e),
        })?;
        Ok(info.into())
    }
}

#[async_trait]
impl VideoSource for YtDlpSource {
    #[instrument(skip(self))]
    async fn probe(&self, reference: &str) -> Result<VideoMeta> {
        let meta = self.probe_with_cancel(reference, &CancellationToken::new()).await?;
        debug!("Probed {} ({}s): {}", meta.video_id, meta.duration, meta.title);
        Ok(meta)
    }

    #[instrument(skip(self, dest_dir, cancel), fields(dest_dir = %dest_dir.display()))]
    async fn fetch(&self, reference: &str, dest_dir: &Path, cancel: &CancellationToken) -> Result<SourceVideo> {
        let meta = self.probe_with_cancel(reference, cancel).await?;
        check_duration(&meta, self.max_duration)?;

        let path = dest_dir.join(VIDEO_FILE_NAME);
        info!("Downloading {} ({}s) to {}", meta.video_id, meta.duration, path.display());

        let mut cmd = self.command();
        cmd.args(["--format", DOWNLOAD_FORMAT, "--merge-output-format", "mp4", "--output"])
            .arg(&path)
            .args(["--", reference]);
        self.run(cmd, cancel).await?;

        if !tokio::fs::try_exists(&path).await? {
            warn!("Downloader reported success but {} is missing", path.display());
            return Err(ExtractError::SourceUnavailable {
                message: format!("download produced no file at {}", path.display()),
            });
        }

        Ok(SourceVideo { meta, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_validate_reference_accepts_known_forms() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "http://youtube.com/watch?v=abc_DEF-123",
            "youtube.com/watch?v=abc",
            "https://youtu.be/dQw4w9WgXcQ",
            "www.youtube.com/shorts/xyz987",
        ] {
            assert!(validate_reference(url).is_ok(), "{url} should be accepted");
        }
    }

    #[test]
    fn test_validate_reference_rejects_others() {
        for url in [
            "",
            "not a url",
            "https://vimeo.com/12345",
            "https://www.youtube.com/watch?v=",
            "https://www.youtube.com/channel/UC123",
            "ftp://youtu.be/abc",
        ] {
            assert_matches!(
                validate_reference(url),
                Err(ExtractError::InvalidReference { .. }),
                "{url} should be rejected"
            );
        }
    }

    fn meta(duration: u64) -> VideoMeta {
        VideoMeta {
            title: "t".into(),
            duration,
            channel: "c".into(),
            video_id: "id".into(),
        }
    }

    #[test]
    fn test_check_duration() {
        assert!(check_duration(&meta(600), 600).is_ok());
        assert!(check_duration(&meta(0), 600).is_ok());
        assert_matches!(
            check_duration(&meta(601), 600),
            Err(ExtractError::DurationExceeded { duration: 601, limit: 600 })
        );
    }

    #[test]
    fn test_metadata_parsing_falls_back_to_uploader() {
        let info: YtDlpInfo = serde_json::from_str(
            r#"{"id": "abc", "title": "Song", "duration": 212.4, "uploader": "Band", "formats": []}"#,
        )
        .unwrap();
        let meta = VideoMeta::from(info);
        assert_eq!(meta.video_id, "abc");
        assert_eq!(meta.title, "Song");
        assert_eq!(meta.duration, 213);
        assert_eq!(meta.channel, "Band");
    }

    #[test]
    fn test_metadata_parsing_defaults() {
        let info: YtDlpInfo = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        let meta = VideoMeta::from(info);
        assert_eq!(meta.title, "Unknown");
        assert_eq!(meta.channel, "Unknown");
        assert_eq!(meta.duration, 0);
    }

    #[tokio::test]
    async fn test_probe_rejects_invalid_reference_without_spawning() {
        let source = YtDlpSource::new("/nonexistent/yt-dlp", 600);
        let result = source.probe("https://example.com/video").await;
        assert_matches!(result, Err(ExtractError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_source_unavailable() {
        let source = YtDlpSource::new("/nonexistent/yt-dlp", 600);
        let result = source.probe("https://youtu.be/abc").await;
        assert_matches!(result, Err(ExtractError::SourceUnavailable { .. }));
    }
}
