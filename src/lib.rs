//! Scene-based frame extraction for online videos
//!
//! This crate turns a video into a small, ordered set of representative
//! stills: it splits the video into scenes with a PySceneDetect-style
//! content detector, keeps the longest scenes up to a frame budget, decodes
//! one frame at each kept scene's midpoint and publishes the images together
//! with a JSON manifest.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use scene_frames::{detect_scenes, select_scenes, SceneSegmenter, Settings};
//!
//! let settings = Settings::default();
//! let segmenter = SceneSegmenter::new(30.0, 15)?;
//! let scenes = detect_scenes(&settings, "video.mp4", &segmenter)?;
//! for scene in select_scenes(scenes, 20) {
//!     println!("Scene {}: {:.2}s - {:.2}s", scene.index, scene.start_time, scene.end_time);
//! }
//! # Ok::<(), scene_frames::ExtractError>(())
//! ```
//!
//! Whole jobs go through [`JobPipeline`], which downloads the source,
//! tracks job state and writes to an [`ArtifactStore`].

mod common;
mod config;
mod content_detector;
mod ffmpeg;
mod flash_filter;
mod job;
mod manifest;
mod pipeline;
mod sampler;
mod segmenter;
mod selector;
mod source;
pub mod store;
mod video_stream;

// Re-export main types for public API
pub use common::{ExtractError, ExtractedFrame, FrameTimecode, Result, Scene};
pub use config::{LogFormat, Settings};
pub use content_detector::{auto_downscale_factor, ComponentWeights, ContentDetector, DEFAULT_MIN_SCENE_LENGTH};
pub use ffmpeg::{FfmpegBackend, FfmpegStream};
pub use flash_filter::FlashFilter;
pub use job::{ExtractRequest, InMemoryJobStore, Job, JobStatus, JobStore};
pub use manifest::{FrameInfo, Manifest};
pub use pipeline::{JobPipeline, PipelineConfig, WorkerTask};
pub use sampler::{frame_file_name, sample_frames};
pub use segmenter::SceneSegmenter;
pub use selector::select as select_scenes;
pub use source::{validate_reference, SourceVideo, VideoMeta, VideoSource, YtDlpSource};
pub use store::{ArtifactStore, LocalStore, Locator};
pub use video_stream::{Frame, FrameDecoder, MemoryStream, VideoBackend};
#[cfg(feature = "opencv")]
pub use video_stream::{OpenCvBackend, VideoStream};

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Pick the decoder backend this build was compiled with
///
/// OpenCV when the `opencv` feature is on, the `ffmpeg` binaries named in
/// `settings` otherwise.
pub fn video_backend(settings: &Settings) -> Arc<dyn VideoBackend> {
    #[cfg(feature = "opencv")]
    {
        let _ = settings;
        Arc::new(OpenCvBackend)
    }
    #[cfg(not(feature = "opencv"))]
    {
        Arc::new(FfmpegBackend::new(&settings.ffmpeg_bin, &settings.ffprobe_bin))
    }
}

/// Split a local video file into scenes
///
/// # Errors
/// * `VideoNotFound` - If the video file doesn't exist
/// * `VideoOpenFailed` - If the backend can't open the video
#[tracing::instrument(skip(settings, segmenter))]
pub fn detect_scenes(
    settings: &Settings,
    video_path: impl AsRef<Path> + std::fmt::Debug,
    segmenter: &SceneSegmenter,
) -> Result<Vec<Scene>> {
    let mut decoder = video_backend(settings).open(video_path.as_ref())?;
    segmenter.detect(decoder.as_mut(), &CancellationToken::new())
}

/// Get video information without performing scene detection
#[tracing::instrument(skip(settings))]
pub fn get_video_info(settings: &Settings, video_path: impl AsRef<Path> + std::fmt::Debug) -> Result<VideoInfo> {
    let path = video_path.as_ref();
    let decoder = video_backend(settings).open(path)?;
    Ok(VideoInfo::from_decoder(path.display().to_string(), decoder.as_ref()))
}

/// Video metadata information
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: String,
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

impl VideoInfo {
    pub fn from_decoder(path: impl Into<String>, decoder: &dyn FrameDecoder) -> Self {
        Self {
            path: path.into(),
            fps: decoder.fps(),
            frame_count: decoder.frame_count(),
            width: decoder.width(),
            height: decoder.height(),
            duration_seconds: decoder.duration_seconds(),
        }
    }

    /// Get a human-readable description of the video
    pub fn description(&self) -> String {
        format!(
            "{}x{} at {:.2}fps, {} frames ({:.1}s duration)",
            self.width, self.height, self.fps, self.frame_count, self.duration_seconds
        )
    }

    /// Check if this appears to be a valid video configuration
    pub fn is_valid(&self) -> bool {
        self.fps > 0.0
            && self.frame_count > 0
            && self.width > 0
            && self.height > 0
            && self.duration_seconds > 0.0
    }
}

/// Initialize tracing
///
/// Call this once at the start of your application. `RUST_LOG` overrides
/// `level` when set.
///
/// # Arguments
/// * `level` - Tracing level filter (e.g., "debug", "info", "warn", "error")
/// * `format` - Human-readable lines or one JSON object per event
pub fn init_tracing(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
    }

    info!("Tracing initialized at level {} ({:?})", level, format);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_info_from_decoder() {
        let frames = vec![Frame::solid(64, 36, [0, 0, 0]); 100];
        let stream = MemoryStream::new(frames, 25.0).unwrap();

        let info = VideoInfo::from_decoder("clip.mp4", &stream);

        assert!(info.is_valid());
        assert_eq!(info.frame_count, 100);
        assert_eq!(info.duration_seconds, 4.0);
        assert!(info.description().contains("64x36"));
        assert!(info.description().contains("25.00fps"));
        assert!(info.description().contains("100 frames"));
    }

    #[test]
    fn test_video_info_validation() {
        let valid_info = VideoInfo {
            path: "test.mp4".to_string(),
            fps: 30.0,
            frame_count: 100,
            width: 640,
            height: 480,
            duration_seconds: 3.33,
        };
        assert!(valid_info.is_valid());

        let invalid_fps = VideoInfo { fps: 0.0, ..valid_info.clone() };
        assert!(!invalid_fps.is_valid());

        let invalid_frames = VideoInfo { frame_count: 0, ..valid_info.clone() };
        assert!(!invalid_frames.is_valid());

        let invalid_width = VideoInfo { width: 0, ..valid_info.clone() };
        assert!(!invalid_width.is_valid());

        let invalid_duration = VideoInfo { duration_seconds: 0.0, ..valid_info };
        assert!(!invalid_duration.is_valid());
    }

    #[test]
    fn test_detect_scenes_missing_file() {
        let segmenter = SceneSegmenter::new(30.0, 15).unwrap();
        let result = detect_scenes(&Settings::default(), "definitely_missing.mp4", &segmenter);
        assert!(matches!(result, Err(ExtractError::VideoNotFound { .. })));
    }

    #[test]
    fn test_detect_scenes_missing_file_with_luma_weights() {
        let segmenter = SceneSegmenter::new(30.0, 15)
            .unwrap()
            .with_weights(ComponentWeights::luma_only())
            .unwrap()
            .with_downscale(2);
        let result = detect_scenes(&Settings::default(), "definitely_missing.mp4", &segmenter);
        assert!(matches!(result, Err(ExtractError::VideoNotFound { .. })));
    }
}
