//! Common types, utilities, and error handling for the frame extraction pipeline.
//!
//! This module provides the foundational types used throughout the codebase,
//! including frame timecodes, scene intervals, sampled frames, and the
//! crate-wide error type.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Represents a specific point in time within a video
///
/// This type encapsulates both the frame number and framerate information,
/// allowing for precise temporal calculations and conversions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTimecode {
    frame_number: u64,
    fps: f64,
}

impl FrameTimecode {
    /// Create a new FrameTimecode
    ///
    /// # Arguments
    /// * `frame_number` - The frame number (0-indexed)
    /// * `fps` - Frames per second of the video
    ///
    /// # Panics
    /// Panics if fps is not positive (fail-fast approach)
    pub fn new(frame_number: u64, fps: f64) -> Self {
        assert!(fps > 0.0, "FPS must be positive, got: {}", fps);
        Self { frame_number, fps }
    }

    /// Build the timecode of the frame nearest to `seconds` (rounded down)
    pub fn from_seconds(seconds: f64, fps: f64) -> Self {
        let frame_number = (seconds.max(0.0) * fps).floor() as u64;
        Self::new(frame_number, fps)
    }

    /// Get the frame number
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Get the framerate
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Convert to seconds since start of video
    pub fn seconds(&self) -> f64 {
        self.frame_number as f64 / self.fps
    }
}

/// A contiguous interval of visually coherent content.
///
/// `index` is dense and zero-based within the list it belongs to and is
/// reassigned whenever a subset of scenes is reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
}

impl Scene {
    pub fn new(index: usize, start_time: f64, end_time: f64) -> Self {
        debug_assert!(end_time > start_time, "scene must have positive duration");
        Self {
            index,
            start_time,
            end_time,
        }
    }

    /// Build a scene from a half-open frame range `[start, end)`
    pub fn from_timecodes(index: usize, start: FrameTimecode, end: FrameTimecode) -> Self {
        Self::new(index, start.seconds(), end.seconds())
    }

    /// Temporal center of the scene, the instant that gets sampled
    pub fn mid_time(&self) -> f64 {
        (self.start_time + self.end_time) / 2.0
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// A still image decoded at a scene midpoint and written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFrame {
    /// Copied from the originating scene's index
    pub index: usize,
    /// The scene's midpoint in seconds
    pub timestamp: f64,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// All possible errors from the extraction system
///
/// Covers every failure mode of the pipeline, from rejected input through
/// decoding problems to storage failures.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Invalid video reference: {reference}")]
    InvalidReference { reference: String },

    #[error("Video duration ({duration}s) exceeds limit ({limit}s)")]
    DurationExceeded { duration: u64, limit: u64 },

    #[error("Video source unavailable: {message}")]
    SourceUnavailable { message: String },

    #[error("Video file not found: {path}")]
    VideoNotFound { path: String },

    #[error("Failed to open video file: {path}")]
    VideoOpenFailed { path: String },

    #[error("Invalid video format or corrupted file: {path}")]
    InvalidVideoFormat { path: String },

    #[error("Frame processing failed at frame {frame}: {reason}")]
    FrameProcessingFailed { frame: u64, reason: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("No scenes detected in video")]
    NoScenesDetected,

    #[error("Storage failure: {message}")]
    Storage { message: String },

    #[error("No manifest stored for job {job_id}")]
    ManifestNotFound { job_id: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Job already exists: {job_id}")]
    DuplicateJob { job_id: String },

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Processing exceeded the {0:?} time limit")]
    TimedOut(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl ExtractError {
    /// Create an input validation error with a descriptive message
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a configuration error with a descriptive message
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a frame processing error
    pub fn frame_error(frame: u64, reason: impl Into<String>) -> Self {
        Self::FrameProcessingFailed {
            frame,
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an internal error (for unexpected conditions)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Errors that are rejected at submission and never create a job
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. }
                | Self::InvalidReference { .. }
                | Self::DurationExceeded { .. }
        )
    }

    /// True for failures to open or read the video itself
    pub fn is_decode_error(&self) -> bool {
        match self {
            Self::VideoNotFound { .. }
            | Self::VideoOpenFailed { .. }
            | Self::InvalidVideoFormat { .. }
            | Self::FrameProcessingFailed { .. } => true,
            #[cfg(feature = "opencv")]
            Self::OpenCvError(_) => true,
            _ => false,
        }
    }
}

/// Convenient Result type for extraction operations
pub type Result<T> = std::result::Result<T, ExtractError>;
