//! Video decoding behind a small trait seam
//!
//! The pipeline only needs three things from a decoder: sequential reads,
//! a best-effort seek, and the stream's frame rate. [`FrameDecoder`] captures
//! that contract. With the `opencv` feature, `VideoStream` implements it on
//! top of OpenCV's `VideoCapture`; [`MemoryStream`] serves pre-decoded
//! frames from memory.

use std::fmt;
use std::path::Path;

use crate::common::{ExtractError, Result};

/// A decoded video frame stored as packed 8-bit BGR
#[derive(Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a packed BGR buffer, checking that its length matches the dimensions
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ExtractError::internal_error(format!(
                "Frame dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(ExtractError::internal_error(format!(
                "Frame buffer has {} bytes, expected {} for {}x{} BGR",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self { width, height, data })
    }

    /// Frame filled with a single BGR color
    pub fn solid(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let data = bgr.iter().copied().cycle().take(pixels * 3).collect();
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Iterate over `[b, g, r]` pixels in row-major order
    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.data.chunks_exact(3).map(|p| [p[0], p[1], p[2]])
    }

    /// Nearest-neighbour downscale by an integer factor
    ///
    /// A factor of 0 or 1 returns an unchanged copy.
    pub fn downscale(&self, factor: u32) -> Frame {
        if factor <= 1 {
            return self.clone();
        }
        let width = (self.width / factor).max(1);
        let height = (self.height / factor).max(1);
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            let src_y = (y * factor).min(self.height - 1) as usize;
            for x in 0..width {
                let src_x = (x * factor).min(self.width - 1) as usize;
                let offset = (src_y * self.width as usize + src_x) * 3;
                data.extend_from_slice(&self.data[offset..offset + 3]);
            }
        }
        Frame { width, height, data }
    }

    /// Convert to an RGB image for encoding
    pub fn to_rgb_image(&self) -> Result<image::RgbImage> {
        let mut rgb = Vec::with_capacity(self.data.len());
        for [b, g, r] in self.pixels() {
            rgb.extend_from_slice(&[r, g, b]);
        }
        image::RgbImage::from_raw(self.width, self.height, rgb).ok_or_else(|| {
            ExtractError::internal_error(format!(
                "pixel buffer does not fit a {}x{} image",
                self.width, self.height
            ))
        })
    }

    /// Encode the frame as PNG at `path`
    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.to_rgb_image()?
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

// Implement Debug manually to avoid dumping the pixel buffer
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Sequential, seekable access to the frames of one video
///
/// A decoder is owned by exactly one stage of one job at a time, so it only
/// needs to be `Send`.
pub trait FrameDecoder: Send {
    /// Frames per second reported by the stream (always positive)
    fn fps(&self) -> f64;

    /// Frame count reported by the container; may be approximate
    fn frame_count(&self) -> u64;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Index of the frame the next `read_frame` call will return
    fn position(&self) -> u64;

    /// Decode the next frame, `None` at end of stream
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Best-effort seek to `frame_number`
    ///
    /// Decoders may land on a nearby keyframe instead of the exact frame.
    fn seek(&mut self, frame_number: u64) -> Result<()>;

    fn duration_seconds(&self) -> f64 {
        self.frame_count() as f64 / self.fps()
    }
}

/// Opens decoders for local video files
pub trait VideoBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameDecoder>>;
}

/// Decoder over frames that are already in memory
///
/// `keyframe_interval` emulates container seeking: a seek lands on the
/// closest preceding multiple of the interval.
#[derive(Debug, Clone)]
pub struct MemoryStream {
    frames: Vec<Frame>,
    fps: f64,
    position: u64,
    keyframe_interval: u64,
}

impl MemoryStream {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Result<Self> {
        if !(fps > 0.0) {
            return Err(ExtractError::config_error(format!(
                "FPS must be positive, got: {}",
                fps
            )));
        }
        if let Some(first) = frames.first() {
            let mismatched = frames
                .iter()
                .any(|f| f.width() != first.width() || f.height() != first.height());
            if mismatched {
                return Err(ExtractError::config_error(
                    "All frames in a stream must share the same dimensions",
                ));
            }
        }
        Ok(Self {
            frames,
            fps,
            position: 0,
            keyframe_interval: 1,
        })
    }

    pub fn with_keyframe_interval(mut self, interval: u64) -> Self {
        self.keyframe_interval = interval.max(1);
        self
    }
}

impl FrameDecoder for MemoryStream {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn width(&self) -> u32 {
        self.frames.first().map(Frame::width).unwrap_or(0)
    }

    fn height(&self) -> u32 {
        self.frames.first().map(Frame::height).unwrap_or(0)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self.frames.get(self.position as usize).cloned();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }

    fn seek(&mut self, frame_number: u64) -> Result<()> {
        let landed = frame_number - frame_number % self.keyframe_interval;
        self.position = landed.min(self.frame_count());
        Ok(())
    }
}

#[cfg(feature = "opencv")]
pub use self::opencv_backend::{OpenCvBackend, VideoStream};

#[cfg(feature = "opencv")]
mod opencv_backend {
    use super::*;
    use opencv::{
        core::{Mat, CV_8UC3},
        prelude::*,
        videoio,
    };
    use tracing::{debug, info, instrument, warn};

    /// Wrapper around OpenCV VideoCapture for consistent video reading
    ///
    /// This struct provides a safe, instrumented interface to OpenCV's video
    /// reading capabilities, with proper error handling and logging.
    pub struct VideoStream {
        cap: videoio::VideoCapture,
        fps: f64,
        frame_count: u64,
        position: u64,
        width: u32,
        height: u32,
        path: String,
    }

    impl VideoStream {
        /// Open a video file for reading
        ///
        /// # Errors
        /// * `VideoNotFound` - If the file doesn't exist
        /// * `VideoOpenFailed` - If OpenCV can't open the file
        /// * `InvalidVideoFormat` - If the stream reports no usable frame rate or size
        #[instrument(skip(path), fields(path = %path.display()))]
        pub fn open(path: &Path) -> Result<Self> {
            let path_str = path.display().to_string();
            info!("Opening video stream: {}", path_str);

            // Check if file exists first (fail-fast approach)
            if !path.exists() {
                return Err(ExtractError::VideoNotFound { path: path_str });
            }

            let cap = videoio::VideoCapture::from_file(&path_str, videoio::CAP_ANY).map_err(|e| {
                warn!("Failed to create VideoCapture: {}", e);
                ExtractError::VideoOpenFailed {
                    path: path_str.clone(),
                }
            })?;

            let is_opened = cap.is_opened().map_err(|e| {
                warn!("Failed to check if VideoCapture is opened: {}", e);
                ExtractError::VideoOpenFailed {
                    path: path_str.clone(),
                }
            })?;
            if !is_opened {
                return Err(ExtractError::VideoOpenFailed { path: path_str });
            }

            let property = |id: i32, name: &str| -> Result<f64> {
                cap.get(id).map_err(|e| {
                    warn!("Failed to get video {}: {}", name, e);
                    ExtractError::InvalidVideoFormat {
                        path: path_str.clone(),
                    }
                })
            };
            let fps = property(videoio::CAP_PROP_FPS, "FPS")?;
            let frame_count = property(videoio::CAP_PROP_FRAME_COUNT, "frame count")?;
            let width = property(videoio::CAP_PROP_FRAME_WIDTH, "frame width")?;
            let height = property(videoio::CAP_PROP_FRAME_HEIGHT, "frame height")?;

            if !(fps > 0.0) || width <= 0.0 || height <= 0.0 {
                return Err(ExtractError::InvalidVideoFormat { path: path_str });
            }

            info!(
                "Video opened successfully - FPS: {}, Frames: {}, Size: {}x{}",
                fps, frame_count, width, height
            );

            Ok(Self {
                cap,
                fps,
                // Some containers report 0 or negative counts; sequential reads decide the real length
                frame_count: frame_count.max(0.0) as u64,
                position: 0,
                width: width as u32,
                height: height as u32,
                path: path_str,
            })
        }

        /// Get the video file path
        pub fn path(&self) -> &str {
            &self.path
        }

        fn mat_to_frame(&self, mat: &Mat) -> Result<Frame> {
            if mat.typ() != CV_8UC3 {
                return Err(ExtractError::frame_error(
                    self.position,
                    format!("Unexpected pixel format {}", mat.typ()),
                ));
            }
            let width = mat.cols() as u32;
            let height = mat.rows() as u32;
            let data = if mat.is_continuous() {
                mat.data_bytes()?.to_vec()
            } else {
                mat.try_clone()?.data_bytes()?.to_vec()
            };
            Frame::new(width, height, data)
        }
    }

    impl FrameDecoder for VideoStream {
        fn fps(&self) -> f64 {
            self.fps
        }

        fn frame_count(&self) -> u64 {
            self.frame_count
        }

        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn position(&self) -> u64 {
            self.position
        }

        #[instrument(skip(self), level = "trace")]
        fn read_frame(&mut self) -> Result<Option<Frame>> {
            let mut mat = Mat::default();
            let success = self.cap.read(&mut mat).map_err(|e| {
                ExtractError::frame_error(self.position, format!("OpenCV read failed: {}", e))
            })?;

            if success && !mat.empty() {
                let frame = self.mat_to_frame(&mat)?;
                self.position += 1;
                Ok(Some(frame))
            } else {
                debug!("Reached end of video at frame {}", self.position);
                Ok(None)
            }
        }

        #[instrument(skip(self))]
        fn seek(&mut self, frame_number: u64) -> Result<()> {
            let accepted = self
                .cap
                .set(videoio::CAP_PROP_POS_FRAMES, frame_number as f64)
                .map_err(|e| ExtractError::frame_error(frame_number, format!("OpenCV seek failed: {}", e)))?;
            if !accepted {
                return Err(ExtractError::frame_error(frame_number, "Seek rejected by decoder"));
            }
            // The decoder reports where it actually landed
            let landed = self.cap.get(videoio::CAP_PROP_POS_FRAMES).unwrap_or(frame_number as f64);
            self.position = landed.max(0.0) as u64;
            debug!("Seek to frame {} landed at {}", frame_number, self.position);
            Ok(())
        }
    }

    // Implement Debug manually to avoid showing internal OpenCV state
    impl fmt::Debug for VideoStream {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("VideoStream")
                .field("path", &self.path)
                .field("fps", &self.fps)
                .field("frame_count", &self.frame_count)
                .field("position", &self.position)
                .field("width", &self.width)
                .field("height", &self.height)
                .finish()
        }
    }

    // SAFETY: the capture handle is moved between pipeline stages but never
    // accessed from two threads at once.
    unsafe impl Send for VideoStream {}

    /// Production backend that decodes local files with OpenCV
    #[derive(Debug, Default, Clone, Copy)]
    pub struct OpenCvBackend;

    impl VideoBackend for OpenCvBackend {
        fn open(&self, path: &Path) -> Result<Box<dyn FrameDecoder>> {
            Ok(Box::new(VideoStream::open(path)?))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_video_stream_nonexistent_file() {
            let result = VideoStream::open(Path::new("nonexistent_video.mp4"));
            match result.unwrap_err() {
                ExtractError::VideoNotFound { path } => {
                    assert_eq!(path, "nonexistent_video.mp4");
                }
                other => panic!("Expected VideoNotFound, got: {:?}", other),
            }
        }

        #[test]
        fn test_video_stream_directory_instead_of_file() {
            let temp_dir = tempfile::tempdir().expect("Failed to create test directory");

            let result = VideoStream::open(temp_dir.path());

            // Should fail since it's a directory, not a video file
            assert!(matches!(
                result.unwrap_err(),
                ExtractError::VideoOpenFailed { .. } | ExtractError::InvalidVideoFormat { .. }
            ));
        }
    }
}
