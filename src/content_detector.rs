//! ContentDetector - HSV-based scene change detection algorithm
//!
//! This module implements the ContentDetector algorithm popularised by
//! PySceneDetect, which detects scene changes by analyzing differences in
//! HSV color space between consecutive video frames.

use tracing::{debug, instrument, trace};

use crate::{
    common::{ExtractError, FrameTimecode, Result},
    flash_filter::FlashFilter,
    video_stream::Frame,
};

/// Default minimum scene length in frames
pub const DEFAULT_MIN_SCENE_LENGTH: u32 = 15;

/// Frames are downscaled towards this width before scoring when the
/// downscale factor is automatic
const EFFECTIVE_WIDTH: u32 = 256;

/// Component weights for frame score calculation
///
/// These weights determine how much each color channel contributes to the
/// final scene change score.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentWeights {
    pub delta_hue: f64,
    pub delta_sat: f64,
    pub delta_lum: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            delta_hue: 1.0,
            delta_sat: 1.0,
            delta_lum: 1.0,
        }
    }
}

impl ComponentWeights {
    /// Create weights for luma-only detection (brightness changes only)
    pub fn luma_only() -> Self {
        Self {
            delta_hue: 0.0,
            delta_sat: 0.0,
            delta_lum: 1.0,
        }
    }

    /// Get the sum of absolute weights (for normalization)
    pub fn sum_abs(&self) -> f64 {
        self.delta_hue.abs() + self.delta_sat.abs() + self.delta_lum.abs()
    }

    fn validate(&self) -> Result<()> {
        if self.sum_abs() <= 0.0 {
            return Err(ExtractError::config_error(
                "All component weights cannot be zero",
            ));
        }
        Ok(())
    }
}

/// Per-channel HSV planes of one frame, using OpenCV's 8-bit convention
/// (hue in `0..180`, saturation and value in `0..=255`)
#[derive(Debug)]
struct FrameData {
    hue: Vec<u8>,
    sat: Vec<u8>,
    lum: Vec<u8>,
}

impl FrameData {
    fn from_bgr_frame(frame: &Frame) -> Self {
        let pixels = frame.pixel_count();
        let mut hue = Vec::with_capacity(pixels);
        let mut sat = Vec::with_capacity(pixels);
        let mut lum = Vec::with_capacity(pixels);

        for bgr in frame.pixels() {
            let (h, s, v) = bgr_to_hsv(bgr);
            hue.push(h);
            sat.push(s);
            lum.push(v);
        }

        Self { hue, sat, lum }
    }

    fn len(&self) -> usize {
        self.lum.len()
    }
}

/// Convert one BGR pixel to 8-bit HSV
fn bgr_to_hsv([b, g, r]: [u8; 3]) -> (u8, u8, u8) {
    let (b, g, r) = (b as f64, g as f64, r as f64);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;

    let s = if v > 0.0 { 255.0 * diff / v } else { 0.0 };

    let h = if diff == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / diff
    } else if v == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    // Hue is halved to fit in a byte; 360 degrees wraps back to 0
    let h = ((h / 2.0).round() as u32 % 180) as u8;
    (h, s.round() as u8, v as u8)
}

/// Mean absolute difference between two equally sized planes
fn mean_pixel_distance(left: &[u8], right: &[u8]) -> f64 {
    if left.is_empty() {
        return 0.0;
    }
    let sum: u64 = left
        .iter()
        .zip(right)
        .map(|(&a, &b)| a.abs_diff(b) as u64)
        .sum();
    sum as f64 / left.len() as f64
}

/// Pick the integer downscale factor that brings `width` close to
/// [`EFFECTIVE_WIDTH`]
pub fn auto_downscale_factor(width: u32) -> u32 {
    if width < EFFECTIVE_WIDTH {
        1
    } else {
        width / EFFECTIVE_WIDTH
    }
}

/// ContentDetector - detects scene changes using HSV color space analysis
///
/// This detector compares consecutive frames in the HSV color space and
/// calculates a weighted score based on the differences in hue, saturation,
/// and luminance channels. When this score reaches the threshold and the
/// flash filter agrees, a scene cut is reported.
pub struct ContentDetector {
    threshold: f64,
    weights: ComponentWeights,
    /// `None` picks a factor from the first frame's width
    downscale: Option<u32>,
    last_frame_data: Option<FrameData>,
    last_score: Option<f64>,
    flash_filter: FlashFilter,
    frame_count: u64,
}

impl ContentDetector {
    /// Create a new ContentDetector with default weights and minimum scene length
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the threshold is negative or not finite
    #[instrument]
    pub fn new(threshold: f64) -> Result<Self> {
        Self::new_with_config(threshold, ComponentWeights::default(), DEFAULT_MIN_SCENE_LENGTH)
    }

    /// Create a ContentDetector with custom settings
    ///
    /// # Arguments
    /// * `threshold` - Score threshold for detecting scene changes
    /// * `weights` - Component weights for score calculation
    /// * `min_scene_length` - Minimum frames between scene cuts
    #[instrument(skip(weights))]
    pub fn new_with_config(
        threshold: f64,
        weights: ComponentWeights,
        min_scene_length: u32,
    ) -> Result<Self> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ExtractError::config_error(format!(
                "Threshold must be non-negative, got: {}",
                threshold
            )));
        }
        weights.validate()?;

        debug!(
            "Created ContentDetector: threshold={}, min_scene_length={}",
            threshold, min_scene_length
        );

        Ok(Self {
            threshold,
            weights,
            downscale: None,
            last_frame_data: None,
            last_score: None,
            flash_filter: FlashFilter::new(min_scene_length)?,
            frame_count: 0,
        })
    }

    /// Fix the downscale factor instead of deriving it from the frame width
    pub fn with_downscale(mut self, factor: u32) -> Self {
        self.downscale = Some(factor.max(1));
        self
    }

    /// Process a single frame and return a scene cut if one is confirmed
    ///
    /// The first frame processed is the start of the stream and never a cut.
    pub fn process_frame(&mut self, frame: &Frame, timecode: FrameTimecode) -> Result<Option<FrameTimecode>> {
        self.frame_count += 1;

        let frame_score = self.calculate_frame_score(frame, timecode.frame_number())?;
        trace!(
            "Frame {} score: {:.3} (threshold: {})",
            timecode.frame_number(),
            frame_score,
            self.threshold
        );

        let above_threshold = frame_score >= self.threshold;
        Ok(self.flash_filter.filter(timecode, above_threshold))
    }

    /// Calculate content change score between current and previous frame
    fn calculate_frame_score(&mut self, frame: &Frame, frame_number: u64) -> Result<f64> {
        let factor = *self
            .downscale
            .get_or_insert_with(|| auto_downscale_factor(frame.width()));
        let scaled = frame.downscale(factor);
        let current_data = FrameData::from_bgr_frame(&scaled);

        let score = match self.last_frame_data {
            Some(ref last_data) => {
                if last_data.len() != current_data.len() {
                    return Err(ExtractError::frame_error(
                        frame_number,
                        format!(
                            "Frame size changed mid-stream ({} vs {} pixels)",
                            last_data.len(),
                            current_data.len()
                        ),
                    ));
                }

                let delta_hue = mean_pixel_distance(&current_data.hue, &last_data.hue);
                let delta_sat = mean_pixel_distance(&current_data.sat, &last_data.sat);
                let delta_lum = mean_pixel_distance(&current_data.lum, &last_data.lum);

                let weighted_sum = delta_hue * self.weights.delta_hue
                    + delta_sat * self.weights.delta_sat
                    + delta_lum * self.weights.delta_lum;
                let final_score = weighted_sum / self.weights.sum_abs();

                trace!(
                    "Frame {} components: hue={:.3}, sat={:.3}, lum={:.3}, final={:.3}",
                    frame_number,
                    delta_hue,
                    delta_sat,
                    delta_lum,
                    final_score
                );

                final_score
            }
            // First frame - no comparison possible
            None => 0.0,
        };

        self.last_frame_data = Some(current_data);
        self.last_score = Some(score);

        Ok(score)
    }

    /// Get the current threshold setting
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Get the current component weights
    pub fn weights(&self) -> &ComponentWeights {
        &self.weights
    }

    /// Get the number of frames processed so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Score of the most recently processed frame
    pub fn last_score(&self) -> Option<f64> {
        self.last_score
    }

    /// Get the minimum scene length setting from the flash filter
    pub fn min_scene_length(&self) -> u32 {
        self.flash_filter.min_scene_length()
    }
}

// Implement Debug manually to keep the per-pixel planes out of logs
impl std::fmt::Debug for ContentDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentDetector")
            .field("threshold", &self.threshold)
            .field("weights", &self.weights)
            .field("downscale", &self.downscale)
            .field("frame_count", &self.frame_count)
            .field("has_last_frame", &self.last_frame_data.is_some())
            .finish()
    }
}
