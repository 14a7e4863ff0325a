//! Flash filter for enforcing minimum scene length requirements
//!
//! Prevents false positive scene cuts by enforcing minimum scene lengths.
//! This filters out brief flashes, camera flickers, and other transient
//! changes that would otherwise split a scene into micro-scenes.

use tracing::{debug, trace};

use crate::common::{ExtractError, FrameTimecode, Result};

/// Filters scene cuts to enforce minimum scene length requirements
///
/// Once a cut is confirmed, no further cuts are allowed until at least
/// `min_scene_length` frames have passed. The first frame seen counts as the
/// opening boundary, so the first scene is held to the same minimum.
#[derive(Debug)]
pub struct FlashFilter {
    min_scene_length: u32,
    first_frame: Option<u64>,
    last_cut_frame: Option<u64>,
}

impl FlashFilter {
    /// Create a new FlashFilter
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `min_scene_length` is 0
    pub fn new(min_scene_length: u32) -> Result<Self> {
        if min_scene_length == 0 {
            return Err(ExtractError::config_error(
                "Minimum scene length must be positive",
            ));
        }

        Ok(Self {
            min_scene_length,
            first_frame: None,
            last_cut_frame: None,
        })
    }

    /// Filter a potential scene cut based on timing requirements
    ///
    /// # Arguments
    /// * `timecode` - Current frame timecode
    /// * `above_threshold` - Whether the current frame exceeded the detection threshold
    ///
    /// # Returns
    /// * `Option<FrameTimecode>` - The confirmed cut, if any
    pub fn filter(&mut self, timecode: FrameTimecode, above_threshold: bool) -> Option<FrameTimecode> {
        let current_frame = timecode.frame_number();
        let first_frame = *self.first_frame.get_or_insert(current_frame);

        trace!("Filter input: frame={}, above_threshold={}", current_frame, above_threshold);

        if !above_threshold {
            return None;
        }

        let previous_boundary = self.last_cut_frame.unwrap_or(first_frame);
        let frames_since_last = current_frame.saturating_sub(previous_boundary);

        if frames_since_last < u64::from(self.min_scene_length) {
            debug!(
                "Suppressing cut at frame {} (only {} frames since boundary at {})",
                current_frame, frames_since_last, previous_boundary
            );
            return None;
        }

        self.last_cut_frame = Some(current_frame);
        debug!("Scene cut confirmed at frame {}", current_frame);

        Some(timecode)
    }

    /// Get the minimum scene length setting
    pub fn min_scene_length(&self) -> u32 {
        self.min_scene_length
    }

    /// Get the frame number of the last confirmed cut (if any)
    pub fn last_cut_frame(&self) -> Option<u64> {
        self.last_cut_frame
    }
}
