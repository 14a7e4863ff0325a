//! Scene segmentation: turns a decoded frame stream into contiguous scenes

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    common::{ExtractError, FrameTimecode, Result, Scene},
    content_detector::{ComponentWeights, ContentDetector, DEFAULT_MIN_SCENE_LENGTH},
    video_stream::FrameDecoder,
};

/// Streams a video once and splits it into scenes wherever the content
/// score crosses the threshold
#[derive(Debug, Clone)]
pub struct SceneSegmenter {
    threshold: f64,
    min_scene_length: u32,
    weights: ComponentWeights,
    downscale: Option<u32>,
}

impl SceneSegmenter {
    /// # Errors
    /// Returns `InvalidConfig` for a negative threshold or a zero minimum
    /// scene length
    pub fn new(threshold: f64, min_scene_length: u32) -> Result<Self> {
        let segmenter = Self {
            threshold,
            min_scene_length,
            weights: ComponentWeights::default(),
            downscale: None,
        };
        // Surface configuration errors at construction, not mid-job
        segmenter.build_detector()?;
        Ok(segmenter)
    }

    pub fn with_weights(mut self, weights: ComponentWeights) -> Result<Self> {
        self.weights = weights;
        self.build_detector()?;
        Ok(self)
    }

    pub fn with_downscale(mut self, factor: u32) -> Self {
        self.downscale = Some(factor.max(1));
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn min_scene_length(&self) -> u32 {
        self.min_scene_length
    }

    fn build_detector(&self) -> Result<ContentDetector> {
        let detector =
            ContentDetector::new_with_config(self.threshold, self.weights.clone(), self.min_scene_length)?;
        Ok(match self.downscale {
            Some(factor) => detector.with_downscale(factor),
            None => detector,
        })
    }

    /// Decode the stream from its current position to the end and return the
    /// scenes covering `[0, end)` in order
    ///
    /// A read or analysis failure part-way through ends the last scene at the
    /// last frame that decoded successfully. An empty stream yields no scenes.
    #[instrument(skip(self, decoder, cancel), fields(threshold = self.threshold, min_scene_length = self.min_scene_length))]
    pub fn detect(&self, decoder: &mut dyn FrameDecoder, cancel: &CancellationToken) -> Result<Vec<Scene>> {
        let fps = decoder.fps();
        if !(fps > 0.0) {
            return Err(ExtractError::config_error(format!(
                "Decoder reported a non-positive frame rate: {}",
                fps
            )));
        }

        let mut detector = self.build_detector()?;
        let mut cuts = Vec::new();
        let mut frames_read: u64 = 0;
        let total_frames = decoder.frame_count();

        info!(
            "Segmenting {}x{} at {:.2}fps, ~{} frames",
            decoder.width(),
            decoder.height(),
            fps,
            total_frames
        );

        loop {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }

            let frame = match decoder.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!("Decode failed after {} frames, truncating: {}", frames_read, e);
                    break;
                }
            };

            let timecode = FrameTimecode::new(frames_read, fps);
            match detector.process_frame(&frame, timecode) {
                Ok(Some(cut)) => {
                    debug!(
                        "Scene cut detected at frame {} ({:.2}s)",
                        cut.frame_number(),
                        cut.seconds()
                    );
                    cuts.push(cut.frame_number());
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Frame analysis failed after {} frames, truncating: {}", frames_read, e);
                    break;
                }
            }

            frames_read += 1;

            if frames_read % 1000 == 0 {
                debug!("Processed {}/{} frames", frames_read, total_frames);
            }
        }

        let scenes = scenes_from_cuts(&cuts, frames_read, fps);
        info!(
            "Scene detection completed. Found {} scenes in {} frames",
            scenes.len(),
            frames_read
        );

        Ok(scenes)
    }
}

impl Default for SceneSegmenter {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            min_scene_length: DEFAULT_MIN_SCENE_LENGTH,
            weights: ComponentWeights::default(),
            downscale: None,
        }
    }
}

/// Build contiguous scenes from ascending cut frames and the number of
/// frames actually decoded
///
/// Cuts outside `(0, total_frames)` are ignored, so every scene is non-empty.
pub(crate) fn scenes_from_cuts(cuts: &[u64], total_frames: u64, fps: f64) -> Vec<Scene> {
    if total_frames == 0 {
        return Vec::new();
    }

    let mut boundaries = Vec::with_capacity(cuts.len() + 2);
    boundaries.push(0);
    for &cut in cuts {
        let last = boundaries[boundaries.len() - 1];
        if cut > last && cut < total_frames {
            boundaries.push(cut);
        }
    }
    boundaries.push(total_frames);

    boundaries
        .windows(2)
        .enumerate()
        .map(|(index, pair)| {
            Scene::from_timecodes(
                index,
                FrameTimecode::new(pair[0], fps),
                FrameTimecode::new(pair[1], fps),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_stream::{Frame, MemoryStream};

    const FPS: f64 = 25.0;

    fn stream_from_runs(runs: &[(u8, usize)]) -> MemoryStream {
        let frames = runs
            .iter()
            .flat_map(|&(level, count)| std::iter::repeat(Frame::solid(8, 4, [level, level, level])).take(count))
            .collect();
        MemoryStream::new(frames, FPS).unwrap()
    }

    /// Fails every read from `fail_at` onwards
    struct FailingDecoder {
        inner: MemoryStream,
        fail_at: u64,
    }

    impl FrameDecoder for FailingDecoder {
        fn fps(&self) -> f64 {
            self.inner.fps()
        }
        fn frame_count(&self) -> u64 {
            self.inner.frame_count()
        }
        fn width(&self) -> u32 {
            self.inner.width()
        }
        fn height(&self) -> u32 {
            self.inner.height()
        }
        fn position(&self) -> u64 {
            self.inner.position()
        }
        fn read_frame(&mut self) -> Result<Option<Frame>> {
            if self.inner.position() >= self.fail_at {
                return Err(ExtractError::frame_error(self.inner.position(), "corrupt packet"));
            }
            self.inner.read_frame()
        }
        fn seek(&mut self, frame_number: u64) -> Result<()> {
            self.inner.seek(frame_number)
        }
    }

    fn assert_contiguous(scenes: &[Scene], duration: f64) {
        assert_eq!(scenes[0].start_time, 0.0);
        for pair in scenes.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
        }
        for (i, scene) in scenes.iter().enumerate() {
            assert_eq!(scene.index, i);
            assert!(scene.end_time > scene.start_time);
        }
        assert!((scenes[scenes.len() - 1].end_time - duration).abs() < 1e-9);
    }

    #[test]
    fn test_scenes_from_cuts() {
        let scenes = scenes_from_cuts(&[250, 500], 1000, FPS);
        assert_eq!(scenes.len(), 3);
        assert_eq!(scenes[0].end_time, 10.0);
        assert_eq!(scenes[1].start_time, 10.0);
        assert_eq!(scenes[2].end_time, 40.0);
    }

    #[test]
    fn test_scenes_from_cuts_empty_and_single() {
        assert!(scenes_from_cuts(&[], 0, FPS).is_empty());

        let scenes = scenes_from_cuts(&[], 600, 30.0);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].end_time, 20.0);

        // Out-of-range and duplicate cuts never create empty scenes
        let scenes = scenes_from_cuts(&[0, 10, 10, 600], 600, 30.0);
        assert_eq!(scenes.len(), 2);
    }

    #[test]
    fn test_detect_splits_on_content_changes() {
        let segmenter = SceneSegmenter::new(30.0, 15).unwrap();
        let mut stream = stream_from_runs(&[(0, 30), (200, 40), (0, 25)]);

        let scenes = segmenter.detect(&mut stream, &CancellationToken::new()).unwrap();

        assert_eq!(scenes.len(), 3);
        assert_eq!(scenes[1].start_time, 30.0 / FPS);
        assert_eq!(scenes[2].start_time, 70.0 / FPS);
        assert_contiguous(&scenes, 95.0 / FPS);
    }

    #[test]
    fn test_detect_without_boundaries_yields_one_scene() {
        let segmenter = SceneSegmenter::new(30.0, 15).unwrap();
        let mut stream = stream_from_runs(&[(90, 50)]);

        let scenes = segmenter.detect(&mut stream, &CancellationToken::new()).unwrap();

        assert_eq!(scenes, vec![Scene::new(0, 0.0, 2.0)]);
    }

    #[test]
    fn test_detect_video_shorter_than_min_scene_length() {
        let segmenter = SceneSegmenter::new(30.0, 15).unwrap();
        let mut stream = stream_from_runs(&[(0, 3), (255, 3), (0, 3)]);

        let scenes = segmenter.detect(&mut stream, &CancellationToken::new()).unwrap();

        assert_eq!(scenes.len(), 1);
        assert_contiguous(&scenes, 9.0 / FPS);
    }

    #[test]
    fn test_detect_suppresses_flicker() {
        let segmenter = SceneSegmenter::new(30.0, 15).unwrap();
        // A 2-frame flash inside a long scene
        let mut stream = stream_from_runs(&[(0, 40), (255, 2), (0, 40)]);

        let scenes = segmenter.detect(&mut stream, &CancellationToken::new()).unwrap();

        // The flash opens one scene; the return 2 frames later is suppressed
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[1].start_time, 40.0 / FPS);
    }

    #[test]
    fn test_detect_empty_stream_yields_no_scenes() {
        let segmenter = SceneSegmenter::default();
        let mut stream = MemoryStream::new(Vec::new(), FPS).unwrap();

        let scenes = segmenter.detect(&mut stream, &CancellationToken::new()).unwrap();

        assert!(scenes.is_empty());
    }

    #[test]
    fn test_detect_truncates_on_mid_stream_failure() {
        let segmenter = SceneSegmenter::new(30.0, 15).unwrap();
        let mut decoder = FailingDecoder {
            inner: stream_from_runs(&[(0, 30), (200, 60)]),
            fail_at: 50,
        };

        let scenes = segmenter.detect(&mut decoder, &CancellationToken::new()).unwrap();

        assert_eq!(scenes.len(), 2);
        assert_contiguous(&scenes, 50.0 / FPS);
    }

    #[test]
    fn test_detect_honours_cancellation() {
        let segmenter = SceneSegmenter::default();
        let mut stream = stream_from_runs(&[(0, 10)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = segmenter.detect(&mut stream, &cancel);

        assert!(matches!(result, Err(ExtractError::Cancelled)));
    }

    #[test]
    fn test_segmenter_rejects_bad_config() {
        assert!(SceneSegmenter::new(30.0, 0).is_err());
        assert!(SceneSegmenter::new(-5.0, 15).is_err());

        let zero_weights = ComponentWeights {
            delta_hue: 0.0,
            delta_sat: 0.0,
            delta_lum: 0.0,
        };
        assert!(SceneSegmenter::default().with_weights(zero_weights).is_err());
    }

    #[test]
    fn test_luma_only_ignores_hue_changes() {
        // Pure red then pure blue: same saturation and value, hue 0 vs 120
        let frames: Vec<Frame> = std::iter::repeat(Frame::solid(8, 4, [0, 0, 255]))
            .take(30)
            .chain(std::iter::repeat(Frame::solid(8, 4, [255, 0, 0])).take(30))
            .collect();

        let full = SceneSegmenter::new(30.0, 15).unwrap();
        let mut stream = MemoryStream::new(frames.clone(), FPS).unwrap();
        assert_eq!(full.detect(&mut stream, &CancellationToken::new()).unwrap().len(), 2);

        let luma = SceneSegmenter::new(30.0, 15)
            .unwrap()
            .with_weights(ComponentWeights::luma_only())
            .unwrap()
            .with_downscale(2);
        let mut stream = MemoryStream::new(frames, FPS).unwrap();
        let scenes = luma.detect(&mut stream, &CancellationToken::new()).unwrap();
        assert_eq!(scenes, vec![Scene::new(0, 0.0, 60.0 / FPS)]);
    }
}
