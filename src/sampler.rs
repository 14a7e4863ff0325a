//! Representative frame sampling at scene midpoints

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    common::{ExtractError, ExtractedFrame, FrameTimecode, Result, Scene},
    video_stream::FrameDecoder,
};

/// File name used for the frame sampled from scene `index`
pub fn frame_file_name(index: usize) -> String {
    format!("scene_{:03}.png", index)
}

/// Seek to the middle of each scene and write that frame as a PNG
///
/// A scene whose frame cannot be decoded is skipped, so the result may be
/// shorter than `scenes`. Each frame keeps its scene's index. Failing to write
/// an image into `output_dir` is an error.
#[instrument(skip(decoder, scenes, cancel), fields(scenes = scenes.len(), output_dir = %output_dir.display()))]
pub fn sample_frames(
    decoder: &mut dyn FrameDecoder,
    scenes: &[Scene],
    output_dir: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<ExtractedFrame>> {
    let fps = decoder.fps();
    let mut frames = Vec::with_capacity(scenes.len());

    for scene in scenes {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let mid_time = scene.mid_time();
        let target = FrameTimecode::from_seconds(mid_time, fps).frame_number();

        if let Err(e) = decoder.seek(target) {
            warn!("Skipping scene {}: seek to frame {} failed: {}", scene.index, target, e);
            continue;
        }

        let frame = match decoder.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!("Skipping scene {}: no frame at {:.2}s", scene.index, mid_time);
                continue;
            }
            Err(e) => {
                warn!("Skipping scene {}: decode at {:.2}s failed: {}", scene.index, mid_time, e);
                continue;
            }
        };

        let path = output_dir.join(frame_file_name(scene.index));
        frame.save_png(&path)?;
        debug!("Saved scene {} frame at {:.2}s to {}", scene.index, mid_time, path.display());

        frames.push(ExtractedFrame {
            index: scene.index,
            timestamp: mid_time,
            path,
            width: frame.width(),
            height: frame.height(),
        });
    }

    info!("Sampled {} of {} scenes", frames.len(), scenes.len());
    Ok(frames)
}
