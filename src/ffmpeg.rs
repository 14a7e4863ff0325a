//! Frame decoding through the `ffmpeg` command line tools
//!
//! `ffprobe` supplies stream geometry and rate; `ffmpeg` streams raw `bgr24`
//! frames over a pipe. Seeking restarts the decoder at the target time.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    common::{ExtractError, Result},
    video_stream::{Frame, FrameDecoder, VideoBackend},
};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// Stream properties the decoder needs up front
#[derive(Debug, Clone, Copy, PartialEq)]
struct StreamInfo {
    fps: f64,
    frame_count: u64,
    width: u32,
    height: u32,
}

/// Parse a rate like `"30000/1001"` or `"25"`
fn parse_fraction(s: &str) -> Option<f64> {
    let value = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_probe(json: &[u8]) -> Option<StreamInfo> {
    let probe: ProbeOutput = serde_json::from_slice(json).ok()?;
    let stream = probe.streams.into_iter().next()?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_fraction)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_fraction))?;
    let width = stream.width.filter(|w| *w > 0)?;
    let height = stream.height.filter(|h| *h > 0)?;

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .or_else(|| {
            stream
                .duration
                .as_deref()
                .and_then(|d| d.parse::<f64>().ok())
                .map(|d| (d * fps).round().max(0.0) as u64)
        })
        .unwrap_or(0);

    Some(StreamInfo {
        fps,
        frame_count,
        width,
        height,
    })
}

/// Decoder streaming frames out of an `ffmpeg` child process
pub struct FfmpegStream {
    path: PathBuf,
    ffmpeg: PathBuf,
    info: StreamInfo,
    position: u64,
    child: Option<(Child, ChildStdout)>,
}

impl FfmpegStream {
    /// Probe `path` and prepare to decode it
    ///
    /// # Errors
    /// * `VideoNotFound` - If the file doesn't exist
    /// * `VideoOpenFailed` - If `ffprobe` cannot be run or rejects the file
    /// * `InvalidVideoFormat` - If there is no video stream with a usable rate and size
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path, ffmpeg: &Path, ffprobe: &Path) -> Result<Self> {
        let path_str = path.display().to_string();
        if !path.is_file() {
            return Err(ExtractError::VideoNotFound { path: path_str });
        }

        let output = Command::new(ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                warn!("Failed to run {}: {}", ffprobe.display(), e);
                ExtractError::VideoOpenFailed {
                    path: path_str.clone(),
                }
            })?;

        if !output.status.success() {
            warn!("ffprobe rejected {}: {}", path_str, String::from_utf8_lossy(&output.stderr).trim());
            return Err(ExtractError::VideoOpenFailed { path: path_str });
        }

        let info = parse_probe(&output.stdout).ok_or_else(|| ExtractError::InvalidVideoFormat {
            path: path_str.clone(),
        })?;

        info!(
            "Video opened successfully - FPS: {:.3}, Frames: {}, Size: {}x{}",
            info.fps, info.frame_count, info.width, info.height
        );

        Ok(Self {
            path: path.to_path_buf(),
            ffmpeg: ffmpeg.to_path_buf(),
            info,
            position: 0,
            child: None,
        })
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    fn spawn_decoder(&mut self) -> Result<()> {
        self.stop_decoder();

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-v", "error", "-nostdin"]);
        if self.position > 0 {
            let start = self.position as f64 / self.info.fps;
            cmd.args(["-ss", &format!("{:.6}", start)]);
        }
        cmd.arg("-i")
            .arg(&self.path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "bgr24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            ExtractError::frame_error(self.position, format!("failed to start {}: {}", self.ffmpeg.display(), e))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::internal_error("ffmpeg stdout was not captured"))?;

        debug!("Started decoder at frame {}", self.position);
        self.child = Some((child, stdout));
        Ok(())
    }

    /// Reap a decoder whose output has ended
    ///
    /// A clean exit is the end of the video; any other exit status is a
    /// decode failure at the current position.
    fn finish_decoder(&mut self) -> Result<Option<Frame>> {
        let Some((mut child, stdout)) = self.child.take() else {
            return Ok(None);
        };
        drop(stdout);

        let status = child
            .wait()
            .map_err(|e| ExtractError::frame_error(self.position, format!("failed to wait for ffmpeg: {}", e)))?;
        if status.success() {
            debug!("Reached end of video at frame {}", self.position);
            return Ok(None);
        }

        warn!("ffmpeg exited with {} at frame {}", status, self.position);
        Err(ExtractError::frame_error(
            self.position,
            format!("ffmpeg exited with {}", status),
        ))
    }

    fn stop_decoder(&mut self) {
        if let Some((mut child, _)) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameDecoder for FfmpegStream {
    fn fps(&self) -> f64 {
        self.info.fps
    }

    fn frame_count(&self) -> u64 {
        self.info.frame_count
    }

    fn width(&self) -> u32 {
        self.info.width
    }

    fn height(&self) -> u32 {
        self.info.height
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.child.is_none() {
            self.spawn_decoder()?;
        }
        let mut buf = vec![0u8; self.frame_len()];
        let read = match &mut self.child {
            Some((_, stdout)) => stdout.read_exact(&mut buf),
            None => return Ok(None),
        };

        match read {
            Ok(()) => {
                let frame = Frame::new(self.info.width, self.info.height, buf)?;
                self.position += 1;
                Ok(Some(frame))
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => self.finish_decoder(),
            Err(e) => Err(ExtractError::frame_error(self.position, format!("ffmpeg read failed: {}", e))),
        }
    }

    fn seek(&mut self, frame_number: u64) -> Result<()> {
        self.stop_decoder();
        self.position = frame_number;
        Ok(())
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        self.stop_decoder();
    }
}

impl fmt::Debug for FfmpegStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegStream")
            .field("path", &self.path)
            .field("info", &self.info)
            .field("position", &self.position)
            .field("running", &self.child.is_some())
            .finish()
    }
}

/// Backend that decodes with the `ffmpeg` and `ffprobe` binaries
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl VideoBackend for FfmpegBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameDecoder>> {
        Ok(Box::new(FfmpegStream::open(path, &self.ffmpeg, &self.ffprobe)?))
    }
}
