//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use scene_frames::{
    ArtifactStore, ExtractError, Frame, FrameDecoder, InMemoryJobStore, JobPipeline, LocalStore, Locator,
    Manifest, MemoryStream, PipelineConfig, Result, SourceVideo, VideoBackend, VideoMeta, VideoSource,
};

pub const FPS: f64 = 25.0;
pub const WIDTH: u32 = 32;
pub const HEIGHT: u32 = 18;

pub fn url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Frames made of solid runs that alternate black and white
pub fn alternating_runs(lengths: &[usize]) -> Vec<Frame> {
    lengths
        .iter()
        .enumerate()
        .flat_map(|(i, &len)| {
            let color = if i % 2 == 0 { [0, 0, 0] } else { [255, 255, 255] };
            std::iter::repeat(Frame::solid(WIDTH, HEIGHT, color)).take(len)
        })
        .collect()
}

struct FakeVideo {
    meta: VideoMeta,
    frames: Vec<Frame>,
}

/// Video source and decoder backend serving scripted videos
///
/// `fetch` writes the video id into the downloaded file; `open` reads it
/// back to find the frames.
#[derive(Default)]
pub struct FakeLibrary {
    videos: HashMap<String, FakeVideo>,
    fetch_delay: Option<Duration>,
    broken_seeks: bool,
    fetches: AtomicUsize,
}

impl FakeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(mut self, video_id: &str, duration: u64, frames: Vec<Frame>) -> Self {
        let meta = VideoMeta {
            title: format!("Video {}", video_id),
            duration,
            channel: "Test Channel".to_string(),
            video_id: video_id.to_string(),
        };
        self.videos.insert(video_id.to_string(), FakeVideo { meta, frames });
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Decoders stream normally but fail every read after a seek
    pub fn with_broken_seeks(mut self) -> Self {
        self.broken_seeks = true;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn lookup(&self, reference: &str) -> Result<&FakeVideo> {
        let video_id = reference.rsplit('=').next().unwrap_or(reference);
        self.videos
            .get(video_id)
            .ok_or_else(|| ExtractError::SourceUnavailable {
                message: format!("unknown video {}", video_id),
            })
    }
}

#[async_trait]
impl VideoSource for FakeLibrary {
    async fn probe(&self, reference: &str) -> Result<VideoMeta> {
        Ok(self.lookup(reference)?.meta.clone())
    }

    async fn fetch(&self, reference: &str, dest_dir: &Path, cancel: &CancellationToken) -> Result<SourceVideo> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let video = self.lookup(reference)?;
        if let Some(delay) = self.fetch_delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
            }
        }
        let path = dest_dir.join("video.mp4");
        tokio::fs::write(&path, &video.meta.video_id).await?;
        Ok(SourceVideo {
            meta: video.meta.clone(),
            path,
        })
    }
}

impl VideoBackend for FakeLibrary {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameDecoder>> {
        let video_id = std::fs::read_to_string(path).map_err(|_| ExtractError::VideoNotFound {
            path: path.display().to_string(),
        })?;
        let video = self.lookup(&video_id)?;
        let stream = MemoryStream::new(video.frames.clone(), FPS)?;
        if self.broken_seeks {
            return Ok(Box::new(SeekBreaksStream {
                inner: stream,
                seeked: false,
            }));
        }
        Ok(Box::new(stream))
    }
}

/// Decoder whose reads fail once it has been repositioned
struct SeekBreaksStream {
    inner: MemoryStream,
    seeked: bool,
}

impl FrameDecoder for SeekBreaksStream {
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
        if self.seeked {
            return Err(ExtractError::frame_error(self.inner.position(), "corrupt packet"));
        }
        self.inner.read_frame()
    }
    fn seek(&mut self, frame_number: u64) -> Result<()> {
        self.seeked = true;
        self.inner.seek(frame_number)
    }
}

/// Local store that refuses selected writes
#[derive(Debug)]
pub struct FlakyStore {
    inner: LocalStore,
    frames_before_failure: Option<usize>,
    reject_completed_manifests: bool,
    frames_written: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: LocalStore) -> Self {
        Self {
            inner,
            frames_before_failure: None,
            reject_completed_manifests: false,
            frames_written: AtomicUsize::new(0),
        }
    }

    /// Accept `count` frames, then fail every later `put_frame`
    pub fn failing_frames_after(mut self, count: usize) -> Self {
        self.frames_before_failure = Some(count);
        self
    }

    /// Fail `put_manifest` unless the manifest records a failure
    pub fn rejecting_completed_manifests(mut self) -> Self {
        self.reject_completed_manifests = true;
        self
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for FlakyStore {
    async fn put_frame(&self, job_id: &str, index: usize, png: Vec<u8>) -> Result<Locator> {
        if let Some(limit) = self.frames_before_failure {
            if self.frames_written.load(Ordering::SeqCst) >= limit {
                return Err(ExtractError::storage(format!("disk full writing frame {}", index)));
            }
        }
        let locator = self.inner.put_frame(job_id, index, png).await?;
        self.frames_written.fetch_add(1, Ordering::SeqCst);
        Ok(locator)
    }

    async fn put_manifest(&self, job_id: &str, manifest: &Manifest) -> Result<Locator> {
        if self.reject_completed_manifests && !manifest.is_failed() {
            return Err(ExtractError::storage("manifest bucket unavailable"));
        }
        self.inner.put_manifest(job_id, manifest).await
    }

    async fn get_manifest(&self, job_id: &str) -> Result<Manifest> {
        self.inner.get_manifest(job_id).await
    }

    async fn resolve_url(&self, locator: &Locator) -> Result<String> {
        self.inner.resolve_url(locator).await
    }

    async fn exists(&self, job_id: &str) -> Result<bool> {
        self.inner.exists(job_id).await
    }
}

pub struct Harness {
    pub pipeline: JobPipeline,
    pub library: Arc<FakeLibrary>,
    pub jobs: Arc<InMemoryJobStore>,
    pub store_dir: TempDir,
    pub work_dir: TempDir,
}

impl Harness {
    pub async fn new(library: FakeLibrary) -> Self {
        Self::with_config(library, |_| {}).await
    }

    pub async fn with_config(library: FakeLibrary, configure: impl FnOnce(&mut PipelineConfig)) -> Self {
        Self::build(library, |store| Arc::new(store), configure).await
    }

    /// Publish through a wrapper around the harness's local store
    pub async fn with_store<S>(library: FakeLibrary, wrap: impl FnOnce(LocalStore) -> S) -> Self
    where
        S: ArtifactStore + 'static,
    {
        Self::build(library, |store| Arc::new(wrap(store)), |_| {}).await
    }

    async fn build(
        library: FakeLibrary,
        wrap: impl FnOnce(LocalStore) -> Arc<dyn ArtifactStore>,
        configure: impl FnOnce(&mut PipelineConfig),
    ) -> Self {
        let store_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(store_dir.path(), "http://localhost:8000/frames")
            .await
            .unwrap();

        let mut config = PipelineConfig {
            work_dir: Some(work_dir.path().to_path_buf()),
            ..PipelineConfig::default()
        };
        configure(&mut config);

        let library = Arc::new(library);
        let jobs = Arc::new(InMemoryJobStore::new());
        let pipeline = JobPipeline::new(
            library.clone(),
            library.clone(),
            wrap(store),
            jobs.clone(),
            config,
        );

        Self {
            pipeline,
            library,
            jobs,
            store_dir,
            work_dir,
        }
    }

    pub fn job_dir(&self, job_id: &str) -> std::path::PathBuf {
        self.store_dir.path().join(job_id)
    }

    /// Scratch directories left behind in the work dir
    pub fn leftover_scratch_dirs(&self) -> usize {
        std::fs::read_dir(self.work_dir.path()).unwrap().count()
    }
}
