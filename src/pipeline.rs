//! Job orchestration: source → segmentation → selection → sampling → upload
//!
//! [`JobPipeline`] is the composition root. Each job runs end to end on its
//! own task; decode-heavy stages are moved onto the blocking pool so status
//! queries stay responsive. A semaphore bounds how many jobs decode at once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    common::{ExtractError, ExtractedFrame, Result},
    config::Settings,
    job::{default_max_frames, default_scene_threshold, ExtractRequest, InMemoryJobStore, Job, JobStatus, JobStore},
    manifest::{FrameInfo, Manifest},
    sampler::sample_frames,
    segmenter::SceneSegmenter,
    selector,
    source::{check_duration, VideoMeta, VideoSource, YtDlpSource},
    store::{self, ArtifactStore},
    video_stream::VideoBackend,
};

/// Knobs the pipeline reads for every job
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub min_scene_len: u32,
    pub video_max_duration: u64,
    pub work_dir: Option<PathBuf>,
    pub max_concurrent_jobs: usize,
    pub processing_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for PipelineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            min_scene_len: settings.min_scene_len,
            video_max_duration: settings.video_max_duration,
            work_dir: settings.work_dir.clone(),
            max_concurrent_jobs: settings.max_concurrent_jobs,
            processing_timeout: settings.processing_timeout,
        }
    }
}

/// Payload delivered by an external task queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub job_id: String,
    pub youtube_url: String,
    #[serde(default = "default_max_frames")]
    pub max_frames: u32,
    #[serde(default = "default_scene_threshold")]
    pub scene_threshold: f64,
}

impl From<&WorkerTask> for ExtractRequest {
    fn from(task: &WorkerTask) -> Self {
        ExtractRequest::new(task.youtube_url.clone())
            .with_max_frames(task.max_frames)
            .with_scene_threshold(task.scene_threshold)
    }
}

struct Inner {
    source: Arc<dyn VideoSource>,
    backend: Arc<dyn VideoBackend>,
    store: Arc<dyn ArtifactStore>,
    jobs: Arc<dyn JobStore>,
    config: PipelineConfig,
    permits: Semaphore,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    running: Mutex<HashMap<String, CancellationToken>>,
    finished: Notify,
}

/// Runs extraction jobs and tracks their state
#[derive(Clone)]
pub struct JobPipeline {
    inner: Arc<Inner>,
}

impl JobPipeline {
    pub fn new(
        source: Arc<dyn VideoSource>,
        backend: Arc<dyn VideoBackend>,
        store: Arc<dyn ArtifactStore>,
        jobs: Arc<dyn JobStore>,
        config: PipelineConfig,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent_jobs.max(1));
        Self {
            inner: Arc::new(Inner {
                source,
                backend,
                store,
                jobs,
                config,
                permits,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                running: Mutex::new(HashMap::new()),
                finished: Notify::new(),
            }),
        }
    }

    /// Wire up the production collaborators described by `settings`
    pub async fn from_settings(settings: &Settings, backend: Arc<dyn VideoBackend>) -> Result<Self> {
        let source = YtDlpSource::new(&settings.ytdlp_bin, settings.video_max_duration)
            .with_cookie_file(settings.cookie_file.clone());
        let store = store::from_settings(settings).await?;
        Ok(Self::new(
            Arc::new(source),
            backend,
            store,
            Arc::new(InMemoryJobStore::new()),
            PipelineConfig::from(settings),
        ))
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.inner.store
    }

    /// Accept a request and start it in the background
    ///
    /// Invalid parameters, unrecognized references and videos over the
    /// duration ceiling are rejected here and never create a job.
    #[instrument(skip(self, request), fields(reference = %request.video_reference))]
    pub async fn submit(&self, request: ExtractRequest) -> Result<Job> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        request.validate()?;

        let meta = self.inner.source.probe(&request.video_reference).await?;
        check_duration(&meta, self.inner.config.video_max_duration)?;

        let job = Job::new();
        self.inner.jobs.insert(job.clone()).await?;
        let cancel = self.register(&job.job_id).await;
        info!(job_id = %job.job_id, "Job queued");

        let pipeline = self.clone();
        let snapshot = job.clone();
        self.inner.tracker.spawn(async move {
            let job_id = job.job_id.clone();
            if let Err(e) = pipeline.run(job, request, cancel).await {
                debug!(job_id = %job_id, "Background job ended with error: {}", e);
            }
        });

        Ok(snapshot)
    }

    /// Current snapshot of a job
    pub async fn status(&self, job_id: &str) -> Result<Job> {
        self.inner
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ExtractError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Wait until a job reaches a terminal state
    pub async fn wait(&self, job_id: &str) -> Result<Job> {
        loop {
            let notified = self.inner.finished.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not missed
            notified.as_mut().enable();

            let job = self.status(job_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            notified.await;
        }
    }

    /// Execute the queue-worker contract: the whole pipeline inside this call,
    /// with a manifest written whether it succeeds or fails
    #[instrument(skip(self, task), fields(job_id = %task.job_id))]
    pub async fn process_task(&self, task: WorkerTask) -> Result<Manifest> {
        store::validate_job_id(&task.job_id)?;
        let request = ExtractRequest::from(&task);

        if let Err(e) = request.validate() {
            self.publish_failure(&task.job_id, &e).await;
            return Err(e);
        }

        let job = Job::with_id(task.job_id.clone());
        self.inner.jobs.insert(job.clone()).await?;
        let cancel = self.register(&job.job_id).await;
        self.run(job, request, cancel).await
    }

    /// Drive one job through every state and publish its manifest
    ///
    /// Returns the published manifest, or the error that failed the job. The
    /// job record is terminal when this returns either way.
    #[instrument(skip_all, fields(job_id = %job.job_id))]
    pub async fn run(&self, mut job: Job, request: ExtractRequest, cancel: CancellationToken) -> Result<Manifest> {
        let outcome = self.run_stages(&mut job, &request, &cancel).await;

        let result = match outcome {
            Ok((video_info, frames)) => {
                let manifest = Manifest::completed(job.job_id.clone(), video_info, frames);
                match self.inner.store.put_manifest(&job.job_id, &manifest).await {
                    Ok(_) => job.complete(manifest.frames.clone()).map(|_| manifest),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            if !job.status.is_terminal() {
                if let Err(transition_error) = job.fail(e.to_string()) {
                    error!("Could not mark job failed: {}", transition_error);
                }
            }
            self.publish_failure(&job.job_id, e).await;
        }

        // Deregister first so a waiter that sees the terminal state cannot
        // still cancel the job
        self.inner.running.lock().await.remove(&job.job_id);
        if let Err(e) = self.inner.jobs.save(&job).await {
            error!("Could not record final state {}: {}", job.status, e);
        }
        self.inner.finished.notify_waiters();

        match &result {
            Ok(manifest) => info!(status = %job.status, total_frames = manifest.total_frames, "Job completed"),
            Err(e) if e.is_input_error() => info!(status = %job.status, "Job rejected: {}", e),
            Err(e) if e.is_decode_error() => warn!(status = %job.status, "Job failed while decoding: {}", e),
            Err(e) => warn!(status = %job.status, "Job failed: {}", e),
        }
        result
    }

    /// Abort a queued or running job; false if it is not running
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.inner.running.lock().await.get(job_id) {
            Some(token) => {
                info!(job_id, "Cancelling job");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop accepting work, cancel every job and wait for them to settle
    pub async fn shutdown(&self) {
        info!("Shutting down pipeline");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    async fn register(&self, job_id: &str) -> CancellationToken {
        let token = self.inner.shutdown.child_token();
        self.inner
            .running
            .lock()
            .await
            .insert(job_id.to_string(), token.clone());
        token
    }

    async fn publish_failure(&self, job_id: &str, e: &ExtractError) {
        let manifest = Manifest::failed(job_id, e.to_string());
        if let Err(write_error) = self.inner.store.put_manifest(job_id, &manifest).await {
            warn!(job_id, "Could not write failure manifest: {}", write_error);
        }
    }

    /// Wait for a slot, then run the stages under the optional time limit
    async fn run_stages(
        &self,
        job: &mut Job,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<(VideoMeta, Vec<FrameInfo>)> {
        let _permit = tokio::select! {
            permit = self.inner.permits.acquire() => permit.map_err(|_| ExtractError::Cancelled)?,
            _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
        };

        let stages = async move {
            tokio::select! {
                result = self.stages(job, request, cancel) => result,
                _ = cancel.cancelled() => Err(ExtractError::Cancelled),
            }
        };
        match self.inner.config.processing_timeout {
            Some(limit) => match tokio::time::timeout(limit, stages).await {
                Ok(result) => result,
                Err(_) => {
                    // Stops the blocking decode work that outlives the future
                    cancel.cancel();
                    Err(ExtractError::TimedOut(limit))
                }
            },
            None => stages.await,
        }
    }

    async fn stages(
        &self,
        job: &mut Job,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<(VideoMeta, Vec<FrameInfo>)> {
        // Removed on every exit path when dropped
        let workdir = self.scratch_dir()?;

        self.advance(job, JobStatus::Downloading).await?;
        let video = self
            .inner
            .source
            .fetch(&request.video_reference, workdir.path(), cancel)
            .await?;
        check_duration(&video.meta, self.inner.config.video_max_duration)?;
        job.video_info = Some(video.meta.clone());

        self.advance(job, JobStatus::DetectingScenes).await?;
        let segmenter = SceneSegmenter::new(request.scene_threshold, self.inner.config.min_scene_len)?;
        let backend = Arc::clone(&self.inner.backend);
        let path = video.path.clone();
        let token = cancel.clone();
        let (decoder, scenes) = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut decoder = backend.open(&path)?;
            let scenes = segmenter.detect(decoder.as_mut(), &token)?;
            Ok((decoder, scenes))
        })
        .await
        .map_err(|e| ExtractError::internal_error(format!("scene detection task failed: {}", e)))??;

        if scenes.is_empty() {
            return Err(ExtractError::NoScenesDetected);
        }
        let detected = scenes.len();
        let selected = selector::select(scenes, request.max_frames as usize);
        info!("Selected {} of {} scenes", selected.len(), detected);

        self.advance(job, JobStatus::ExtractingFrames).await?;
        let frames_dir = workdir.path().join("frames");
        tokio::fs::create_dir_all(&frames_dir).await?;
        let token = cancel.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            let mut decoder = decoder;
            sample_frames(decoder.as_mut(), &selected, &frames_dir, &token)
        })
        .await
        .map_err(|e| ExtractError::internal_error(format!("frame sampling task failed: {}", e)))??;

        // Every midpoint failed to decode
        if extracted.is_empty() {
            return Err(ExtractError::NoScenesDetected);
        }

        self.advance(job, JobStatus::Uploading).await?;
        let frames = self.upload(&job.job_id, &extracted, cancel).await?;

        Ok((video.meta, frames))
    }

    async fn upload(
        &self,
        job_id: &str,
        extracted: &[ExtractedFrame],
        cancel: &CancellationToken,
    ) -> Result<Vec<FrameInfo>> {
        let mut frames = Vec::with_capacity(extracted.len());
        for frame in extracted {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            let png = tokio::fs::read(&frame.path).await?;
            let locator = self.inner.store.put_frame(job_id, frame.index, png).await?;
            let url = self.inner.store.resolve_url(&locator).await?;
            debug!("Published frame {} at {}", frame.index, url);
            frames.push(FrameInfo {
                index: frame.index,
                timestamp: frame.timestamp,
                url,
                width: frame.width,
                height: frame.height,
            });
        }
        Ok(frames)
    }

    async fn advance(&self, job: &mut Job, to: JobStatus) -> Result<()> {
        job.advance(to)?;
        self.inner.jobs.save(job).await?;
        info!(status = %to, "Job advanced");
        Ok(())
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("scene-frames-");
        let dir = match &self.inner.config.work_dir {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_task_defaults() {
        let task: WorkerTask =
            serde_json::from_str(r#"{"job_id": "j1", "youtube_url": "https://youtu.be/abc"}"#).unwrap();
        assert_eq!(task.max_frames, 20);
        assert_eq!(task.scene_threshold, 30.0);

        let request = ExtractRequest::from(&task);
        assert_eq!(request.video_reference, "https://youtu.be/abc");
        assert_eq!(request.max_frames, 20);
    }

    #[test]
    fn test_pipeline_config_from_settings() {
        let settings = Settings {
            max_concurrent_jobs: 4,
            processing_timeout: Some(Duration::from_secs(30)),
            ..Settings::default()
        };
        let config = PipelineConfig::from(&settings);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.min_scene_len, 15);
        assert_eq!(config.video_max_duration, 600);
        assert_eq!(config.processing_timeout, Some(Duration::from_secs(30)));
    }
}
