//! Job records, their state machine, and where they are kept

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{
    common::{ExtractError, Result},
    manifest::FrameInfo,
    source::{validate_reference, VideoMeta},
};

pub const DEFAULT_MAX_FRAMES: u32 = 20;
pub const DEFAULT_SCENE_THRESHOLD: f64 = 30.0;
pub const MAX_FRAMES_RANGE: (u32, u32) = (1, 50);
pub const SCENE_THRESHOLD_RANGE: (f64, f64) = (5.0, 90.0);

/// Lifecycle of a job, in the only order it may move through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    DetectingScenes,
    ExtractingFrames,
    Uploading,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::DetectingScenes => "detecting_scenes",
            Self::ExtractingFrames => "extracting_frames",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The state that follows this one on the success path
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Queued => Some(Self::Downloading),
            Self::Downloading => Some(Self::DetectingScenes),
            Self::DetectingScenes => Some(Self::ExtractingFrames),
            Self::ExtractingFrames => Some(Self::Uploading),
            Self::Uploading => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Forward by exactly one step, or to `Failed` from any live state
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractRequest {
    #[serde(alias = "youtube_url")]
    pub video_reference: String,
    #[serde(default = "default_max_frames")]
    pub max_frames: u32,
    #[serde(default = "default_scene_threshold")]
    pub scene_threshold: f64,
}

pub(crate) fn default_max_frames() -> u32 {
    DEFAULT_MAX_FRAMES
}

pub(crate) fn default_scene_threshold() -> f64 {
    DEFAULT_SCENE_THRESHOLD
}

impl ExtractRequest {
    pub fn new(video_reference: impl Into<String>) -> Self {
        Self {
            video_reference: video_reference.into(),
            max_frames: DEFAULT_MAX_FRAMES,
            scene_threshold: DEFAULT_SCENE_THRESHOLD,
        }
    }

    pub fn with_max_frames(mut self, max_frames: u32) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_scene_threshold(mut self, scene_threshold: f64) -> Self {
        self.scene_threshold = scene_threshold;
        self
    }

    /// Check ranges and the reference format
    pub fn validate(&self) -> Result<()> {
        let (min_frames, max_frames) = MAX_FRAMES_RANGE;
        if !(min_frames..=max_frames).contains(&self.max_frames) {
            return Err(ExtractError::invalid_input(format!(
                "max_frames must be between {} and {}, got {}",
                min_frames, max_frames, self.max_frames
            )));
        }
        let (min_threshold, max_threshold) = SCENE_THRESHOLD_RANGE;
        if !(min_threshold..=max_threshold).contains(&self.scene_threshold) {
            return Err(ExtractError::invalid_input(format!(
                "scene_threshold must be between {} and {}, got {}",
                min_threshold, max_threshold, self.scene_threshold
            )));
        }
        validate_reference(&self.video_reference)
    }
}

/// Snapshot of a job as seen by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub video_info: Option<VideoMeta>,
    pub frames: Vec<FrameInfo>,
    pub total_frames: usize,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh `queued` job with a random id
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            video_info: None,
            frames: Vec::new(),
            total_frames: 0,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(ExtractError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        debug!(job_id = %self.job_id, from = %self.status, to = %to, "Job transition");
        self.status = to;
        Ok(())
    }

    /// Move one step forward on the success path, short of `Completed`
    pub fn advance(&mut self, to: JobStatus) -> Result<()> {
        if to.is_terminal() {
            return Err(ExtractError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.transition(to)
    }

    /// Finish successfully, publishing `frames` and their count together
    pub fn complete(&mut self, frames: Vec<FrameInfo>) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.total_frames = frames.len();
        self.frames = frames;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Finish with an error; any partial frames are dropped
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.frames.clear();
        self.total_frames = 0;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of job records keyed by id
#[async_trait]
pub trait JobStore: Send + Sync {
    /// # Errors
    /// `DuplicateJob` if the id is taken
    async fn insert(&self, job: Job) -> Result<()>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Replace the stored record with `job`
    ///
    /// # Errors
    /// `JobNotFound` for an unknown id, `InvalidTransition` if the stored
    /// record is already terminal
    async fn save(&self, job: &Job) -> Result<()>;
}

/// Process-local [`JobStore`]; records live until the process exits
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            return Err(ExtractError::DuplicateJob { job_id: job.job_id });
        }
        jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn save(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs.get_mut(&job.job_id).ok_or_else(|| ExtractError::JobNotFound {
            job_id: job.job_id.clone(),
        })?;
        if stored.status.is_terminal() {
            return Err(ExtractError::InvalidTransition {
                from: stored.status.to_string(),
                to: job.status.to_string(),
            });
        }
        *stored = job.clone();
        Ok(())
    }
}
