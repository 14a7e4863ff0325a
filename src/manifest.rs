//! The persisted JSON record of a finished job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{job::JobStatus, source::VideoMeta};

/// One published frame as it appears in a manifest and a job snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub index: usize,
    pub timestamp: f64,
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Durable summary of a job's outcome, stored as `{job_id}/manifest.json`
///
/// A completed manifest carries `video_info` and the frame list. A failed one
/// carries `status: "failed"` and `error` and never lists frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_info: Option<VideoMeta>,
    #[serde(default)]
    pub frames: Vec<FrameInfo>,
    #[serde(default)]
    pub total_frames: usize,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Manifest {
    pub fn completed(job_id: impl Into<String>, video_info: VideoMeta, mut frames: Vec<FrameInfo>) -> Self {
        frames.sort_by_key(|f| f.index);
        Self {
            job_id: job_id.into(),
            status: None,
            video_info: Some(video_info),
            total_frames: frames.len(),
            frames,
            completed_at: Utc::now(),
            error: None,
        }
    }

    pub fn failed(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: Some(JobStatus::Failed),
            video_info: None,
            frames: Vec::new(),
            total_frames: 0,
            completed_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == Some(JobStatus::Failed) || self.error.is_some()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
