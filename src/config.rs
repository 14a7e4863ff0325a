//! Process configuration read from the environment

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{
    common::{ExtractError, Result},
    content_detector::DEFAULT_MIN_SCENE_LENGTH,
    job::{DEFAULT_MAX_FRAMES, DEFAULT_SCENE_THRESHOLD},
};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ExtractError::config_error(format!(
                "LOG_FORMAT must be text or json, got {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Default frame budget for requests that do not set one
    pub max_frames: u32,
    pub scene_threshold: f64,
    /// Minimum scene length in frames
    pub min_scene_len: u32,
    /// Longest source video accepted, in seconds
    pub video_max_duration: u64,

    pub frames_dir: PathBuf,
    pub public_base_url: String,
    pub use_object_store: bool,
    pub bucket_name: String,
    pub object_store_region: Option<String>,
    pub object_store_endpoint: Option<String>,
    pub signed_urls: bool,
    pub url_expiry_minutes: u64,

    pub cookie_file: Option<PathBuf>,
    pub ytdlp_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    /// Parent of per-job scratch directories; the system temp dir if unset
    pub work_dir: Option<PathBuf>,
    pub max_concurrent_jobs: usize,
    pub processing_timeout: Option<Duration>,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            scene_threshold: DEFAULT_SCENE_THRESHOLD,
            min_scene_len: DEFAULT_MIN_SCENE_LENGTH,
            video_max_duration: 600,
            frames_dir: PathBuf::from("extracted_frames"),
            public_base_url: "/frames".to_string(),
            use_object_store: false,
            bucket_name: "mv-escape-frames".to_string(),
            object_store_region: None,
            object_store_endpoint: None,
            signed_urls: false,
            url_expiry_minutes: 60,
            cookie_file: None,
            ytdlp_bin: PathBuf::from("yt-dlp"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            work_dir: None,
            max_concurrent_jobs: 2,
            processing_timeout: None,
            log_format: LogFormat::Text,
        }
    }
}

impl Settings {
    /// Load from the process environment, after applying a `.env` file if
    /// one is present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset and empty keys keep their
    /// defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let settings = Self {
            max_frames: parse_or(&get, "MAX_FRAMES", defaults.max_frames)?,
            scene_threshold: parse_or(&get, "SCENE_THRESHOLD", defaults.scene_threshold)?,
            min_scene_len: parse_or(&get, "MIN_SCENE_LEN", defaults.min_scene_len)?,
            video_max_duration: parse_or(&get, "VIDEO_MAX_DURATION", defaults.video_max_duration)?,
            frames_dir: get("FRAMES_DIR").map(PathBuf::from).unwrap_or(defaults.frames_dir),
            public_base_url: get("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
            use_object_store: flag_or(&get, "USE_OBJECT_STORE", defaults.use_object_store)?,
            bucket_name: get("BUCKET_NAME").unwrap_or(defaults.bucket_name),
            object_store_region: get("OBJECT_STORE_REGION"),
            object_store_endpoint: get("OBJECT_STORE_ENDPOINT"),
            signed_urls: flag_or(&get, "SIGNED_URLS", defaults.signed_urls)?,
            url_expiry_minutes: parse_or(&get, "URL_EXPIRY_MINUTES", defaults.url_expiry_minutes)?,
            cookie_file: get("COOKIE_FILE").map(PathBuf::from),
            ytdlp_bin: get("YTDLP_BIN").map(PathBuf::from).unwrap_or(defaults.ytdlp_bin),
            ffmpeg_bin: get("FFMPEG_BIN").map(PathBuf::from).unwrap_or(defaults.ffmpeg_bin),
            ffprobe_bin: get("FFPROBE_BIN").map(PathBuf::from).unwrap_or(defaults.ffprobe_bin),
            work_dir: get("WORK_DIR").map(PathBuf::from),
            max_concurrent_jobs: parse_or(&get, "MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?,
            processing_timeout: get("PROCESSING_TIMEOUT_SECS")
                .map(|v| parse_value::<u64>("PROCESSING_TIMEOUT_SECS", &v))
                .transpose()?
                .map(Duration::from_secs),
            log_format: get("LOG_FORMAT").map(|v| v.parse::<LogFormat>()).transpose()?.unwrap_or_default(),
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.min_scene_len == 0 {
            return Err(ExtractError::config_error("MIN_SCENE_LEN must be positive"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ExtractError::config_error("MAX_CONCURRENT_JOBS must be positive"));
        }
        if self.use_object_store && self.bucket_name.is_empty() {
            return Err(ExtractError::config_error("BUCKET_NAME is required with USE_OBJECT_STORE"));
        }
        if self.signed_urls && self.url_expiry_minutes == 0 {
            return Err(ExtractError::config_error("URL_EXPIRY_MINUTES must be positive"));
        }
        Ok(())
    }

    pub fn url_expiry(&self) -> Duration {
        Duration::from_secs(self.url_expiry_minutes * 60)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ExtractError::config_error(format!("{} has an invalid value: {:?}", key, value)))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn flag_or<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ExtractError::config_error(format!("{} must be a boolean, got {:?}", key, v))),
    }
}
