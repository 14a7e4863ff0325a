//! Durable storage for frame images and manifests
//!
//! Everything a job publishes lives under a key prefixed with its job id:
//! `{job_id}/scene_{index:03}.png` for frames and `{job_id}/manifest.json`
//! for the manifest. Writes are namespaced, so concurrent jobs never touch
//! each other's keys.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    common::{ExtractError, Result},
    config::Settings,
    manifest::Manifest,
    sampler::frame_file_name,
};

pub mod local;
#[cfg(feature = "object-store")]
pub mod object;

pub use local::LocalStore;
#[cfg(feature = "object-store")]
pub use object::{ObjectStore, UrlMode};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Key of a stored artifact, relative to the store root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job ids become path segments, so only a conservative alphabet is allowed
pub fn validate_job_id(job_id: &str) -> Result<()> {
    let valid = !job_id.is_empty()
        && job_id.len() <= 128
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ExtractError::invalid_input(format!("Invalid job id: {:?}", job_id)))
    }
}

pub fn frame_key(job_id: &str, index: usize) -> Locator {
    Locator(format!("{}/{}", job_id, frame_file_name(index)))
}

pub fn manifest_key(job_id: &str) -> Locator {
    Locator(format!("{}/{}", job_id, MANIFEST_FILE_NAME))
}

/// Where a job's frames and manifest are published
///
/// Implementations must make a manifest visible all at once: a concurrent
/// `get_manifest` sees either the previous manifest or the new one.
#[async_trait]
pub trait ArtifactStore: Send + Sync + fmt::Debug {
    /// Store an encoded PNG for scene `index` of `job_id`
    async fn put_frame(&self, job_id: &str, index: usize, png: Vec<u8>) -> Result<Locator>;

    /// Write or fully replace the manifest of `job_id`
    async fn put_manifest(&self, job_id: &str, manifest: &Manifest) -> Result<Locator>;

    /// # Errors
    /// `ManifestNotFound` if the job never published one
    async fn get_manifest(&self, job_id: &str) -> Result<Manifest>;

    /// Turn a locator into a URL a client can fetch
    async fn resolve_url(&self, locator: &Locator) -> Result<String>;

    /// Whether a manifest exists for `job_id`
    async fn exists(&self, job_id: &str) -> Result<bool>;
}

/// Build the store selected by configuration
pub async fn from_settings(settings: &Settings) -> Result<Arc<dyn ArtifactStore>> {
    if settings.use_object_store {
        #[cfg(feature = "object-store")]
        {
            let url_mode = if settings.signed_urls {
                UrlMode::Signed(settings.url_expiry())
            } else {
                UrlMode::Public
            };
            info!("Publishing artifacts to bucket {}", settings.bucket_name);
            let store = ObjectStore::connect(
                settings.bucket_name.clone(),
                settings.object_store_region.clone(),
                settings.object_store_endpoint.clone(),
                url_mode,
            )
            .await;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "object-store"))]
        return Err(ExtractError::config_error(
            "USE_OBJECT_STORE is set but the object-store feature is not compiled in",
        ));
    }

    info!("Publishing artifacts under {}", settings.frames_dir.display());
    let store = LocalStore::new(&settings.frames_dir, &settings.public_base_url).await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(frame_key("job-1", 4).as_str(), "job-1/scene_004.png");
        assert_eq!(manifest_key("job-1").to_string(), "job-1/manifest.json");
    }

    #[test]
    fn test_frame_keys_sort_in_index_order() {
        let mut keys: Vec<String> = [10, 2, 0, 35, 9]
            .iter()
            .map(|&i| frame_key("j", i).as_str().to_string())
            .collect();
        keys.sort();
        assert_eq!(keys[0], "j/scene_000.png");
        assert_eq!(keys[4], "j/scene_035.png");
    }

    #[test]
    fn test_validate_job_id() {
        assert!(validate_job_id("3f2b9c1e-0d4a-4e8f-9a57-2f0c6b1d7e11").is_ok());
        assert!(validate_job_id("worker_job_7").is_ok());
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("../etc").is_err());
        assert!(validate_job_id("a/b").is_err());
    }

    #[tokio::test]
    async fn test_from_settings_defaults_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.frames_dir = dir.path().join("frames");

        let store = from_settings(&settings).await.unwrap();

        assert!(!store.exists("nothing-here").await.unwrap());
        assert!(settings.frames_dir.is_dir());
    }
}
