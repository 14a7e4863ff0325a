//! Filesystem-backed artifact store

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{frame_key, manifest_key, validate_job_id, ArtifactStore, Locator};
use crate::{
    common::{ExtractError, Result},
    manifest::Manifest,
};

/// Stores artifacts as files under a root directory and serves them from a
/// base URL, e.g. `/frames/{job_id}/scene_000.png`
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    base_url: String,
}

impl LocalStore {
    /// Create the store, making `root` if it does not exist
    pub async fn new(root: impl AsRef<Path>, base_url: impl Into<String>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            ExtractError::storage(format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self {
            root,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, locator: &Locator) -> PathBuf {
        self.root.join(locator.as_str())
    }

    /// Write `bytes` next to `path` and rename into place, so readers never
    /// see a partial file
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| ExtractError::internal_error(format!("{} has no parent", path.display())))?;
        fs::create_dir_all(parent).await.map_err(storage_error)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        if let Err(e) = fs::write(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(storage_error(e));
        }
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(storage_error(e));
        }
        Ok(())
    }
}

fn storage_error(e: std::io::Error) -> ExtractError {
    ExtractError::storage(e.to_string())
}

#[async_trait]
impl ArtifactStore for LocalStore {
    #[instrument(skip(self, png), fields(bytes = png.len()))]
    async fn put_frame(&self, job_id: &str, index: usize, png: Vec<u8>) -> Result<Locator> {
        validate_job_id(job_id)?;
        let locator = frame_key(job_id, index);
        self.write_atomic(&self.path_of(&locator), &png).await?;
        debug!("Stored {}", locator);
        Ok(locator)
    }

    #[instrument(skip(self, manifest))]
    async fn put_manifest(&self, job_id: &str, manifest: &Manifest) -> Result<Locator> {
        validate_job_id(job_id)?;
        let locator = manifest_key(job_id);
        self.write_atomic(&self.path_of(&locator), &manifest.to_json()?).await?;
        debug!("Stored {}", locator);
        Ok(locator)
    }

    async fn get_manifest(&self, job_id: &str) -> Result<Manifest> {
        validate_job_id(job_id)?;
        let path = self.path_of(&manifest_key(job_id));
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ExtractError::ManifestNotFound {
                    job_id: job_id.to_string(),
                })
            }
            Err(e) => return Err(storage_error(e)),
        };
        Ok(Manifest::from_json(&bytes)?)
    }

    async fn resolve_url(&self, locator: &Locator) -> Result<String> {
        Ok(format!("{}/{}", self.base_url, locator))
    }

    async fn exists(&self, job_id: &str) -> Result<bool> {
        validate_job_id(job_id)?;
        fs::try_exists(self.path_of(&manifest_key(job_id)))
            .await
            .map_err(storage_error)
    }
}
