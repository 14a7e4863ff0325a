//! S3-compatible object store

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::{error::DisplayErrorContext, presigning::PresigningConfig, primitives::ByteStream, Client};
use tracing::{debug, info, instrument};

use super::{frame_key, manifest_key, validate_job_id, ArtifactStore, Locator};
use crate::{
    common::{ExtractError, Result},
    manifest::Manifest,
};

const DEFAULT_ENDPOINT: &str = "https://s3.amazonaws.com";

/// How frame URLs are handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlMode {
    /// Plain URLs; the bucket must allow anonymous reads
    Public,
    /// Presigned GET URLs valid for the given duration
    Signed(Duration),
}

/// Artifact store writing to a bucket through the S3 API
#[derive(Debug, Clone)]
pub struct ObjectStore {
    client: Client,
    bucket: String,
    endpoint: String,
    url_mode: UrlMode,
}

impl ObjectStore {
    /// Build a client from the ambient AWS configuration
    ///
    /// `endpoint` points the client at an S3-compatible service and switches
    /// to path-style addressing.
    pub async fn connect(
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        url_mode: UrlMode,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint.is_some())
            .build();

        info!("Object store ready: bucket={}, url_mode={:?}", bucket, url_mode);

        Self {
            client: Client::from_conf(s3_config),
            bucket,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            url_mode,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, locator: &Locator, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(locator.as_str())
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| ExtractError::storage(format!("put {}: {}", locator, DisplayErrorContext(&e))))?;
        Ok(())
    }
}

/// `{endpoint}/{bucket}/{key}` without doubled slashes
fn public_url(endpoint: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
}

#[async_trait]
impl ArtifactStore for ObjectStore {
    #[instrument(skip(self, png), fields(bucket = %self.bucket, bytes = png.len()))]
    async fn put_frame(&self, job_id: &str, index: usize, png: Vec<u8>) -> Result<Locator> {
        validate_job_id(job_id)?;
        let locator = frame_key(job_id, index);
        self.put(&locator, png, "image/png").await?;
        debug!("Uploaded {}", locator);
        Ok(locator)
    }

    // A single PUT replaces the object atomically
    #[instrument(skip(self, manifest), fields(bucket = %self.bucket))]
    async fn put_manifest(&self, job_id: &str, manifest: &Manifest) -> Result<Locator> {
        validate_job_id(job_id)?;
        let locator = manifest_key(job_id);
        self.put(&locator, manifest.to_json()?, "application/json").await?;
        debug!("Uploaded {}", locator);
        Ok(locator)
    }

    async fn get_manifest(&self, job_id: &str) -> Result<Manifest> {
        validate_job_id(job_id)?;
        let locator = manifest_key(job_id);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(locator.as_str())
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()) == Some(true) {
                    ExtractError::ManifestNotFound {
                        job_id: job_id.to_string(),
                    }
                } else {
                    ExtractError::storage(format!("get {}: {}", locator, DisplayErrorContext(&e)))
                }
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| ExtractError::storage(format!("read {}: {}", locator, e)))?
            .into_bytes();
        Ok(Manifest::from_json(&bytes)?)
    }

    async fn resolve_url(&self, locator: &Locator) -> Result<String> {
        match self.url_mode {
            UrlMode::Public => Ok(public_url(&self.endpoint, &self.bucket, locator.as_str())),
            UrlMode::Signed(expires_in) => {
                let presigning = PresigningConfig::expires_in(expires_in)
                    .map_err(|e| ExtractError::config_error(format!("URL expiry: {}", e)))?;
                let request = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(locator.as_str())
                    .presigned(presigning)
                    .await
                    .map_err(|e| ExtractError::storage(format!("presign {}: {}", locator, DisplayErrorContext(&e))))?;
                Ok(request.uri().to_string())
            }
        }
    }

    async fn exists(&self, job_id: &str) -> Result<bool> {
        validate_job_id(job_id)?;
        let locator = manifest_key(job_id);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(locator.as_str())
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|se| se.is_not_found()) == Some(true) => Ok(false),
            Err(e) => Err(ExtractError::storage(format!(
                "head {}: {}",
                locator,
                DisplayErrorContext(&e)
            ))),
        }
    }
}
