//! Remote object store access for the raw and processed buckets.
//!
//! [`ObjectStore`] is the bucket-level seam (download, upload, ACL) and
//! [`S3ObjectStore`] its production implementation. [`RemoteStore`] binds a store
//! to the two configured buckets and the staging area and maps failures onto
//! [`PipelineError`].

use crate::config::StorageConfig;
use crate::error::{PipelineError, PublishFailure, Result};
use crate::request::ObjectName;
use crate::staging::StagingArea;
use anyhow::Context;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// The requested object does not exist in its bucket
#[derive(Debug, thiserror::Error)]
#[error("Object s3://{bucket}/{key} does not exist")]
pub struct ObjectNotFound {
    pub bucket: String,
    pub key: String,
}

/// Bucket operations the pipeline depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream `bucket/key` into `destination`, returning the bytes written.
    /// Fails with [`ObjectNotFound`] in the error chain when the key is missing.
    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> anyhow::Result<u64>;

    /// Upload the file at `source` to `bucket/key`
    async fn upload_from_file(&self, bucket: &str, key: &str, source: &Path)
        -> anyhow::Result<()>;

    /// Allow anonymous reads of `bucket/key`
    async fn grant_public_read(&self, bucket: &str, key: &str) -> anyhow::Result<()>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a new S3 client for the configured region and endpoint
    pub async fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            raw_bucket = %config.raw_bucket,
            processed_bucket = %config.processed_bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, destination), fields(destination = %destination.display()))]
    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> anyhow::Result<u64> {
        let mut object = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(object) => object,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Err(ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                    .into());
                }
                return Err(e).context("Failed to get object from S3");
            }
        };

        let mut file = tokio::fs::File::create(destination)
            .await
            .with_context(|| format!("Failed to create {}", destination.display()))?;

        let mut written = 0u64;
        while let Some(chunk) = object
            .body
            .try_next()
            .await
            .context("Download interrupted")?
        {
            file.write_all(&chunk)
                .await
                .context("Failed to write staged file")?;
            written += chunk.len() as u64;
        }
        file.flush().await.context("Failed to flush staged file")?;

        debug!(size_bytes = written, "Object downloaded from S3");
        Ok(written)
    }

    #[instrument(skip(self, source), fields(source = %source.display()))]
    async fn upload_from_file(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
    ) -> anyhow::Result<()> {
        let body = ByteStream::from_path(source)
            .await
            .with_context(|| format!("Failed to open {}", source.display()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(get_content_type(key))
            .send()
            .await
            .context("Failed to upload object to S3")?;

        debug!("Object uploaded to S3");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn grant_public_read(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        self.client
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .context("Failed to set public-read ACL")?;

        Ok(())
    }
}

/// Get content type from a video filename
fn get_content_type(key: &str) -> &'static str {
    let extension = key.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension.to_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// A processed video that is live in the processed bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedObject {
    pub bucket: String,
    pub key: String,
    pub public_url: String,
}

/// The raw and processed buckets as seen by the pipeline
#[derive(Clone)]
pub struct RemoteStore {
    store: Arc<dyn ObjectStore>,
    staging: Arc<StagingArea>,
    config: StorageConfig,
}

impl RemoteStore {
    pub fn new(store: Arc<dyn ObjectStore>, staging: Arc<StagingArea>, config: StorageConfig) -> Self {
        Self {
            store,
            staging,
            config,
        }
    }

    pub fn raw_bucket(&self) -> &str {
        &self.config.raw_bucket
    }

    pub fn processed_bucket(&self) -> &str {
        &self.config.processed_bucket
    }

    /// Download raw object `name` to the raw staging path of the same name.
    ///
    /// A partially written file is left for the caller's cleanup.
    #[instrument(skip(self), fields(bucket = %self.config.raw_bucket))]
    pub async fn fetch_raw(&self, name: &ObjectName) -> Result<PathBuf> {
        let destination = self.staging.raw_path(name);

        let size_bytes = self
            .store
            .download_to_file(&self.config.raw_bucket, name.as_str(), &destination)
            .await
            .map_err(|e| PipelineError::RemoteFetch {
                bucket: self.config.raw_bucket.clone(),
                name: name.to_string(),
                missing: e.downcast_ref::<ObjectNotFound>().is_some(),
                message: format!("{e:#}"),
            })?;

        info!(
            object = %name,
            path = %destination.display(),
            size_bytes,
            "Raw video downloaded"
        );
        Ok(destination)
    }

    /// Upload processed staging file `name` under the same key, then make it public.
    ///
    /// The access grant only runs after a successful upload; its failure is
    /// reported as [`PublishFailure::AccessGrant`].
    #[instrument(skip(self), fields(bucket = %self.config.processed_bucket))]
    pub async fn publish_processed(&self, name: &ObjectName) -> Result<PublishedObject> {
        let source = self.staging.processed_path(name);
        let bucket = &self.config.processed_bucket;

        self.store
            .upload_from_file(bucket, name.as_str(), &source)
            .await
            .map_err(|e| self.publish_error(PublishFailure::Upload, name, e))?;

        info!(object = %name, "Processed video uploaded");

        self.store
            .grant_public_read(bucket, name.as_str())
            .await
            .map_err(|e| self.publish_error(PublishFailure::AccessGrant, name, e))?;

        let published = PublishedObject {
            bucket: bucket.clone(),
            key: name.to_string(),
            public_url: self.config.public_url(name.as_str()),
        };

        info!(object = %name, url = %published.public_url, "Processed video is public");
        Ok(published)
    }

    fn publish_error(&self, kind: PublishFailure, name: &ObjectName, e: anyhow::Error) -> PipelineError {
        PipelineError::RemotePublish {
            kind,
            bucket: self.config.processed_bucket.clone(),
            name: name.to_string(),
            message: format!("{e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage_config() -> StorageConfig {
        StorageConfig {
            raw_bucket: "raw".to_string(),
            processed_bucket: "processed".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            max_attempts: 1,
            public_base_url: None,
        }
    }

    fn remote(store: MockObjectStore, root: &TempDir) -> RemoteStore {
        let staging = Arc::new(StagingArea::new(
            root.path().join("raw"),
            root.path().join("processed"),
        ));
        RemoteStore::new(Arc::new(store), staging, storage_config())
    }

    fn name(s: &str) -> ObjectName {
        ObjectName::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_raw_downloads_to_raw_staging() {
        let root = TempDir::new().unwrap();
        let expected = root.path().join("raw").join("clip1.mp4");

        let mut store = MockObjectStore::new();
        let check = expected.clone();
        store
            .expect_download_to_file()
            .withf(move |bucket, key, destination| {
                bucket == "raw" && key == "clip1.mp4" && destination == check.as_path()
            })
            .times(1)
            .returning(|_, _, _| Ok(42));

        let path = remote(store, &root).fetch_raw(&name("clip1.mp4")).await.unwrap();
        assert_eq!(path, expected);
    }

    #[tokio::test]
    async fn test_fetch_raw_missing_object() {
        let root = TempDir::new().unwrap();

        let mut store = MockObjectStore::new();
        store.expect_download_to_file().returning(|bucket, key, _| {
            Err(ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }
            .into())
        });

        let err = remote(store, &root)
            .fetch_raw(&name("missing.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::RemoteFetch { missing: true, .. }));
    }

    #[tokio::test]
    async fn test_fetch_raw_interrupted_transfer() {
        let root = TempDir::new().unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_download_to_file()
            .returning(|_, _, _| Err(anyhow::anyhow!("connection reset by peer")));

        let err = remote(store, &root)
            .fetch_raw(&name("clip1.mp4"))
            .await
            .unwrap_err();
        match err {
            PipelineError::RemoteFetch {
                missing, message, ..
            } => {
                assert!(!missing);
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_publish_uploads_then_grants() {
        let root = TempDir::new().unwrap();

        let mut seq = mockall::Sequence::new();
        let mut store = MockObjectStore::new();
        store
            .expect_upload_from_file()
            .withf(|bucket, key, _| bucket == "processed" && key == "clip1.mp4")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        store
            .expect_grant_public_read()
            .withf(|bucket, key| bucket == "processed" && key == "clip1.mp4")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let published = remote(store, &root)
            .publish_processed(&name("clip1.mp4"))
            .await
            .unwrap();
        assert_eq!(published.bucket, "processed");
        assert_eq!(
            published.public_url,
            "https://processed.s3.us-east-1.amazonaws.com/clip1.mp4"
        );
    }

    #[tokio::test]
    async fn test_publish_upload_failure_skips_grant() {
        let root = TempDir::new().unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_upload_from_file()
            .returning(|_, _, _| Err(anyhow::anyhow!("503 Slow Down")));
        store.expect_grant_public_read().never();

        let err = remote(store, &root)
            .publish_processed(&name("clip1.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RemotePublish {
                kind: PublishFailure::Upload,
                ..
            }
        ));
        assert!(!err.is_partial_publish());
    }

    #[tokio::test]
    async fn test_publish_grant_failure_is_partial() {
        let root = TempDir::new().unwrap();

        let mut store = MockObjectStore::new();
        store.expect_upload_from_file().returning(|_, _, _| Ok(()));
        store
            .expect_grant_public_read()
            .returning(|_, _| Err(anyhow::anyhow!("AccessDenied")));

        let err = remote(store, &root)
            .publish_processed(&name("clip1.mp4"))
            .await
            .unwrap_err();
        assert!(err.is_partial_publish());
    }

    #[test]
    fn test_get_content_type() {
        assert_eq!(get_content_type("clip1.mp4"), "video/mp4");
        assert_eq!(get_content_type("CLIP1.MP4"), "video/mp4");
        assert_eq!(get_content_type("clip.webm"), "video/webm");
        assert_eq!(get_content_type("clip.mov"), "video/quicktime");
        assert_eq!(get_content_type("clip"), "application/octet-stream");
    }
}
