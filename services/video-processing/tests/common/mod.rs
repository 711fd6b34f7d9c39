#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use video_processing::config::StorageConfig;
use video_processing::{
    ObjectNotFound, ObjectStore, PipelineError, RemoteStore, StagingArea, Transcoder,
    VideoPipeline,
};

pub const RAW_BUCKET: &str = "yt-raw-videos";
pub const PROCESSED_BUCKET: &str = "yt-processed-videos";

type ObjectKey = (String, String);

/// Bucket store kept in memory, with switchable failure modes
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<ObjectKey, Vec<u8>>>,
    public: Mutex<HashSet<ObjectKey>>,
    interrupt_downloads: bool,
    fail_uploads: bool,
    fail_grants: bool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, key: &str, data: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
        self
    }

    /// Downloads write half the object, then fail
    pub fn interrupting_downloads(mut self) -> Self {
        self.interrupt_downloads = true;
        self
    }

    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    pub fn failing_grants(mut self) -> Self {
        self.fail_grants = true;
        self
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn is_public(&self, bucket: &str, key: &str) -> bool {
        self.public
            .lock()
            .unwrap()
            .contains(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> anyhow::Result<u64> {
        let data = self.object(bucket, key).ok_or_else(|| ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;

        if self.interrupt_downloads {
            tokio::fs::write(destination, &data[..data.len() / 2]).await?;
            anyhow::bail!("connection reset by peer");
        }

        tokio::fs::write(destination, &data).await?;
        Ok(data.len() as u64)
    }

    async fn upload_from_file(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
    ) -> anyhow::Result<()> {
        if self.fail_uploads {
            anyhow::bail!("503 Service Unavailable");
        }
        let data = tokio::fs::read(source).await?;
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data);
        Ok(())
    }

    async fn grant_public_read(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        if self.fail_grants {
            anyhow::bail!("AccessDenied: public ACLs are blocked on this bucket");
        }
        if self.object(bucket, key).is_none() {
            return Err(ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }
            .into());
        }
        self.public
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// How the scripted transcoder behaves
#[derive(Debug, Clone, Copy)]
pub enum TranscodeBehavior {
    /// Write a 360p marker followed by the input bytes
    Succeed,
    /// Reject the input without writing any output
    RejectCorruptInput,
    /// Write some output, then fail
    CrashMidway,
}

pub struct ScriptedTranscoder {
    behavior: TranscodeBehavior,
    calls: AtomicUsize,
}

impl ScriptedTranscoder {
    pub fn new(behavior: TranscodeBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = |message: &str| PipelineError::Transcode {
            input: input.to_path_buf(),
            message: message.to_string(),
        };

        let source = tokio::fs::read(input)
            .await
            .map_err(|e| failure(&e.to_string()))?;

        match self.behavior {
            TranscodeBehavior::Succeed => {
                let mut data = b"360p:".to_vec();
                data.extend_from_slice(&source);
                tokio::fs::write(output, data)
                    .await
                    .map_err(|e| failure(&e.to_string()))?;
                Ok(())
            }
            TranscodeBehavior::RejectCorruptInput => {
                Err(failure("Invalid data found when processing input"))
            }
            TranscodeBehavior::CrashMidway => {
                tokio::fs::write(output, b"360p:trunc")
                    .await
                    .map_err(|e| failure(&e.to_string()))?;
                Err(failure("transcoder exited with signal: 9 (SIGKILL)"))
            }
        }
    }
}

pub fn storage_config() -> StorageConfig {
    StorageConfig {
        raw_bucket: RAW_BUCKET.to_string(),
        processed_bucket: PROCESSED_BUCKET.to_string(),
        region: "us-east-1".to_string(),
        endpoint_url: None,
        force_path_style: false,
        max_attempts: 1,
        public_base_url: Some("https://storage.example.com/yt-processed-videos".to_string()),
    }
}

/// A pipeline wired to in-memory collaborators and a temporary staging area
pub struct Harness {
    _root: TempDir,
    pub store: Arc<MemoryObjectStore>,
    pub transcoder: Arc<ScriptedTranscoder>,
    pub staging: Arc<StagingArea>,
    pub pipeline: Arc<VideoPipeline>,
}

impl Harness {
    pub async fn new(store: MemoryObjectStore, behavior: TranscodeBehavior) -> Self {
        let root = TempDir::new().unwrap();
        let staging = Arc::new(StagingArea::new(
            root.path().join("raw-videos"),
            root.path().join("processed-videos"),
        ));
        staging.ensure_ready().await.unwrap();

        let store = Arc::new(store);
        let transcoder = Arc::new(ScriptedTranscoder::new(behavior));
        let remote = RemoteStore::new(store.clone(), staging.clone(), storage_config());
        let pipeline = Arc::new(VideoPipeline::new(
            staging.clone(),
            remote,
            transcoder.clone(),
        ));

        Self {
            _root: root,
            store,
            transcoder,
            staging,
            pipeline,
        }
    }

    /// Every file left in either staging directory
    pub fn leftover_files(&self) -> Vec<PathBuf> {
        [self.staging.raw_dir(), self.staging.processed_dir()]
            .iter()
            .flat_map(|dir| std::fs::read_dir(dir).unwrap())
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}
