//! Local staging area for raw downloads and transcoded output.
//!
//! Both directories are shared by every in-flight request. Nothing here lists or
//! scans them; each run only touches the filenames it was given.

use crate::config::StagingConfig;
use crate::error::{PipelineError, Result};
use crate::request::ObjectName;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a delete actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Raw inbox and processed outbox directories
#[derive(Debug, Clone)]
pub struct StagingArea {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
}

impl StagingArea {
    pub fn new(raw_dir: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            processed_dir: processed_dir.into(),
        }
    }

    pub fn from_config(config: &StagingConfig) -> Self {
        Self::new(&config.raw_dir, &config.processed_dir)
    }

    /// Create both staging directories, including missing parents.
    ///
    /// Safe to call repeatedly or concurrently. Must complete before the first
    /// pipeline run.
    pub async fn ensure_ready(&self) -> Result<()> {
        for dir in [&self.raw_dir, &self.processed_dir] {
            if tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
                continue;
            }
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::filesystem(dir, e))?;
            info!(path = %dir.display(), "Staging directory created");
        }
        Ok(())
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn raw_path(&self, name: &ObjectName) -> PathBuf {
        self.raw_dir.join(name.as_str())
    }

    pub fn processed_path(&self, name: &ObjectName) -> PathBuf {
        self.processed_dir.join(name.as_str())
    }

    /// Delete a staged file. A file that is already gone counts as cleaned.
    pub async fn delete_local_file(&self, path: &Path) -> Result<DeleteOutcome> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Staged file deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Staged file not found, skipping delete");
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(e) => Err(PipelineError::filesystem(path, e)),
        }
    }
}

/// Blocking variant of [`StagingArea::delete_local_file`] for use from `Drop`
pub(crate) fn remove_file_if_present(path: &Path) -> Result<DeleteOutcome> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(DeleteOutcome::Deleted),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::AlreadyAbsent),
        Err(e) => Err(PipelineError::filesystem(path, e)),
    }
}
