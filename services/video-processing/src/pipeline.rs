//! Pipeline orchestrator: download, transcode, publish, then clean up.
//!
//! Stages run strictly in order and the first failure short-circuits the rest.
//! Local files are held by a [`LocalArtifacts`] scope that is released exactly
//! once after the stages finish, whatever their outcome, so cleanup is never
//! skipped and never duplicated across failure branches.

use crate::error::PipelineError;
use crate::object_store::{PublishedObject, RemoteStore};
use crate::request::{ObjectName, ProcessRequest};
use crate::staging::{remove_file_if_present, StagingArea};
use crate::transcoder::Transcoder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Lifecycle of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Downloading,
    Transcoding,
    Uploading,
    CleaningUp,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Downloading => "downloading",
            PipelineStage::Transcoding => "transcoding",
            PipelineStage::Uploading => "uploading",
            PipelineStage::CleaningUp => "cleaning_up",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        matches!(
            (self, next),
            (Idle, Downloading)
                | (Downloading, Transcoding)
                | (Transcoding, Uploading)
                | (Downloading | Transcoding | Uploading, CleaningUp)
                | (CleaningUp, Done)
                | (Idle | Downloading | Transcoding | Uploading | CleaningUp, Failed)
        )
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records the stages a run passes through
#[derive(Debug)]
struct StageTracker {
    history: Vec<PipelineStage>,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            history: vec![PipelineStage::Idle],
        }
    }

    fn current(&self) -> PipelineStage {
        *self.history.last().unwrap_or(&PipelineStage::Idle)
    }

    fn advance(&mut self, next: PipelineStage) {
        let current = self.current();
        debug_assert!(
            current.can_transition_to(next),
            "invalid pipeline transition {current} -> {next}"
        );
        debug!(from = %current, to = %next, "Pipeline stage transition");
        self.history.push(next);
    }
}

/// Confirmation that a processed video is live and nothing is left on disk
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub request_id: Uuid,
    pub raw_name: ObjectName,
    pub processed_name: ObjectName,
    pub published: PublishedObject,
    pub stages: Vec<PipelineStage>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// A run that ended in [`PipelineStage::Failed`]
#[derive(Debug)]
pub struct PipelineFailure {
    pub request_id: Uuid,
    /// Stage that produced `error`
    pub failed_stage: PipelineStage,
    /// The first error of the run
    pub error: PipelineError,
    /// Deletions that failed while cleaning up after `error`
    pub cleanup_errors: Vec<PipelineError>,
    pub stages: Vec<PipelineStage>,
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline failed while {}: {}", self.failed_stage, self.error)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// The two local files a run may produce.
///
/// Released explicitly with [`LocalArtifacts::release`]. If the run is dropped
/// before that, `Drop` deletes them synchronously on a best-effort basis.
struct LocalArtifacts<'a> {
    staging: &'a StagingArea,
    raw: PathBuf,
    processed: PathBuf,
    released: bool,
}

impl<'a> LocalArtifacts<'a> {
    fn acquire(staging: &'a StagingArea, request: &ProcessRequest) -> Self {
        Self {
            staging,
            raw: staging.raw_path(&request.raw),
            processed: staging.processed_path(&request.processed),
            released: false,
        }
    }

    /// Attempt both deletions and return every failure
    async fn release(mut self) -> Vec<PipelineError> {
        self.released = true;
        let mut failures = Vec::new();
        for path in [&self.raw, &self.processed] {
            match self.staging.delete_local_file(path).await {
                Ok(outcome) => debug!(path = %path.display(), ?outcome, "Staged file released"),
                Err(e) => {
                    error!(error = %e, "Failed to delete staged file");
                    metrics::counter!("video_processing.cleanup.failures").increment(1);
                    failures.push(e);
                }
            }
        }
        failures
    }
}

impl Drop for LocalArtifacts<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!("Pipeline run abandoned before cleanup, deleting staged files");
        for path in [&self.raw, &self.processed] {
            if let Err(e) = remove_file_if_present(path) {
                error!(error = %e, "Failed to delete staged file");
            }
        }
    }
}

/// Drives one request through download, transcode, publish and cleanup
pub struct VideoPipeline {
    staging: Arc<StagingArea>,
    remote: RemoteStore,
    transcoder: Arc<dyn Transcoder>,
}

impl VideoPipeline {
    /// The staging directories must already exist.
    pub fn new(
        staging: Arc<StagingArea>,
        remote: RemoteStore,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            staging,
            remote,
            transcoder,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Run the full pipeline for `request`.
    ///
    /// Both staged files are deleted on every exit path. On failure the returned
    /// error is the first one the run hit; cleanup problems ride along in
    /// [`PipelineFailure::cleanup_errors`].
    #[instrument(
        skip(self, request),
        fields(
            request_id = %request.request_id,
            raw = %request.raw,
            processed = %request.processed
        )
    )]
    pub async fn run(&self, request: &ProcessRequest) -> Result<PipelineReport, PipelineFailure> {
        let started = Instant::now();
        let mut tracker = StageTracker::new();

        info!("Pipeline run started");

        let artifacts = LocalArtifacts::acquire(&self.staging, request);
        let outcome = self.run_stages(request, &mut tracker).await;
        let failed_stage = tracker.current();

        tracker.advance(PipelineStage::CleaningUp);
        let mut cleanup_errors = artifacts.release().await;

        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(published) if cleanup_errors.is_empty() => {
                tracker.advance(PipelineStage::Done);
                metrics::counter!("video_processing.runs.completed").increment(1);
                info!(url = %published.public_url, elapsed_ms, "Pipeline run completed");

                Ok(PipelineReport {
                    request_id: request.request_id,
                    raw_name: request.raw.clone(),
                    processed_name: request.processed.clone(),
                    published,
                    stages: tracker.history,
                    completed_at: Utc::now(),
                    elapsed_ms,
                })
            }
            Ok(_) => {
                // Published, but local files survived: cleanup is the first failure.
                let error = cleanup_errors.remove(0);
                tracker.advance(PipelineStage::Failed);
                Err(self.fail(request, PipelineStage::CleaningUp, error, cleanup_errors, tracker))
            }
            Err(error) => {
                tracker.advance(PipelineStage::Failed);
                Err(self.fail(request, failed_stage, error, cleanup_errors, tracker))
            }
        }
    }

    async fn run_stages(
        &self,
        request: &ProcessRequest,
        tracker: &mut StageTracker,
    ) -> Result<PublishedObject, PipelineError> {
        tracker.advance(PipelineStage::Downloading);
        let raw_path = timed(PipelineStage::Downloading, self.remote.fetch_raw(&request.raw)).await?;

        tracker.advance(PipelineStage::Transcoding);
        let processed_path = self.staging.processed_path(&request.processed);
        timed(
            PipelineStage::Transcoding,
            self.transcoder.transcode(&raw_path, &processed_path),
        )
        .await?;

        tracker.advance(PipelineStage::Uploading);
        timed(
            PipelineStage::Uploading,
            self.remote.publish_processed(&request.processed),
        )
        .await
    }

    fn fail(
        &self,
        request: &ProcessRequest,
        failed_stage: PipelineStage,
        error: PipelineError,
        cleanup_errors: Vec<PipelineError>,
        tracker: StageTracker,
    ) -> PipelineFailure {
        metrics::counter!("video_processing.runs.failed", "stage" => failed_stage.as_str())
            .increment(1);
        error!(
            stage = %failed_stage,
            error = %error,
            cleanup_failures = cleanup_errors.len(),
            "Pipeline run failed"
        );

        PipelineFailure {
            request_id: request.request_id,
            failed_stage,
            error,
            cleanup_errors,
            stages: tracker.history,
        }
    }
}

/// Await a stage and record how long it took
async fn timed<T, F>(stage: PipelineStage, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    let started = Instant::now();
    let result = fut.await;
    metrics::histogram!("video_processing.stage.duration_seconds", "stage" => stage.as_str())
        .record(started.elapsed().as_secs_f64());
    result
}
