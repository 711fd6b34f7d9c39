//! Video Processing Service
//!
//! Takes an uploaded video from the raw bucket, transcodes it to 360p on local
//! disk and publishes the result to the processed bucket with public read
//! access. Local copies are removed on every exit path, successful or not.
//!
//! ## Architecture
//!
//! ```text
//!  POST /process-video
//!          │
//!          ▼
//! ┌──────────────────┐  fetch_raw   ┌──────────────┐        ┌──────────────┐
//! │ VideoPipeline    │─────────────▶│ RemoteStore  │◀──────▶│ S3 buckets   │
//! │                  │  publish     │              │        │ raw/processed│
//! │ Downloading      │─────────────▶└──────────────┘        └──────────────┘
//! │ Transcoding      │
//! │ Uploading        │  transcode   ┌──────────────┐        ┌──────────────┐
//! │ CleaningUp       │─────────────▶│ Transcoder   │───────▶│ ffmpeg       │
//! └──────────────────┘              └──────────────┘        └──────────────┘
//!          │                                │
//!          ▼                                ▼
//! ┌─────────────────────────────────────────────────┐
//! │ StagingArea   ./raw-videos   ./processed-videos │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod object_store;
pub mod pipeline;
pub mod request;
pub mod staging;
pub mod transcoder;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::{PipelineError, PublishFailure};
pub use object_store::{ObjectNotFound, ObjectStore, PublishedObject, RemoteStore, S3ObjectStore};
pub use pipeline::{PipelineFailure, PipelineReport, PipelineStage, VideoPipeline};
pub use request::{ObjectName, ProcessRequest};
pub use staging::{DeleteOutcome, StagingArea};
pub use transcoder::{FfmpegTranscoder, Transcoder};
