use crate::pipeline::PipelineStage;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by every pipeline component
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Which half of a publish failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFailure {
    /// The object never reached the processed bucket
    Upload,
    /// The object was uploaded but is still private
    AccessGrant,
}

impl fmt::Display for PublishFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishFailure::Upload => f.write_str("Upload failed"),
            PublishFailure::AccessGrant => {
                f.write_str("Public access grant failed, object stored privately")
            }
        }
    }
}

/// Errors raised while staging, transcoding or publishing a video
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid object name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch s3://{bucket}/{name}: {message}")]
    RemoteFetch {
        bucket: String,
        name: String,
        message: String,
        /// The object does not exist in the raw bucket
        missing: bool,
    },

    #[error("Transcode of {} failed: {message}", input.display())]
    Transcode { input: PathBuf, message: String },

    #[error("{kind} for s3://{bucket}/{name}: {message}")]
    RemotePublish {
        kind: PublishFailure,
        bucket: String,
        name: String,
        message: String,
    },
}

impl PipelineError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Stage whose work produced this error
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::InvalidName { .. } => PipelineStage::Idle,
            PipelineError::Filesystem { .. } => PipelineStage::CleaningUp,
            PipelineError::RemoteFetch { .. } => PipelineStage::Downloading,
            PipelineError::Transcode { .. } => PipelineStage::Transcoding,
            PipelineError::RemotePublish { .. } => PipelineStage::Uploading,
        }
    }

    /// True when the processed object was uploaded but could not be made public
    pub fn is_partial_publish(&self) -> bool {
        matches!(
            self,
            PipelineError::RemotePublish {
                kind: PublishFailure::AccessGrant,
                ..
            }
        )
    }
}
