//! Transcoder adapter around an external ffmpeg process.
//!
//! The engine runs as a child process. A watcher task owns the child and reports
//! exactly one [`TranscodeEvent`] on a oneshot channel, which the caller awaits.
//! There is no progress reporting, cancellation or timeout.

use crate::config::TranscoderConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// Output height in lines; width follows the source aspect ratio
pub const TARGET_HEIGHT: u32 = 360;

/// Stderr lines kept as the failure diagnostic
const DIAGNOSTIC_LINES: usize = 20;

/// The video filter applied to every transcode.
///
/// `-2` keeps the aspect ratio and rounds the width to an even number, which
/// yuv420p encoders require.
pub fn scale_filter() -> String {
    format!("scale=-2:{TARGET_HEIGHT}")
}

/// Converts a staged raw video into the fixed playback profile
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcode `input` into `output`. On failure the state of `output` is undefined.
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Terminal event of one engine invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeEvent {
    Finished,
    Failed(String),
}

/// Runs ffmpeg as a child process
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn from_config(config: &TranscoderConfig) -> Self {
        Self::new(config.ffmpeg_path.clone())
    }

    fn command_args(input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            input.into(),
            "-vf".into(),
            scale_filter().into(),
            output.into(),
        ]
    }

    /// Start the engine and return the channel its single terminal event arrives on
    fn start(&self, input: &Path, output: &Path) -> oneshot::Receiver<TranscodeEvent> {
        let (tx, rx) = oneshot::channel();

        let spawned = Command::new(&self.ffmpeg_path)
            .args(Self::command_args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let _ = tx.send(TranscodeEvent::Failed(format!(
                    "failed to start {}: {e}",
                    self.ffmpeg_path
                )));
                return rx;
            }
        };

        debug!(pid = ?child.id(), "Transcoder process started");

        tokio::spawn(async move {
            let event = match child.wait_with_output().await {
                Ok(output) if output.status.success() => TranscodeEvent::Finished,
                Ok(output) => {
                    TranscodeEvent::Failed(engine_diagnostic(output.status, &output.stderr))
                }
                Err(e) => TranscodeEvent::Failed(format!("failed to wait for transcoder: {e}")),
            };
            if tx.send(event).is_err() {
                warn!("Transcode result dropped, caller no longer waiting");
            }
        });

        rx
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    #[instrument(skip(self, input, output), fields(input = %input.display(), output = %output.display()))]
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        let started = Instant::now();

        let event = self.start(input, output).await.unwrap_or_else(|_| {
            TranscodeEvent::Failed("transcoder exited without reporting a result".to_string())
        });

        match event {
            TranscodeEvent::Finished => {
                info!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    filter = %scale_filter(),
                    "Processing finished successfully"
                );
                Ok(())
            }
            TranscodeEvent::Failed(message) => {
                warn!(error = %message, "Transcoder reported failure");
                Err(PipelineError::Transcode {
                    input: PathBuf::from(input),
                    message,
                })
            }
        }
    }
}

/// Tail of the engine's stderr, or the exit status when it printed nothing
fn engine_diagnostic(status: ExitStatus, stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return format!("transcoder exited with {status}");
    }
    let start = lines.len().saturating_sub(DIAGNOSTIC_LINES);
    lines[start..].join("\n")
}
