use crate::config::ApiConfig;
use crate::error::PipelineError;
use crate::pipeline::{PipelineFailure, PipelineReport, PipelineStage, VideoPipeline};
use crate::request::{ObjectName, ProcessRequest};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<VideoPipeline>,
    pub service_name: String,
}

/// Body of a pipeline request
#[derive(Debug, Deserialize)]
pub struct ProcessVideoRequest {
    /// Object in the raw bucket
    pub raw_name: String,
    /// Name to publish under; defaults to `raw_name`
    pub processed_name: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub stage: PipelineStage,
    /// Object was uploaded but is not publicly readable
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup_errors: Vec<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/process-video", post(process_video))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name
    }))
}

/// Run the pipeline for one video and report its outcome
#[instrument(skip(state))]
async fn process_video(
    State(state): State<AppState>,
    Json(body): Json<ProcessVideoRequest>,
) -> Result<Json<PipelineReport>, ApiError> {
    let raw = ObjectName::parse(body.raw_name).map_err(|e| rejection(&e, PipelineStage::Idle))?;
    let processed = match body.processed_name {
        Some(name) => ObjectName::parse(name).map_err(|e| rejection(&e, PipelineStage::Idle))?,
        None => raw.clone(),
    };
    let request = ProcessRequest::new(raw, processed);

    // Own the run in its own task so a dropped connection cannot interrupt cleanup.
    let pipeline = state.pipeline.clone();
    let run = tokio::spawn(async move { pipeline.run(&request).await });

    match run.await {
        Ok(Ok(report)) => Ok(Json(report)),
        Ok(Err(failure)) => Err(failure_response(failure)),
        Err(e) => {
            error!(error = %e, "Pipeline task panicked");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Pipeline task aborted".to_string(),
                    code: "INTERNAL_ERROR".to_string(),
                    stage: PipelineStage::Failed,
                    partial: false,
                    cleanup_errors: Vec::new(),
                }),
            ))
        }
    }
}

/// HTTP status and error code for a pipeline error
fn status_for(error: &PipelineError) -> (StatusCode, &'static str) {
    match error {
        PipelineError::InvalidName { .. } => (StatusCode::BAD_REQUEST, "INVALID_NAME"),
        PipelineError::RemoteFetch { missing: true, .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        PipelineError::RemoteFetch { .. } => (StatusCode::BAD_GATEWAY, "FETCH_FAILED"),
        PipelineError::Transcode { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "TRANSCODE_FAILED"),
        PipelineError::RemotePublish { .. } if error.is_partial_publish() => {
            (StatusCode::BAD_GATEWAY, "PUBLIC_ACCESS_FAILED")
        }
        PipelineError::RemotePublish { .. } => (StatusCode::BAD_GATEWAY, "UPLOAD_FAILED"),
        PipelineError::Filesystem { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "FILESYSTEM_ERROR"),
    }
}

fn rejection(error: &PipelineError, stage: PipelineStage) -> ApiError {
    let (status, code) = status_for(error);
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
            stage,
            partial: error.is_partial_publish(),
            cleanup_errors: Vec::new(),
        }),
    )
}

fn failure_response(failure: PipelineFailure) -> ApiError {
    let (status, mut body) = rejection(&failure.error, failure.failed_stage);
    body.cleanup_errors = failure
        .cleanup_errors
        .iter()
        .map(ToString::to_string)
        .collect();
    (status, body)
}

/// Start the pipeline API server, stopping when `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting video processing API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
