use serde::Deserialize;
use std::path::{Component, Path};

/// Main configuration for the video processing service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Bucket configuration
    pub storage: StorageConfig,
    /// Local staging directories
    #[serde(default)]
    pub staging: StagingConfig,
    /// External transcoder configuration
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 configuration for the raw and processed buckets
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket uploaded videos land in
    pub raw_bucket: String,
    /// Bucket transcoded videos are published to
    pub processed_bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// SDK attempts per request; 1 disables retries
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base URL processed objects are served from, if not the bucket itself
    pub public_base_url: Option<String>,
}

/// Local staging directories
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_raw_dir")]
    pub raw_dir: String,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: String,
}

/// External transcoder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderConfig {
    /// ffmpeg binary, resolved through PATH when not absolute
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

/// API configuration for the pipeline endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "video-processing-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_attempts() -> u32 {
    1
}

fn default_raw_dir() -> String {
    "./raw-videos".to_string()
}

fn default_processed_dir() -> String {
    "./processed-videos".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = ::config::Config::builder()
            // Add config file if present
            .add_source(::config::File::with_name("config/video-processing").required(false))
            .add_source(
                ::config::File::with_name("/etc/video-processing/service").required(false),
            )
            // Override with environment variables
            // VIDEO_PROCESSING__STORAGE__RAW_BUCKET -> storage.raw_bucket
            .add_source(
                ::config::Environment::with_prefix("VIDEO_PROCESSING")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.raw_bucket.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.raw_bucket".to_string(),
            ));
        }
        if self.storage.processed_bucket.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.processed_bucket".to_string(),
            ));
        }
        if self.storage.raw_bucket == self.storage.processed_bucket {
            return Err(ConfigValidationError::InvalidValue {
                field: "storage.processed_bucket".to_string(),
                message: "must differ from storage.raw_bucket".to_string(),
            });
        }
        if self.storage.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "storage.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if same_dir(&self.staging.raw_dir, &self.staging.processed_dir) {
            return Err(ConfigValidationError::InvalidValue {
                field: "staging.processed_dir".to_string(),
                message: "must differ from staging.raw_dir".to_string(),
            });
        }
        if self.transcoder.ffmpeg_path.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "transcoder.ffmpeg_path".to_string(),
            ));
        }
        Ok(())
    }
}

impl StorageConfig {
    /// Public URL a processed object is readable at once published
    pub fn public_url(&self, key: &str) -> String {
        let key = urlencoding::encode(key);
        if let Some(ref base) = self.public_base_url {
            format!("{}/{}", base.trim_end_matches('/'), key)
        } else if let Some(ref endpoint) = self.endpoint_url {
            format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.processed_bucket,
                key
            )
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.processed_bucket, self.region, key
            )
        }
    }
}

/// Whether two configured directories name the same path, ignoring `.` components
/// and trailing separators
fn same_dir(a: &str, b: &str) -> bool {
    fn normal(path: &str) -> Vec<Component<'_>> {
        Path::new(path)
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }
    normal(a) == normal(b)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            processed_dir: default_processed_dir(),
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
