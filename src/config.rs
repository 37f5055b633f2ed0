//! Configuration System
//!
//! Layered configuration for storage, the generation gateway, the pipeline,
//! the local task queue and logging. Sources merge defaults, a global file,
//! workspace files and `LESSONFORGE__*` environment variables.

use crate::logging::LoggingConfig;
use crate::orchestrator::{LessonFailurePolicy, PipelineSettings};
use crate::queue::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::{ConfigLoader, ENV_PREFIX};
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where units, lessons and blobs live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory; defaults to the platform data dir for `lessonforge`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "lessonforge")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".lessonforge"))
    }

    /// sled database holding unit and lesson records
    pub fn units_db_path(&self) -> PathBuf {
        self.resolved_data_dir().join("units.db")
    }

    /// Root handed to the blob store, which adds its own `blobs/` segment
    pub fn blob_root(&self) -> PathBuf {
        self.resolved_data_dir()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_endpoint")]
    pub endpoint: String,

    /// Literal API key; prefer `api_key_env`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gateway_endpoint() -> String {
    "http://localhost:8080/v1/generate".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("LESSONFORGE_GATEWAY_API_KEY".to_string())
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_gateway_endpoint(),
            api_key: None,
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|key| !key.is_empty())
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Storage(String),
    Gateway(String),
    Pipeline(String),
    Queue(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ValidationError::Gateway(msg) => write!(f, "Gateway: {}", msg),
            ValidationError::Pipeline(msg) => write!(f, "Pipeline: {}", msg),
            ValidationError::Queue(msg) => write!(f, "Queue: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ForgeConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Some(dir) = &self.storage.data_dir {
            if dir.as_os_str().is_empty() {
                errors.push(ValidationError::Storage(
                    "Data directory cannot be empty".to_string(),
                ));
            }
        }

        let endpoint = self.gateway.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            errors.push(ValidationError::Gateway(format!(
                "Endpoint must be an http(s) URL, got '{}'",
                self.gateway.endpoint
            )));
        }
        if self.gateway.request_timeout_secs == 0 {
            errors.push(ValidationError::Gateway(
                "Request timeout must be at least 1 second".to_string(),
            ));
        }

        if let LessonFailurePolicy::Threshold {
            max_failed_fraction,
        } = self.pipeline.failure_policy
        {
            if !(0.0..=1.0).contains(&max_failed_fraction) {
                errors.push(ValidationError::Pipeline(format!(
                    "max_failed_fraction must be within [0, 1], got {}",
                    max_failed_fraction
                )));
            }
        }
        if self.pipeline.placeholder_title.trim().is_empty() {
            errors.push(ValidationError::Pipeline(
                "Placeholder title cannot be empty".to_string(),
            ));
        }

        if self.queue.workers == 0 {
            errors.push(ValidationError::Queue(
                "At least one worker is required".to_string(),
            ));
        }
        if self.queue.job_timeout_secs == Some(0) {
            errors.push(ValidationError::Queue(
                "Job timeout must be at least 1 second; omit it to disable".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
