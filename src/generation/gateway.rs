//! Generation gateway contract: named stages in, structured JSON out.

use crate::unit::Exercise;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    PlanUnit,
    Lesson,
    Art,
    Podcast,
}

impl GenerationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStage::PlanUnit => "plan_unit",
            GenerationStage::Lesson => "lesson",
            GenerationStage::Art => "art",
            GenerationStage::Podcast => "podcast",
        }
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("{stage} stage failed: {message}")]
    StageFailed {
        stage: GenerationStage,
        message: String,
    },

    #[error("Malformed {stage} output: {message}")]
    MalformedOutput {
        stage: GenerationStage,
        message: String,
    },

    #[error("Gateway rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Gateway authentication failed: {0}")]
    Unauthorized(String),

    #[error("Gateway request failed: {0}")]
    Transport(String),
}

/// External generation backend. Calls are slow, fallible and not idempotent.
#[async_trait]
pub trait ContentGenerationGateway: Send + Sync {
    async fn execute(&self, stage: GenerationStage, inputs: Value)
        -> Result<Value, GenerationError>;
}

/// Run a stage and deserialize its output.
pub async fn execute_typed<T: DeserializeOwned>(
    gateway: &dyn ContentGenerationGateway,
    stage: GenerationStage,
    inputs: Value,
) -> Result<T, GenerationError> {
    let output = gateway.execute(stage, inputs).await?;
    serde_json::from_value(output).map_err(|e| GenerationError::MalformedOutput {
        stage,
        message: e.to_string(),
    })
}

/// Output of the `lesson` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonContent {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub exercises: Vec<Exercise>,
}

/// How a media stage hands back its binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum MediaPayload {
    Base64 { data: String },
    Url { url: String },
}

/// Output of the `art` and `podcast` stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaOutput {
    pub content_type: String,
    pub payload: MediaPayload,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}
