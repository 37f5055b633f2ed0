//! HTTP-backed generation gateway.
//!
//! Sends `{"stage": ..., "inputs": ...}` to a single endpoint and expects
//! `{"output": ...}` back. Status codes map onto [`GenerationError`].

use crate::generation::gateway::{ContentGenerationGateway, GenerationError, GenerationStage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const GATEWAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct StageRequest<'a> {
    stage: GenerationStage,
    inputs: &'a Value,
}

#[derive(Deserialize)]
struct StageResponse {
    output: Value,
}

fn map_http_error(stage: GenerationStage, error: reqwest::Error) -> GenerationError {
    if let Some(status) = error.status() {
        match status.as_u16() {
            401 | 403 => GenerationError::Unauthorized(format!("{}: {}", stage, error)),
            429 => GenerationError::RateLimited(format!("{}: {}", stage, error)),
            _ => GenerationError::StageFailed {
                stage,
                message: format!("status {}: {}", status, error),
            },
        }
    } else if error.is_timeout() {
        GenerationError::Transport(format!("{} request timed out: {}", stage, error))
    } else if error.is_connect() {
        GenerationError::Transport(format!("connection error: {}", error))
    } else if error.is_decode() {
        GenerationError::MalformedOutput {
            stage,
            message: error.to_string(),
        }
    } else {
        GenerationError::Transport(error.to_string())
    }
}

pub struct HttpGenerationGateway {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpGenerationGateway {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(GATEWAY_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                GenerationError::Transport(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Shared client, reused for downloading URL-delivered media.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ContentGenerationGateway for HttpGenerationGateway {
    async fn execute(
        &self,
        stage: GenerationStage,
        inputs: Value,
    ) -> Result<Value, GenerationError> {
        let mut request = self.client.post(&self.endpoint).json(&StageRequest {
            stage,
            inputs: &inputs,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(stage = %stage, endpoint = %self.endpoint, "Gateway request sent");
        let started = std::time::Instant::now();
        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| map_http_error(stage, e))?;
        let body: StageResponse = response
            .json()
            .await
            .map_err(|e| map_http_error(stage, e))?;
        info!(
            stage = %stage,
            duration_ms = started.elapsed().as_millis(),
            "Gateway response received"
        );
        Ok(body.output)
    }
}
