//! Unit media production: cover art and the narrated intro podcast.

use crate::blob::BlobStore;
use crate::error::UnitError;
use crate::generation::{
    execute_typed, ContentGenerationGateway, GenerationStage, MediaOutput, MediaPayload,
};
use crate::unit::{
    now_millis, LearnerLevel, LearningObjective, MediaAsset, MediaKind, Unit, UnitLifecycleStore,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts per media request; the second attempt is the only retry.
pub const MAX_MEDIA_ATTEMPTS: usize = 2;

#[derive(Serialize)]
struct MediaRequest<'a> {
    unit_title: &'a str,
    learner_level: LearnerLevel,
    learning_objectives: &'a [LearningObjective],
    lesson_titles: &'a [String],
}

struct FetchedMedia {
    output: MediaOutput,
    bytes: Vec<u8>,
}

fn stage_for(kind: MediaKind) -> GenerationStage {
    match kind {
        MediaKind::Art => GenerationStage::Art,
        MediaKind::Podcast => GenerationStage::Podcast,
    }
}

pub struct MediaProducer {
    gateway: Arc<dyn ContentGenerationGateway>,
    units: Arc<dyn UnitLifecycleStore>,
    blobs: Arc<dyn BlobStore>,
    http: Option<Client>,
}

impl MediaProducer {
    pub fn new(
        gateway: Arc<dyn ContentGenerationGateway>,
        units: Arc<dyn UnitLifecycleStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            gateway,
            units,
            blobs,
            http: None,
        }
    }

    /// Enable URL-delivered payloads.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Generate one media asset for `unit` and attach it, replacing any
    /// earlier asset of the same kind.
    pub async fn produce(
        &self,
        unit: &Unit,
        kind: MediaKind,
        lesson_titles: &[String],
    ) -> Result<MediaAsset, UnitError> {
        let request = MediaRequest {
            unit_title: &unit.title,
            learner_level: unit.learner_level,
            learning_objectives: &unit.learning_objectives,
            lesson_titles,
        };
        let inputs = serde_json::to_value(&request)
            .map_err(|e| UnitError::InvalidArgument(format!("{} request: {}", kind, e)))?;

        let mut last_error = String::new();
        let mut fetched = None;
        for attempt in 1..=MAX_MEDIA_ATTEMPTS {
            match self.attempt(kind, inputs.clone()).await {
                Ok(media) => {
                    fetched = Some(media);
                    break;
                }
                Err(message) => {
                    warn!(
                        unit_id = %unit.id,
                        kind = %kind,
                        attempt,
                        error = %message,
                        "Media attempt failed"
                    );
                    last_error = message;
                }
            }
        }
        let Some(FetchedMedia { output, bytes }) = fetched else {
            return Err(UnitError::TransientMediaFailure {
                kind,
                message: last_error,
            });
        };

        let blob = self.blobs.save(&bytes, &output.content_type).await?;
        let asset = MediaAsset {
            kind,
            blob,
            description: output.description,
            alt_text: output.alt_text,
            transcript: output.transcript,
            duration_seconds: output.duration_seconds,
            created_at_ms: now_millis(),
        };
        let previous = match self.units.attach_media(&unit.id, asset.clone()).await {
            Ok((_, previous)) => previous,
            Err(e) => {
                if let Err(release) = self.blobs.delete(&asset.blob).await {
                    warn!(unit_id = %unit.id, kind = %kind, error = %release, "Failed to release unattached media blob");
                }
                return Err(e.into());
            }
        };

        // The replaced asset held its own reference, even when the bytes match.
        if let Some(previous) = previous {
            if let Err(e) = self.blobs.delete(&previous.blob).await {
                warn!(unit_id = %unit.id, kind = %kind, error = %e, "Failed to delete replaced media blob");
            }
        }

        info!(
            unit_id = %unit.id,
            kind = %kind,
            blob = %asset.blob.key,
            size = asset.blob.size,
            "Media attached"
        );
        Ok(asset)
    }

    async fn attempt(&self, kind: MediaKind, inputs: serde_json::Value) -> Result<FetchedMedia, String> {
        let output: MediaOutput = execute_typed(self.gateway.as_ref(), stage_for(kind), inputs)
            .await
            .map_err(|e| e.to_string())?;

        if !output.content_type.starts_with(kind.expected_mime_prefix()) {
            return Err(format!(
                "expected {}* content, got '{}'",
                kind.expected_mime_prefix(),
                output.content_type
            ));
        }

        let bytes = match &output.payload {
            MediaPayload::Base64 { data } => STANDARD
                .decode(data.trim())
                .map_err(|e| format!("invalid base64 payload: {}", e))?,
            MediaPayload::Url { url } => self.download(url).await?,
        };
        if bytes.is_empty() {
            return Err("media payload is empty".to_string());
        }
        debug!(kind = %kind, size = bytes.len(), "Media payload decoded");
        Ok(FetchedMedia { output, bytes })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, String> {
        let client = self
            .http
            .as_ref()
            .ok_or_else(|| format!("no HTTP client configured to fetch {}", url))?;
        let response = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("download failed: {}", e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("download failed: {}", e))?;
        Ok(bytes.to_vec())
    }
}
