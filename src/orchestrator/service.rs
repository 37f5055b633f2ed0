//! Public unit operations: create, retry, dismiss, media, status, recovery.

use crate::assembler::PodcastInput;
use crate::blob::BlobStore;
use crate::error::UnitError;
use crate::generation::ContentGenerationGateway;
use crate::orchestrator::flow::{UnitCreationInputs, UNIT_CREATION_FLOW};
use crate::orchestrator::pipeline::{LessonFailure, LessonRef, PipelineSettings, UnitPipeline};
use crate::queue::TaskQueue;
use crate::unit::{
    intro_lesson_id, BackgroundTask, LearnerLevel, LessonStore, LessonSummary, MediaAsset,
    MediaKind, ProgressStage, Unit, UnitDraft, UnitId, UnitLifecycleStore, UnitProgress,
    UnitSource, UnitStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct CreateUnitRequest {
    pub topic: Option<String>,
    pub source_material: Option<String>,
    pub background: bool,
    pub target_lesson_count: Option<u32>,
    pub learner_level: LearnerLevel,
    pub owner_id: Option<String>,
    pub title: Option<String>,
}

impl CreateUnitRequest {
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Default::default()
        }
    }

    pub fn for_source_material(material: impl Into<String>) -> Self {
        Self {
            source_material: Some(material.into()),
            ..Default::default()
        }
    }
}

/// Returned by a foreground creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub unit_id: UnitId,
    pub title: String,
    pub lesson_count: usize,
    pub lessons: Vec<LessonRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_lessons: Vec<LessonFailure>,
}

/// Returned by background creation and retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitHandle {
    pub unit_id: UnitId,
    pub title: String,
    pub status: UnitStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateUnitResult {
    Completed(UnitSummary),
    Queued(UnitHandle),
}

impl CreateUnitResult {
    pub fn unit_id(&self) -> UnitId {
        match self {
            CreateUnitResult::Completed(summary) => summary.unit_id,
            CreateUnitResult::Queued(handle) => handle.unit_id,
        }
    }
}

/// What a background caller polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatusView {
    pub unit_id: UnitId,
    pub title: String,
    pub status: UnitStatus,
    pub progress: Option<UnitProgress>,
    pub error_message: Option<String>,
    pub background_task: Option<BackgroundTask>,
    pub lesson_count: usize,
    pub has_art: bool,
    pub has_podcast: bool,
    pub updated_at_ms: u64,
}

impl From<&Unit> for UnitStatusView {
    fn from(unit: &Unit) -> Self {
        Self {
            unit_id: unit.id,
            title: unit.title.clone(),
            status: unit.status,
            progress: match unit.status {
                UnitStatus::Completed => {
                    Some(UnitProgress::new(ProgressStage::Done, "Unit complete"))
                }
                _ => unit.progress.clone(),
            },
            error_message: unit.error_message.clone(),
            background_task: unit.background_task.clone(),
            lesson_count: unit.lesson_order.len(),
            has_art: unit.art.is_some(),
            has_podcast: unit.podcast.is_some(),
            updated_at_ms: unit.updated_at_ms,
        }
    }
}

pub struct UnitOrchestrator {
    pipeline: Arc<UnitPipeline>,
    queue: Arc<dyn TaskQueue>,
}

impl UnitOrchestrator {
    pub fn new(
        units: Arc<dyn UnitLifecycleStore>,
        lessons: Arc<dyn LessonStore>,
        gateway: Arc<dyn ContentGenerationGateway>,
        queue: Arc<dyn TaskQueue>,
        blobs: Arc<dyn BlobStore>,
        settings: PipelineSettings,
    ) -> Self {
        let pipeline = UnitPipeline::new(units, lessons, gateway, blobs, settings);
        Self::from_pipeline(Arc::new(pipeline), queue)
    }

    /// Share a pipeline with the queue's [`UnitCreationFlow`](crate::orchestrator::UnitCreationFlow).
    pub fn from_pipeline(pipeline: Arc<UnitPipeline>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { pipeline, queue }
    }

    pub fn pipeline(&self) -> &Arc<UnitPipeline> {
        &self.pipeline
    }

    fn units(&self) -> &Arc<dyn UnitLifecycleStore> {
        self.pipeline.units()
    }

    async fn require_unit(&self, unit_id: &UnitId) -> Result<Unit, UnitError> {
        self.units()
            .get_unit(unit_id)
            .await?
            .ok_or_else(|| UnitError::NotFound(format!("unit {}", unit_id)))
    }

    /// Create a unit and either build it inline or hand it to the task queue.
    pub async fn create_unit(
        &self,
        request: CreateUnitRequest,
    ) -> Result<CreateUnitResult, UnitError> {
        let source = UnitSource::from_inputs(request.topic, request.source_material)
            .map_err(UnitError::InvalidArgument)?;
        if request.target_lesson_count == Some(0) {
            return Err(UnitError::InvalidArgument(
                "target lesson count must be at least 1".to_string(),
            ));
        }
        let title = request
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.pipeline.settings().placeholder_title.clone());

        let unit = self
            .units()
            .create_unit(UnitDraft {
                id: Uuid::new_v4(),
                title,
                source,
                learner_level: request.learner_level,
                target_lesson_count: request.target_lesson_count,
                owner_id: request.owner_id,
            })
            .await?;
        info!(unit_id = %unit.id, background = request.background, "Unit created");

        if request.background {
            let unit = self
                .units()
                .update_unit_status(
                    &unit.id,
                    UnitStatus::InProgress,
                    None,
                    Some(UnitProgress::new(ProgressStage::Queued, "Waiting for a worker")),
                )
                .await?;
            let handle = self.submit(&unit).await?;
            return Ok(CreateUnitResult::Queued(handle));
        }

        self.units()
            .update_unit_status(
                &unit.id,
                UnitStatus::InProgress,
                None,
                Some(UnitProgress::new(ProgressStage::Planning, "Planning unit")),
            )
            .await?;
        let outcome = self.pipeline.run_guarded(&unit.id).await?;
        Ok(CreateUnitResult::Completed(UnitSummary {
            unit_id: outcome.unit_id,
            title: outcome.title,
            lesson_count: outcome.lessons.len(),
            lessons: outcome.lessons,
            failed_lessons: outcome.failed_lessons,
        }))
    }

    /// Requeue a failed unit under its own id.
    pub async fn retry_unit(&self, unit_id: &UnitId) -> Result<UnitHandle, UnitError> {
        let unit = self.require_unit(unit_id).await?;
        if unit.status != UnitStatus::Failed {
            return Err(UnitError::InvalidState(format!(
                "only failed units can be retried; unit {} is {}",
                unit_id, unit.status
            )));
        }

        let unit = self
            .units()
            .update_unit_status(
                unit_id,
                UnitStatus::InProgress,
                None,
                Some(UnitProgress::new(ProgressStage::Retrying, "Retrying unit creation")),
            )
            .await?;
        info!(unit_id = %unit_id, "Unit retry requested");
        self.submit(&unit).await
    }

    async fn submit(&self, unit: &Unit) -> Result<UnitHandle, UnitError> {
        let inputs = UnitCreationInputs::from_unit(unit).into_map()?;
        let submission = match self.queue.submit(UNIT_CREATION_FLOW, unit.id, inputs).await {
            Ok(submission) => submission,
            Err(err) => {
                let message = format!("failed to queue unit creation: {}", err);
                self.pipeline.mark_failed(&unit.id, &message).await;
                return Err(UnitError::TaskQueue(message));
            }
        };
        self.units()
            .set_background_task_id(&unit.id, UNIT_CREATION_FLOW, &submission.task_id)
            .await?;
        info!(unit_id = %unit.id, task_id = %submission.task_id, "Unit creation queued");

        Ok(UnitHandle {
            unit_id: unit.id,
            title: unit.title.clone(),
            status: UnitStatus::InProgress,
        })
    }

    /// Delete a unit with its lessons and media. False when the unit is absent.
    pub async fn dismiss_unit(&self, unit_id: &UnitId) -> Result<bool, UnitError> {
        let Some(unit) = self.units().get_unit(unit_id).await? else {
            return Ok(false);
        };

        let removed = self.pipeline.remove_lessons(unit_id).await?;
        for asset in [&unit.art, &unit.podcast].into_iter().flatten() {
            if let Err(e) = self.pipeline.blobs().delete(&asset.blob).await {
                warn!(unit_id = %unit_id, kind = %asset.kind, error = %e, "Failed to delete media blob");
            }
        }
        let deleted = self.units().delete_unit(unit_id).await?;
        info!(unit_id = %unit_id, lessons = removed, "Unit dismissed");
        Ok(deleted)
    }

    /// Narrated intro lesson from caller-supplied audio.
    pub async fn create_intro_lesson(
        &self,
        unit_id: &UnitId,
        podcast: PodcastInput,
    ) -> Result<(String, LessonSummary), UnitError> {
        self.pipeline
            .assembler()
            .create_intro_lesson(unit_id, podcast)
            .await
    }

    /// Generate (or regenerate) the unit's cover art.
    pub async fn create_unit_art(&self, unit_id: &UnitId) -> Result<MediaAsset, UnitError> {
        let unit = self.require_unit(unit_id).await?;
        let titles = self.lesson_titles(&unit).await?;
        self.pipeline
            .media()
            .produce(&unit, MediaKind::Art, &titles)
            .await
    }

    /// Generate the unit podcast and its intro lesson. A unit that already has
    /// an intro lesson keeps it, and its existing podcast is returned.
    pub async fn create_unit_podcast(
        &self,
        unit_id: &UnitId,
    ) -> Result<(MediaAsset, LessonSummary), UnitError> {
        let unit = self.require_unit(unit_id).await?;
        if let (Some(podcast), Some(intro)) = (
            unit.podcast.clone(),
            self.pipeline
                .lessons()
                .get_lesson_by_id(&intro_lesson_id(unit_id))
                .await?,
        ) {
            return Ok((podcast, intro.summary()));
        }
        let titles = self.lesson_titles(&unit).await?;
        self.pipeline.produce_podcast(&unit, &titles).await
    }

    pub async fn unit_status(&self, unit_id: &UnitId) -> Result<UnitStatusView, UnitError> {
        let unit = self.require_unit(unit_id).await?;
        Ok(UnitStatusView::from(&unit))
    }

    pub async fn list_units(
        &self,
        owner_id: Option<&str>,
    ) -> Result<Vec<UnitStatusView>, UnitError> {
        let units = self.units().list_units(owner_id).await?;
        Ok(units.iter().map(UnitStatusView::from).collect())
    }

    /// Fail units left `InProgress` by a previous process so they can be retried.
    ///
    /// Call before the local queue starts; anything still in progress at that
    /// point has no live execution.
    pub async fn recover_interrupted(&self) -> Result<Vec<UnitId>, UnitError> {
        let mut recovered = Vec::new();
        for unit in self.units().list_units(None).await? {
            if unit.status != UnitStatus::InProgress {
                continue;
            }
            self.units()
                .update_unit_status(
                    &unit.id,
                    UnitStatus::Failed,
                    Some("interrupted".to_string()),
                    None,
                )
                .await?;
            warn!(unit_id = %unit.id, "Marked interrupted unit as failed");
            recovered.push(unit.id);
        }
        Ok(recovered)
    }

    async fn lesson_titles(&self, unit: &Unit) -> Result<Vec<String>, UnitError> {
        let lessons = self.pipeline.lessons().list_lessons_for_unit(&unit.id).await?;
        Ok(unit
            .lesson_order
            .iter()
            .filter_map(|id| lessons.iter().find(|l| &l.id == id))
            .map(|l| l.title.clone())
            .collect())
    }
}
