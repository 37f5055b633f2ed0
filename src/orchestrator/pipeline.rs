//! The unit creation pipeline body, shared by foreground calls and queue workers.

use crate::assembler::{AssembledLesson, LessonAssembler, LessonPosition, PodcastInput};
use crate::blob::BlobStore;
use crate::error::UnitError;
use crate::generation::{
    execute_typed, ContentGenerationGateway, GenerationStage, PlanRequest, UnitPlan,
};
use crate::media::MediaProducer;
use crate::unit::{
    LearningObjective, LessonStore, LessonSummary, MediaAsset, MediaKind, ObjectiveId,
    ProgressStage, Unit, UnitId, UnitLifecycleStore, UnitProgress, UnitStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happens when planned lessons fail to generate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LessonFailurePolicy {
    /// Abort on the first failed lesson.
    FailImmediately,
    /// Abort once the failed share of planned lessons exceeds the fraction.
    Threshold { max_failed_fraction: f64 },
}

impl Default for LessonFailurePolicy {
    fn default() -> Self {
        LessonFailurePolicy::Threshold {
            max_failed_fraction: 0.5,
        }
    }
}

impl LessonFailurePolicy {
    pub fn exceeded(&self, failed: usize, planned: usize) -> bool {
        if failed == 0 {
            return false;
        }
        match self {
            LessonFailurePolicy::FailImmediately => true,
            LessonFailurePolicy::Threshold {
                max_failed_fraction,
            } => planned == 0 || failed as f64 / planned as f64 > *max_failed_fraction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub generate_art: bool,
    pub generate_podcast: bool,
    pub failure_policy: LessonFailurePolicy,
    /// Title given to units created without one, until the plan names them.
    pub placeholder_title: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            generate_art: true,
            generate_podcast: false,
            failure_policy: LessonFailurePolicy::default(),
            placeholder_title: "Untitled Unit".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonFailure {
    /// Zero-based position in the plan.
    pub index: usize,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonRef {
    pub id: String,
    pub title: String,
}

/// Result of one completed pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub unit_id: UnitId,
    pub title: String,
    /// Lessons in final order, the intro first when one was produced.
    pub lessons: Vec<LessonRef>,
    pub failed_lessons: Vec<LessonFailure>,
    pub dropped_objective_ids: Vec<ObjectiveId>,
    pub art: Option<MediaAsset>,
    pub podcast: Option<MediaAsset>,
}

fn format_failure_samples(failures: &[LessonFailure], max_samples: usize) -> String {
    let mut messages: Vec<&str> = failures.iter().map(|f| f.message.as_str()).collect();
    messages.sort_unstable();
    messages.dedup();

    let samples: Vec<&str> = messages.into_iter().take(max_samples).collect();
    if samples.is_empty() {
        return String::new();
    }

    let mut out = format!(" Sample errors: {}", samples.join(" | "));
    let remaining = failures.len().saturating_sub(samples.len());
    if remaining > 0 {
        out.push_str(&format!(" | ... and {} more", remaining));
    }
    out
}

/// Keep only objectives some persisted lesson covers. Returns the survivors and
/// the ids that were dropped, both in original order.
pub fn filter_objectives<'a, I>(
    objectives: &[LearningObjective],
    lessons: I,
) -> (Vec<LearningObjective>, Vec<ObjectiveId>)
where
    I: IntoIterator<Item = &'a AssembledLesson>,
{
    let covered: HashSet<&str> = lessons
        .into_iter()
        .flat_map(|l| l.covered_objective_ids.iter().map(String::as_str))
        .collect();
    let (kept, dropped): (Vec<_>, Vec<_>) = objectives
        .iter()
        .cloned()
        .partition(|o| covered.contains(o.id.as_str()));
    (kept, dropped.into_iter().map(|o| o.id).collect())
}

pub struct UnitPipeline {
    units: Arc<dyn UnitLifecycleStore>,
    lessons: Arc<dyn LessonStore>,
    blobs: Arc<dyn BlobStore>,
    gateway: Arc<dyn ContentGenerationGateway>,
    assembler: LessonAssembler,
    media: MediaProducer,
    settings: PipelineSettings,
}

impl UnitPipeline {
    pub fn new(
        units: Arc<dyn UnitLifecycleStore>,
        lessons: Arc<dyn LessonStore>,
        gateway: Arc<dyn ContentGenerationGateway>,
        blobs: Arc<dyn BlobStore>,
        settings: PipelineSettings,
    ) -> Self {
        let assembler = LessonAssembler::new(
            Arc::clone(&gateway),
            Arc::clone(&units),
            Arc::clone(&lessons),
            Arc::clone(&blobs),
        );
        let media = MediaProducer::new(Arc::clone(&gateway), Arc::clone(&units), Arc::clone(&blobs));
        Self {
            units,
            lessons,
            blobs,
            gateway,
            assembler,
            media,
            settings,
        }
    }

    /// Let the media producer fetch URL-delivered payloads.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.media = self.media.with_http_client(client);
        self
    }

    pub fn units(&self) -> &Arc<dyn UnitLifecycleStore> {
        &self.units
    }

    pub fn lessons(&self) -> &Arc<dyn LessonStore> {
        &self.lessons
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn assembler(&self) -> &LessonAssembler {
        &self.assembler
    }

    pub fn media(&self) -> &MediaProducer {
        &self.media
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the pipeline, recording any error on the unit before returning it.
    pub async fn run_guarded(&self, unit_id: &UnitId) -> Result<PipelineOutcome, UnitError> {
        match self.run(unit_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(unit_id = %unit_id, error = %err, "Unit pipeline failed");
                self.mark_failed(unit_id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Move an in-progress unit to `Failed`. Units that are gone or already
    /// settled are left alone.
    pub async fn mark_failed(&self, unit_id: &UnitId, message: &str) {
        let result = self
            .units
            .update_unit_status(unit_id, UnitStatus::Failed, Some(message.to_string()), None)
            .await;
        if let Err(e) = result {
            warn!(unit_id = %unit_id, error = %e, "Could not record unit failure");
        }
    }

    /// Plan, generate lessons, filter objectives, order, add media, complete.
    ///
    /// The unit must already be `InProgress`.
    pub async fn run(&self, unit_id: &UnitId) -> Result<PipelineOutcome, UnitError> {
        let unit = self
            .units
            .get_unit(unit_id)
            .await?
            .ok_or_else(|| UnitError::NotFound(format!("unit {}", unit_id)))?;
        if unit.status != UnitStatus::InProgress {
            return Err(UnitError::InvalidState(format!(
                "unit {} is {}, expected in_progress",
                unit_id, unit.status
            )));
        }

        self.set_progress(unit_id, ProgressStage::Planning, "Planning unit")
            .await?;
        self.clear_previous_run(&unit).await?;

        // Plan
        let user_title = Some(unit.title.clone())
            .filter(|t| !t.trim().is_empty() && *t != self.settings.placeholder_title);
        let request = PlanRequest::new(
            &unit.source,
            unit.learner_level,
            unit.target_lesson_count,
            user_title.clone(),
        );
        let inputs = serde_json::to_value(&request)
            .map_err(|e| UnitError::InvalidArgument(format!("plan request: {}", e)))?;
        let mut plan: UnitPlan =
            execute_typed(self.gateway.as_ref(), GenerationStage::PlanUnit, inputs).await?;
        plan.validate()?;
        let dropped = plan.truncate_to(unit.target_lesson_count);
        if dropped > 0 {
            warn!(
                unit_id = %unit_id,
                dropped,
                target = ?unit.target_lesson_count,
                "Plan exceeded target lesson count; extra lessons dropped"
            );
        }

        let title = user_title
            .or_else(|| Some(plan.title.trim().to_string()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| self.settings.placeholder_title.clone());
        let unit = self
            .units
            .update_unit_metadata(
                unit_id,
                Some(title.clone()),
                Some(plan.learning_objectives.clone()),
            )
            .await?;
        info!(
            unit_id = %unit_id,
            objectives = plan.learning_objectives.len(),
            lessons = plan.lessons.len(),
            "Unit planned"
        );

        // Lessons, strictly in plan order
        let planned = plan.lessons.len();
        let mut assembled = Vec::with_capacity(planned);
        let mut failures = Vec::new();
        for (index, spec) in plan.lessons.iter().enumerate() {
            self.set_progress(
                unit_id,
                ProgressStage::GeneratingLessons,
                format!("Generating lesson {} of {}", index + 1, planned),
            )
            .await?;
            let position = LessonPosition {
                index,
                total: planned,
            };
            match self.assembler.create_lesson(&unit, spec, position).await {
                Ok(lesson) => assembled.push(lesson),
                Err(err @ UnitError::PersistenceFailure(_)) => return Err(err),
                Err(err) => {
                    warn!(
                        unit_id = %unit_id,
                        lesson_index = index,
                        title = %spec.title,
                        error = %err,
                        "Lesson generation failed"
                    );
                    failures.push(LessonFailure {
                        index,
                        title: spec.title.clone(),
                        message: err.to_string(),
                    });
                    if self.settings.failure_policy.exceeded(failures.len(), planned) {
                        return Err(UnitError::GenerationFailure(format!(
                            "{} of {} lessons failed.{}",
                            failures.len(),
                            planned,
                            format_failure_samples(&failures, 3)
                        )));
                    }
                }
            }
        }
        if assembled.is_empty() {
            return Err(UnitError::GenerationFailure(format!(
                "no lessons were generated.{}",
                format_failure_samples(&failures, 3)
            )));
        }

        // Objective filtering
        self.set_progress(
            unit_id,
            ProgressStage::FilteringObjectives,
            "Filtering learning objectives",
        )
        .await?;
        let (kept, dropped_objective_ids) =
            filter_objectives(&unit.learning_objectives, &assembled);
        if !dropped_objective_ids.is_empty() {
            info!(
                unit_id = %unit_id,
                dropped = ?dropped_objective_ids,
                "Removing objectives no lesson covers"
            );
        }
        self.units
            .update_unit_metadata(unit_id, None, Some(kept))
            .await?;

        let lesson_order: Vec<String> = assembled.iter().map(|l| l.lesson_id.clone()).collect();
        let unit = self.units.set_lesson_order(unit_id, lesson_order).await?;
        let mut lessons: Vec<LessonRef> = assembled
            .iter()
            .map(|l| LessonRef {
                id: l.lesson_id.clone(),
                title: l.title.clone(),
            })
            .collect();

        // Best-effort media
        let mut art = None;
        let mut podcast = None;
        if self.settings.generate_art || self.settings.generate_podcast {
            self.set_progress(unit_id, ProgressStage::ProducingMedia, "Producing unit media")
                .await?;
            let titles: Vec<String> = lessons.iter().map(|l| l.title.clone()).collect();
            if self.settings.generate_art {
                match self.media.produce(&unit, MediaKind::Art, &titles).await {
                    Ok(asset) => art = Some(asset),
                    Err(e) => warn!(unit_id = %unit_id, error = %e, "Unit art skipped"),
                }
            }
            if self.settings.generate_podcast {
                match self.produce_podcast(&unit, &titles).await {
                    Ok((asset, intro)) => {
                        lessons.insert(
                            0,
                            LessonRef {
                                id: intro.id,
                                title: intro.title,
                            },
                        );
                        podcast = Some(asset);
                    }
                    Err(e) => warn!(unit_id = %unit_id, error = %e, "Unit podcast skipped"),
                }
            }
        }

        self.units
            .update_unit_status(unit_id, UnitStatus::Completed, None, None)
            .await?;
        info!(
            unit_id = %unit_id,
            lessons = lessons.len(),
            failed_lessons = failures.len(),
            "Unit completed"
        );

        Ok(PipelineOutcome {
            unit_id: *unit_id,
            title,
            lessons,
            failed_lessons: failures,
            dropped_objective_ids,
            art,
            podcast,
        })
    }

    /// Produce narrated audio for `unit` and turn it into the intro lesson.
    pub async fn produce_podcast(
        &self,
        unit: &Unit,
        lesson_titles: &[String],
    ) -> Result<(MediaAsset, LessonSummary), UnitError> {
        let asset = self
            .media
            .produce(unit, MediaKind::Podcast, lesson_titles)
            .await?;
        let audio_bytes = self.blobs.load(&asset.blob).await?.ok_or_else(|| {
            UnitError::PersistenceFailure(format!("podcast audio {} missing", asset.blob.key))
        })?;
        let (_, summary) = self
            .assembler
            .create_intro_lesson(
                &unit.id,
                PodcastInput {
                    title: None,
                    transcript: asset.transcript.clone().unwrap_or_default(),
                    audio_bytes,
                    content_type: asset.blob.content_type.clone(),
                },
            )
            .await?;
        Ok((asset, summary))
    }

    /// Delete every lesson of the unit along with any lesson audio.
    pub async fn remove_lessons(&self, unit_id: &UnitId) -> Result<usize, UnitError> {
        let removed = self.lessons.delete_lessons_for_unit(unit_id).await?;
        for audio in removed.iter().filter_map(|l| l.audio.as_ref()) {
            if let Err(e) = self.blobs.delete(audio).await {
                warn!(unit_id = %unit_id, blob = %audio.key, error = %e, "Failed to delete lesson audio");
            }
        }
        Ok(removed.len())
    }

    async fn clear_previous_run(&self, unit: &Unit) -> Result<(), UnitError> {
        let removed = self.remove_lessons(&unit.id).await?;
        if !unit.lesson_order.is_empty() {
            self.units.set_lesson_order(&unit.id, Vec::new()).await?;
        }
        if removed > 0 {
            info!(unit_id = %unit.id, removed, "Cleared lessons from earlier run");
        }
        Ok(())
    }

    async fn set_progress(
        &self,
        unit_id: &UnitId,
        stage: ProgressStage,
        message: impl Into<String>,
    ) -> Result<(), UnitError> {
        self.units
            .update_unit_status(
                unit_id,
                UnitStatus::InProgress,
                None,
                Some(UnitProgress::new(stage, message)),
            )
            .await?;
        Ok(())
    }
}
