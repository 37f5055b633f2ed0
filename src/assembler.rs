//! Lesson assembly: one gateway call per lesson, persisted whole or not at all.

use crate::blob::BlobStore;
use crate::error::UnitError;
use crate::generation::{
    execute_typed, ContentGenerationGateway, GenerationStage, LessonContent, LessonSpec,
};
use crate::unit::{
    intro_lesson_id, Exercise, LearnerLevel, LearningObjective, LessonDraft, LessonId, LessonKind,
    LessonStore, LessonSummary, ObjectiveId, Unit, UnitId, UnitLifecycleStore,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Narrated intro material handed to [`LessonAssembler::create_intro_lesson`].
#[derive(Debug, Clone)]
pub struct PodcastInput {
    pub title: Option<String>,
    pub transcript: String,
    pub audio_bytes: Vec<u8>,
    pub content_type: String,
}

/// Where a lesson sits in the plan; `index` is zero-based.
#[derive(Debug, Clone, Copy)]
pub struct LessonPosition {
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledLesson {
    pub lesson_id: LessonId,
    pub title: String,
    pub covered_objective_ids: Vec<ObjectiveId>,
}

#[derive(Serialize)]
struct LessonRequest<'a> {
    unit_title: &'a str,
    lesson_number: usize,
    lesson_count: usize,
    title: &'a str,
    learning_objective: &'a str,
    objectives: Vec<&'a LearningObjective>,
    learner_level: LearnerLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_material: Option<&'a str>,
}

/// Objectives the exercises actually practise, in `allowed` order.
///
/// Exercises tagged with no objective, or with one outside `allowed`,
/// contribute nothing.
pub fn derive_coverage(exercises: &[Exercise], allowed: &[ObjectiveId]) -> Vec<ObjectiveId> {
    let referenced: HashSet<&str> = exercises
        .iter()
        .filter_map(|e| e.objective_id.as_deref())
        .collect();
    let mut seen = HashSet::new();
    allowed
        .iter()
        .filter(|id| referenced.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect()
}

pub struct LessonAssembler {
    gateway: Arc<dyn ContentGenerationGateway>,
    units: Arc<dyn UnitLifecycleStore>,
    lessons: Arc<dyn LessonStore>,
    blobs: Arc<dyn BlobStore>,
}

impl LessonAssembler {
    pub fn new(
        gateway: Arc<dyn ContentGenerationGateway>,
        units: Arc<dyn UnitLifecycleStore>,
        lessons: Arc<dyn LessonStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            gateway,
            units,
            lessons,
            blobs,
        }
    }

    /// Generate and persist one planned lesson.
    ///
    /// Only the first lesson of a unit seeded from raw text receives the
    /// source material.
    pub async fn create_lesson(
        &self,
        unit: &Unit,
        spec: &LessonSpec,
        position: LessonPosition,
    ) -> Result<AssembledLesson, UnitError> {
        // A planner that assigns no coverage leaves the lesson free to cover
        // any unit objective.
        let allowed: Vec<ObjectiveId> = if spec.objective_ids.is_empty() {
            unit.learning_objectives.iter().map(|o| o.id.clone()).collect()
        } else {
            spec.objective_ids.clone()
        };
        let objectives = unit
            .learning_objectives
            .iter()
            .filter(|o| allowed.contains(&o.id))
            .collect();

        let request = LessonRequest {
            unit_title: &unit.title,
            lesson_number: position.index + 1,
            lesson_count: position.total,
            title: &spec.title,
            learning_objective: &spec.learning_objective,
            objectives,
            learner_level: unit.learner_level,
            source_material: if position.index == 0 {
                unit.source.source_material()
            } else {
                None
            },
        };
        let inputs = serde_json::to_value(&request)
            .map_err(|e| UnitError::InvalidArgument(format!("lesson request: {}", e)))?;

        debug!(
            unit_id = %unit.id,
            lesson_index = position.index,
            title = %spec.title,
            "Generating lesson"
        );
        let content: LessonContent =
            execute_typed(self.gateway.as_ref(), GenerationStage::Lesson, inputs).await?;

        let covered = derive_coverage(&content.exercises, &allowed);
        let lesson = self
            .lessons
            .create_lesson(
                &unit.id,
                LessonDraft {
                    id: Uuid::new_v4().to_string(),
                    title: spec.title.clone(),
                    kind: LessonKind::Standard,
                    learning_objective: Some(spec.learning_objective.clone())
                        .filter(|o| !o.is_empty()),
                    exercises: content.exercises,
                    objective_ids: covered.clone(),
                    transcript: None,
                    audio: None,
                },
            )
            .await?;

        info!(
            unit_id = %unit.id,
            lesson_id = %lesson.id,
            lesson_index = position.index,
            exercises = lesson.exercises.len(),
            covered = covered.len(),
            planned = spec.objective_ids.len(),
            "Lesson persisted"
        );
        Ok(AssembledLesson {
            lesson_id: lesson.id,
            title: lesson.title,
            covered_objective_ids: covered,
        })
    }

    /// Create the unit's narrated intro lesson, or return the existing one.
    ///
    /// The intro id is `{unit_id}-intro`; a repeat call performs no writes.
    pub async fn create_intro_lesson(
        &self,
        unit_id: &UnitId,
        podcast: PodcastInput,
    ) -> Result<(LessonId, LessonSummary), UnitError> {
        if podcast.audio_bytes.is_empty() {
            return Err(UnitError::InvalidArgument(
                "podcast audio must not be empty".to_string(),
            ));
        }

        let lesson_id = intro_lesson_id(unit_id);
        if let Some(existing) = self.lessons.get_lesson_by_id(&lesson_id).await? {
            debug!(unit_id = %unit_id, lesson_id = %lesson_id, "Intro lesson already exists");
            return Ok((existing.id.clone(), existing.summary()));
        }

        let unit = self
            .units
            .get_unit(unit_id)
            .await?
            .ok_or_else(|| UnitError::NotFound(format!("unit {}", unit_id)))?;

        let audio = self
            .blobs
            .save(&podcast.audio_bytes, &podcast.content_type)
            .await?;
        let title = podcast
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Introduction: {}", unit.title));
        let created = self
            .lessons
            .create_lesson(
                unit_id,
                LessonDraft {
                    id: lesson_id.clone(),
                    title,
                    kind: LessonKind::Intro,
                    learning_objective: None,
                    exercises: Vec::new(),
                    objective_ids: Vec::new(),
                    transcript: Some(podcast.transcript),
                    audio: Some(audio.clone()),
                },
            )
            .await;
        let lesson = match created {
            Ok(lesson) => lesson,
            Err(e) => {
                if let Err(release) = self.blobs.delete(&audio).await {
                    warn!(unit_id = %unit_id, error = %release, "Failed to release intro audio");
                }
                return Err(e.into());
            }
        };

        let mut order = Vec::with_capacity(unit.lesson_order.len() + 1);
        order.push(lesson_id.clone());
        order.extend(unit.lesson_order.into_iter().filter(|id| id != &lesson_id));
        self.units.set_lesson_order(unit_id, order).await?;

        info!(unit_id = %unit_id, lesson_id = %lesson_id, "Intro lesson created");
        Ok((lesson_id, lesson.summary()))
    }
}
