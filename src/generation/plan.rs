use crate::generation::gateway::{GenerationError, GenerationStage};
use crate::unit::{LearnerLevel, LearningObjective, ObjectiveId, UnitSource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Inputs sent to the `plan_unit` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_material: Option<String>,
    pub learner_level: LearnerLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_lesson_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl PlanRequest {
    pub fn new(
        source: &UnitSource,
        learner_level: LearnerLevel,
        target_lesson_count: Option<u32>,
        title: Option<String>,
    ) -> Self {
        Self {
            topic: source.topic().map(String::from),
            source_material: source.source_material().map(String::from),
            learner_level,
            target_lesson_count,
            title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSpec {
    pub title: String,
    /// What this lesson should teach, in prose.
    #[serde(default)]
    pub learning_objective: String,
    /// Unit objectives the planner expects this lesson to cover.
    #[serde(default)]
    pub objective_ids: Vec<ObjectiveId>,
}

/// Output of the `plan_unit` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitPlan {
    #[serde(default)]
    pub title: String,
    pub learning_objectives: Vec<LearningObjective>,
    pub lessons: Vec<LessonSpec>,
}

impl UnitPlan {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.learning_objectives.is_empty() {
            return Err(malformed("plan contains no learning objectives"));
        }
        let mut seen = HashSet::new();
        for objective in &self.learning_objectives {
            if objective.id.trim().is_empty() {
                return Err(malformed("plan contains an objective with an empty id"));
            }
            if !seen.insert(objective.id.as_str()) {
                return Err(malformed(format!(
                    "plan contains duplicate objective id '{}'",
                    objective.id
                )));
            }
        }
        if self.lessons.is_empty() {
            return Err(malformed("plan contains no lessons"));
        }
        for (index, lesson) in self.lessons.iter().enumerate() {
            if lesson.title.trim().is_empty() {
                return Err(malformed(format!("lesson {} has an empty title", index + 1)));
            }
            if let Some(unknown) = lesson
                .objective_ids
                .iter()
                .find(|id| !seen.contains(id.as_str()))
            {
                return Err(malformed(format!(
                    "lesson {} references unknown objective '{}'",
                    index + 1,
                    unknown
                )));
            }
        }
        Ok(())
    }

    /// Drop lessons beyond the requested count. Returns how many were dropped.
    pub fn truncate_to(&mut self, target_lesson_count: Option<u32>) -> usize {
        let Some(target) = target_lesson_count else {
            return 0;
        };
        let target = target as usize;
        let dropped = self.lessons.len().saturating_sub(target);
        self.lessons.truncate(target);
        dropped
    }
}

fn malformed(message: impl Into<String>) -> GenerationError {
    GenerationError::MalformedOutput {
        stage: GenerationStage::PlanUnit,
        message: message.into(),
    }
}
