use crate::blob::BlobHandle;
use crate::error::StorageError;
use crate::unit::state::{ProgressStage, UnitProgress, UnitStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub type UnitId = Uuid;
pub type LessonId = String;
pub type ObjectiveId = String;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Deterministic id of a unit's narrated intro lesson.
pub fn intro_lesson_id(unit_id: &UnitId) -> LessonId {
    format!("{}-intro", unit_id)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnerLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl LearnerLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LearnerLevel::Beginner => "beginner",
            LearnerLevel::Intermediate => "intermediate",
            LearnerLevel::Advanced => "advanced",
        }
    }
}

impl FromStr for LearnerLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(LearnerLevel::Beginner),
            "intermediate" => Ok(LearnerLevel::Intermediate),
            "advanced" => Ok(LearnerLevel::Advanced),
            other => Err(format!(
                "unknown learner level '{}' (expected beginner, intermediate or advanced)",
                other
            )),
        }
    }
}

/// What the unit is generated from: a topic name or raw source text, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UnitSource {
    Topic(String),
    SourceMaterial(String),
}

impl UnitSource {
    /// Build a source from the two optional caller inputs, rejecting anything
    /// other than exactly one non-blank value.
    pub fn from_inputs(
        topic: Option<String>,
        source_material: Option<String>,
    ) -> Result<Self, String> {
        let topic = topic.filter(|t| !t.trim().is_empty());
        let material = source_material.filter(|m| !m.trim().is_empty());
        match (topic, material) {
            (Some(topic), None) => Ok(UnitSource::Topic(topic)),
            (None, Some(material)) => Ok(UnitSource::SourceMaterial(material)),
            (Some(_), Some(_)) => {
                Err("provide either a topic or source material, not both".to_string())
            }
            (None, None) => Err("a topic or source material is required".to_string()),
        }
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            UnitSource::Topic(t) => Some(t),
            UnitSource::SourceMaterial(_) => None,
        }
    }

    pub fn source_material(&self) -> Option<&str> {
        match self {
            UnitSource::Topic(_) => None,
            UnitSource::SourceMaterial(m) => Some(m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningObjective {
    pub id: ObjectiveId,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Art,
    Podcast,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Art => "art",
            MediaKind::Podcast => "podcast",
        }
    }

    /// Top-level MIME type a generated binary of this kind must carry.
    pub fn expected_mime_prefix(self) -> &'static str {
        match self {
            MediaKind::Art => "image/",
            MediaKind::Podcast => "audio/",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted media binary plus the text produced alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub kind: MediaKind,
    pub blob: BlobHandle,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    pub created_at_ms: u64,
}

/// Correlation record for a queued execution; the flow-run id is the unit id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub flow_name: String,
    pub flow_run_id: UnitId,
    pub task_id: String,
}

/// Everything needed to persist a brand-new unit.
#[derive(Debug, Clone)]
pub struct UnitDraft {
    pub id: UnitId,
    pub title: String,
    pub source: UnitSource,
    pub learner_level: LearnerLevel,
    pub target_lesson_count: Option<u32>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub title: String,
    pub status: UnitStatus,
    #[serde(default)]
    pub lesson_order: Vec<LessonId>,
    #[serde(default)]
    pub learning_objectives: Vec<LearningObjective>,
    #[serde(default)]
    pub target_lesson_count: Option<u32>,
    pub learner_level: LearnerLevel,
    pub source: UnitSource,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub progress: Option<UnitProgress>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub background_task: Option<BackgroundTask>,
    #[serde(default)]
    pub art: Option<MediaAsset>,
    #[serde(default)]
    pub podcast: Option<MediaAsset>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Unit {
    pub fn from_draft(draft: UnitDraft) -> Self {
        let now = now_millis();
        Self {
            id: draft.id,
            title: draft.title,
            status: UnitStatus::Pending,
            lesson_order: Vec::new(),
            learning_objectives: Vec::new(),
            target_lesson_count: draft.target_lesson_count,
            learner_level: draft.learner_level,
            source: draft.source,
            owner_id: draft.owner_id,
            progress: None,
            error_message: None,
            background_task: None,
            art: None,
            podcast: None,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// Apply a status change, enforcing the lifecycle state machine.
    ///
    /// The error message is kept only for `Failed`; any other target clears it.
    pub fn apply_status(
        &mut self,
        status: UnitStatus,
        error_message: Option<String>,
        progress: Option<UnitProgress>,
    ) -> Result<(), StorageError> {
        if !self.status.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.error_message = if status == UnitStatus::Failed {
            error_message
        } else {
            None
        };
        self.progress = progress;
        self.touch();
        Ok(())
    }

    pub fn media(&self, kind: MediaKind) -> Option<&MediaAsset> {
        match kind {
            MediaKind::Art => self.art.as_ref(),
            MediaKind::Podcast => self.podcast.as_ref(),
        }
    }

    /// Store an asset in its kind's slot, returning whatever it replaced.
    pub fn set_media(&mut self, asset: MediaAsset) -> Option<MediaAsset> {
        let slot = match asset.kind {
            MediaKind::Art => &mut self.art,
            MediaKind::Podcast => &mut self.podcast,
        };
        let previous = slot.replace(asset);
        self.touch();
        previous
    }

    pub fn is_in_stage(&self, stage: ProgressStage) -> bool {
        self.progress.as_ref().map(|p| p.stage) == Some(stage)
    }

    pub fn touch(&mut self) {
        self.updated_at_ms = now_millis();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonKind {
    Standard,
    Intro,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_exercise_kind")]
    pub kind: String,
    pub prompt: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    /// Unit objective this exercise practises, if the generator tagged one.
    #[serde(default)]
    pub objective_id: Option<ObjectiveId>,
}

fn default_exercise_kind() -> String {
    "short_answer".to_string()
}

/// Lesson contents handed to the lesson store; the store assigns nothing but
/// the creation timestamp.
#[derive(Debug, Clone)]
pub struct LessonDraft {
    pub id: LessonId,
    pub title: String,
    pub kind: LessonKind,
    pub learning_objective: Option<String>,
    pub exercises: Vec<Exercise>,
    pub objective_ids: Vec<ObjectiveId>,
    pub transcript: Option<String>,
    pub audio: Option<BlobHandle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub unit_id: UnitId,
    pub title: String,
    pub kind: LessonKind,
    #[serde(default)]
    pub learning_objective: Option<String>,
    #[serde(default)]
    pub exercises: Vec<Exercise>,
    /// Unit objectives this lesson actually covers.
    #[serde(default)]
    pub objective_ids: Vec<ObjectiveId>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub audio: Option<BlobHandle>,
    pub created_at_ms: u64,
}

impl Lesson {
    pub fn from_draft(unit_id: UnitId, draft: LessonDraft) -> Self {
        Self {
            id: draft.id,
            unit_id,
            title: draft.title,
            kind: draft.kind,
            learning_objective: draft.learning_objective,
            exercises: draft.exercises,
            objective_ids: draft.objective_ids,
            transcript: draft.transcript,
            audio: draft.audio,
            created_at_ms: now_millis(),
        }
    }

    pub fn summary(&self) -> LessonSummary {
        LessonSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            kind: self.kind,
            objective_ids: self.objective_ids.clone(),
            exercise_count: self.exercises.len(),
            has_audio: self.audio.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSummary {
    pub id: LessonId,
    pub title: String,
    pub kind: LessonKind,
    pub objective_ids: Vec<ObjectiveId>,
    pub exercise_count: usize,
    pub has_audio: bool,
}
