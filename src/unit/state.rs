//! Unit lifecycle state machine and progress marker.
//!
//! `Pending -> InProgress -> Completed | Failed`, with `Failed -> InProgress`
//! (retry) as the only way out of a terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Completed | UnitStatus::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// `InProgress -> InProgress` is allowed so the running pipeline can
    /// advance its progress marker.
    pub fn can_transition_to(self, next: UnitStatus) -> bool {
        use UnitStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, InProgress)
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Queued,
    Retrying,
    Planning,
    GeneratingLessons,
    FilteringObjectives,
    ProducingMedia,
    /// Reported for completed units; never stored.
    Done,
}

impl ProgressStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStage::Queued => "queued",
            ProgressStage::Retrying => "retrying",
            ProgressStage::Planning => "planning",
            ProgressStage::GeneratingLessons => "generating_lessons",
            ProgressStage::FilteringObjectives => "filtering_objectives",
            ProgressStage::ProducingMedia => "producing_media",
            ProgressStage::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProgress {
    pub stage: ProgressStage,
    #[serde(default)]
    pub message: String,
}

impl UnitProgress {
    pub fn new(stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}
