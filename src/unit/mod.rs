//! Unit domain: records, lifecycle state machine, and the stores that persist them.

pub mod model;
pub mod persistence;
pub mod state;
pub mod store;

pub use model::{
    intro_lesson_id, now_millis, BackgroundTask, Exercise, LearnerLevel, LearningObjective,
    Lesson, LessonDraft, LessonId, LessonKind, LessonSummary, MediaAsset, MediaKind, ObjectiveId,
    Unit, UnitDraft, UnitId, UnitSource,
};
pub use persistence::{SledLessonStore, SledUnitStore};
pub use state::{ProgressStage, UnitProgress, UnitStatus};
pub use store::{InMemoryLessonStore, InMemoryUnitStore, LessonStore, UnitLifecycleStore};
