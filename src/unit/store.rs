//! Unit and lesson store interfaces, plus in-memory implementations for
//! development and tests.

use crate::error::StorageError;
use crate::unit::model::{
    LearningObjective, Lesson, LessonDraft, LessonId, MediaAsset, Unit, UnitDraft, UnitId,
};
use crate::unit::state::{UnitProgress, UnitStatus};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Persistence facade for unit records.
#[async_trait]
pub trait UnitLifecycleStore: Send + Sync {
    /// Persist a new unit in `Pending`.
    async fn create_unit(&self, draft: UnitDraft) -> Result<Unit, StorageError>;

    async fn get_unit(&self, id: &UnitId) -> Result<Option<Unit>, StorageError>;

    /// Change status (state machine enforced), error message and progress marker.
    async fn update_unit_status(
        &self,
        id: &UnitId,
        status: UnitStatus,
        error_message: Option<String>,
        progress: Option<UnitProgress>,
    ) -> Result<Unit, StorageError>;

    /// Overwrite title and/or objectives; `None` leaves a field untouched.
    async fn update_unit_metadata(
        &self,
        id: &UnitId,
        title: Option<String>,
        learning_objectives: Option<Vec<LearningObjective>>,
    ) -> Result<Unit, StorageError>;

    async fn set_lesson_order(
        &self,
        id: &UnitId,
        lesson_ids: Vec<LessonId>,
    ) -> Result<Unit, StorageError>;

    async fn set_background_task_id(
        &self,
        id: &UnitId,
        flow_name: &str,
        task_id: &str,
    ) -> Result<(), StorageError>;

    /// Store a media asset in its kind's slot; returns the updated unit and
    /// the asset it replaced, if any.
    async fn attach_media(
        &self,
        id: &UnitId,
        asset: MediaAsset,
    ) -> Result<(Unit, Option<MediaAsset>), StorageError>;

    async fn list_units(&self, owner_id: Option<&str>) -> Result<Vec<Unit>, StorageError>;

    async fn delete_unit(&self, id: &UnitId) -> Result<bool, StorageError>;
}

/// Persistence facade for lessons. Lessons are immutable once created.
#[async_trait]
pub trait LessonStore: Send + Sync {
    async fn create_lesson(&self, unit_id: &UnitId, draft: LessonDraft)
        -> Result<Lesson, StorageError>;

    async fn get_lesson_by_id(&self, id: &str) -> Result<Option<Lesson>, StorageError>;

    async fn list_lessons_for_unit(&self, unit_id: &UnitId) -> Result<Vec<Lesson>, StorageError>;

    /// Remove every lesson owned by the unit, returning what was removed.
    async fn delete_lessons_for_unit(&self, unit_id: &UnitId)
        -> Result<Vec<Lesson>, StorageError>;
}

/// Shared read-modify-write helper used by the store implementations.
pub(crate) fn modify_unit<F>(unit: &mut Unit, f: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut Unit) -> Result<(), StorageError>,
{
    f(unit)?;
    unit.touch();
    Ok(())
}

pub(crate) fn sort_units(units: &mut [Unit]) {
    units.sort_by_key(|u| std::cmp::Reverse(u.created_at_ms));
}

/// In-memory unit store.
#[derive(Default)]
pub struct InMemoryUnitStore {
    units: RwLock<HashMap<UnitId, Unit>>,
}

impl InMemoryUnitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_unit<F>(&self, id: &UnitId, f: F) -> Result<Unit, StorageError>
    where
        F: FnOnce(&mut Unit) -> Result<(), StorageError>,
    {
        let mut units = self.units.write();
        let unit = units.get_mut(id).ok_or(StorageError::UnitNotFound(*id))?;
        modify_unit(unit, f)?;
        Ok(unit.clone())
    }
}

#[async_trait]
impl UnitLifecycleStore for InMemoryUnitStore {
    async fn create_unit(&self, draft: UnitDraft) -> Result<Unit, StorageError> {
        let unit = Unit::from_draft(draft);
        self.units.write().insert(unit.id, unit.clone());
        Ok(unit)
    }

    async fn get_unit(&self, id: &UnitId) -> Result<Option<Unit>, StorageError> {
        Ok(self.units.read().get(id).cloned())
    }

    async fn update_unit_status(
        &self,
        id: &UnitId,
        status: UnitStatus,
        error_message: Option<String>,
        progress: Option<UnitProgress>,
    ) -> Result<Unit, StorageError> {
        self.with_unit(id, |unit| unit.apply_status(status, error_message, progress))
    }

    async fn update_unit_metadata(
        &self,
        id: &UnitId,
        title: Option<String>,
        learning_objectives: Option<Vec<LearningObjective>>,
    ) -> Result<Unit, StorageError> {
        self.with_unit(id, |unit| {
            if let Some(title) = title {
                unit.title = title;
            }
            if let Some(objectives) = learning_objectives {
                unit.learning_objectives = objectives;
            }
            Ok(())
        })
    }

    async fn set_lesson_order(
        &self,
        id: &UnitId,
        lesson_ids: Vec<LessonId>,
    ) -> Result<Unit, StorageError> {
        self.with_unit(id, |unit| {
            unit.lesson_order = lesson_ids;
            Ok(())
        })
    }

    async fn set_background_task_id(
        &self,
        id: &UnitId,
        flow_name: &str,
        task_id: &str,
    ) -> Result<(), StorageError> {
        self.with_unit(id, |unit| {
            unit.background_task = Some(crate::unit::BackgroundTask {
                flow_name: flow_name.to_string(),
                flow_run_id: unit.id,
                task_id: task_id.to_string(),
            });
            Ok(())
        })?;
        Ok(())
    }

    async fn attach_media(
        &self,
        id: &UnitId,
        asset: MediaAsset,
    ) -> Result<(Unit, Option<MediaAsset>), StorageError> {
        let mut previous = None;
        let unit = self.with_unit(id, |unit| {
            previous = unit.set_media(asset);
            Ok(())
        })?;
        Ok((unit, previous))
    }

    async fn list_units(&self, owner_id: Option<&str>) -> Result<Vec<Unit>, StorageError> {
        let mut units: Vec<Unit> = self
            .units
            .read()
            .values()
            .filter(|u| owner_id.map_or(true, |o| u.owner_id.as_deref() == Some(o)))
            .cloned()
            .collect();
        sort_units(&mut units);
        Ok(units)
    }

    async fn delete_unit(&self, id: &UnitId) -> Result<bool, StorageError> {
        Ok(self.units.write().remove(id).is_some())
    }
}

/// In-memory lesson store.
#[derive(Default)]
pub struct InMemoryLessonStore {
    lessons: RwLock<HashMap<LessonId, Lesson>>,
}

impl InMemoryLessonStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LessonStore for InMemoryLessonStore {
    async fn create_lesson(
        &self,
        unit_id: &UnitId,
        draft: LessonDraft,
    ) -> Result<Lesson, StorageError> {
        let lesson = Lesson::from_draft(*unit_id, draft);
        self.lessons.write().insert(lesson.id.clone(), lesson.clone());
        Ok(lesson)
    }

    async fn get_lesson_by_id(&self, id: &str) -> Result<Option<Lesson>, StorageError> {
        Ok(self.lessons.read().get(id).cloned())
    }

    async fn list_lessons_for_unit(&self, unit_id: &UnitId) -> Result<Vec<Lesson>, StorageError> {
        let mut lessons: Vec<Lesson> = self
            .lessons
            .read()
            .values()
            .filter(|l| &l.unit_id == unit_id)
            .cloned()
            .collect();
        lessons.sort_by_key(|l| l.created_at_ms);
        Ok(lessons)
    }

    async fn delete_lessons_for_unit(
        &self,
        unit_id: &UnitId,
    ) -> Result<Vec<Lesson>, StorageError> {
        let mut lessons = self.lessons.write();
        let ids: Vec<LessonId> = lessons
            .values()
            .filter(|l| &l.unit_id == unit_id)
            .map(|l| l.id.clone())
            .collect();
        Ok(ids.iter().filter_map(|id| lessons.remove(id)).collect())
    }
}
