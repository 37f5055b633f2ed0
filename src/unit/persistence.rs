//! Durable sled-backed unit and lesson stores.

use std::io;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, IVec, Transactional, Tree};

use crate::error::StorageError;
use crate::unit::model::{
    BackgroundTask, LearningObjective, Lesson, LessonDraft, LessonId, MediaAsset, Unit, UnitDraft,
    UnitId,
};
use crate::unit::state::{UnitProgress, UnitStatus};
use crate::unit::store::{modify_unit, sort_units, LessonStore, UnitLifecycleStore};

const TREE_UNITS: &str = "units";
const TREE_LESSONS: &str = "lessons";
const TREE_LESSONS_BY_UNIT: &str = "lessons_by_unit";

#[derive(Clone)]
pub struct SledUnitStore {
    db: Db,
    units: Tree,
}

impl SledUnitStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let units = db.open_tree(TREE_UNITS).map_err(to_storage_io)?;
        Ok(Self { db, units })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }

    fn read(&self, id: &UnitId) -> Result<Option<Unit>, StorageError> {
        let Some(raw) = self.units.get(id.as_bytes()).map_err(to_storage_io)? else {
            return Ok(None);
        };
        Ok(Some(decode(&raw)?))
    }

    fn write(&self, unit: &Unit) -> Result<(), StorageError> {
        self.units
            .insert(unit.id.as_bytes(), encode(unit)?)
            .map_err(to_storage_io)?;
        Ok(())
    }

    /// Read-modify-write that only lands if the record is unchanged since the
    /// read; otherwise `f` is applied again to the newer record.
    fn with_unit<F>(&self, id: &UnitId, mut f: F) -> Result<Unit, StorageError>
    where
        F: FnMut(&mut Unit) -> Result<(), StorageError>,
    {
        loop {
            let current = self
                .units
                .get(id.as_bytes())
                .map_err(to_storage_io)?
                .ok_or(StorageError::UnitNotFound(*id))?;
            let mut unit: Unit = decode(&current)?;
            modify_unit(&mut unit, &mut f)?;
            let swapped = self
                .units
                .compare_and_swap(id.as_bytes(), Some(current), Some(encode(&unit)?))
                .map_err(to_storage_io)?;
            if swapped.is_ok() {
                return Ok(unit);
            }
        }
    }
}

#[async_trait]
impl UnitLifecycleStore for SledUnitStore {
    async fn create_unit(&self, draft: UnitDraft) -> Result<Unit, StorageError> {
        let unit = Unit::from_draft(draft);
        self.write(&unit)?;
        Ok(unit)
    }

    async fn get_unit(&self, id: &UnitId) -> Result<Option<Unit>, StorageError> {
        self.read(id)
    }

    async fn update_unit_status(
        &self,
        id: &UnitId,
        status: UnitStatus,
        error_message: Option<String>,
        progress: Option<UnitProgress>,
    ) -> Result<Unit, StorageError> {
        self.with_unit(id, |unit| {
            unit.apply_status(status, error_message.clone(), progress.clone())
        })
    }

    async fn update_unit_metadata(
        &self,
        id: &UnitId,
        title: Option<String>,
        learning_objectives: Option<Vec<LearningObjective>>,
    ) -> Result<Unit, StorageError> {
        self.with_unit(id, |unit| {
            if let Some(title) = &title {
                unit.title = title.clone();
            }
            if let Some(objectives) = &learning_objectives {
                unit.learning_objectives = objectives.clone();
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
            unit.lesson_order = lesson_ids.clone();
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
            unit.background_task = Some(BackgroundTask {
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
            previous = unit.set_media(asset.clone());
            Ok(())
        })?;
        Ok((unit, previous))
    }

    async fn list_units(&self, owner_id: Option<&str>) -> Result<Vec<Unit>, StorageError> {
        let mut out = Vec::new();
        for result in self.units.iter() {
            let (_, value) = result.map_err(to_storage_io)?;
            let unit: Unit = decode(&value)?;
            if owner_id.map_or(true, |o| unit.owner_id.as_deref() == Some(o)) {
                out.push(unit);
            }
        }
        sort_units(&mut out);
        Ok(out)
    }

    async fn delete_unit(&self, id: &UnitId) -> Result<bool, StorageError> {
        let removed = self.units.remove(id.as_bytes()).map_err(to_storage_io)?;
        Ok(removed.is_some())
    }
}

/// Lessons keyed by id, with a `{unit_id}:{lesson_id}` secondary index so a
/// unit's lessons can be found without a full scan.
#[derive(Clone)]
pub struct SledLessonStore {
    lessons: Tree,
    by_unit: Tree,
}

impl SledLessonStore {
    pub fn new(db: &Db) -> Result<Self, StorageError> {
        let lessons = db.open_tree(TREE_LESSONS).map_err(to_storage_io)?;
        let by_unit = db.open_tree(TREE_LESSONS_BY_UNIT).map_err(to_storage_io)?;
        Ok(Self { lessons, by_unit })
    }

    fn index_key(unit_id: &UnitId, lesson_id: &str) -> String {
        format!("{unit_id}:{lesson_id}")
    }

    fn lesson_ids_for_unit(&self, unit_id: &UnitId) -> Result<Vec<LessonId>, StorageError> {
        let prefix = format!("{unit_id}:");
        let mut ids = Vec::new();
        for result in self.by_unit.scan_prefix(prefix.as_bytes()) {
            let (_, value) = result.map_err(to_storage_io)?;
            ids.push(String::from_utf8_lossy(&value).to_string());
        }
        Ok(ids)
    }
}

#[async_trait]
impl LessonStore for SledLessonStore {
    async fn create_lesson(
        &self,
        unit_id: &UnitId,
        draft: LessonDraft,
    ) -> Result<Lesson, StorageError> {
        let lesson = Lesson::from_draft(*unit_id, draft);
        let value = encode(&lesson)?;
        let index_key = Self::index_key(unit_id, &lesson.id);
        (&self.lessons, &self.by_unit)
            .transaction(
                |(lessons, by_unit)| -> ConflictableTransactionResult<(), StorageError> {
                    lessons.insert(lesson.id.as_bytes(), value.as_slice())?;
                    by_unit.insert(index_key.as_bytes(), lesson.id.as_bytes())?;
                    Ok(())
                },
            )
            .map_err(from_transaction)?;
        Ok(lesson)
    }

    async fn get_lesson_by_id(&self, id: &str) -> Result<Option<Lesson>, StorageError> {
        let Some(raw) = self.lessons.get(id.as_bytes()).map_err(to_storage_io)? else {
            return Ok(None);
        };
        Ok(Some(decode(&raw)?))
    }

    async fn list_lessons_for_unit(&self, unit_id: &UnitId) -> Result<Vec<Lesson>, StorageError> {
        let mut out = Vec::new();
        for id in self.lesson_ids_for_unit(unit_id)? {
            if let Some(lesson) = self.get_lesson_by_id(&id).await? {
                out.push(lesson);
            }
        }
        out.sort_by_key(|l| l.created_at_ms);
        Ok(out)
    }

    async fn delete_lessons_for_unit(
        &self,
        unit_id: &UnitId,
    ) -> Result<Vec<Lesson>, StorageError> {
        let ids = self.lesson_ids_for_unit(unit_id)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<IVec> = (&self.lessons, &self.by_unit)
            .transaction(
                |(lessons, by_unit)| -> ConflictableTransactionResult<Vec<IVec>, StorageError> {
                    let mut removed = Vec::with_capacity(ids.len());
                    for id in &ids {
                        if let Some(raw) = lessons.remove(id.as_bytes())? {
                            removed.push(raw);
                        }
                        by_unit.remove(Self::index_key(unit_id, id).as_bytes())?;
                    }
                    Ok(removed)
                },
            )
            .map_err(from_transaction)?;
        raw.iter().map(|r| decode::<Lesson>(r)).collect()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(to_storage_data)
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(raw).map_err(to_storage_data)
}

fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

fn from_transaction(err: TransactionError<StorageError>) -> StorageError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => to_storage_io(e),
    }
}

fn to_storage_data(err: serde_json::Error) -> StorageError {
    StorageError::Serialization(err.to_string())
}
