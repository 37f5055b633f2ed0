//! Shared test utilities for integration tests
//!
//! A scripted generation gateway, store wrappers that count writes, a queue
//! that records submissions, and a harness wiring them into an orchestrator.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lessonforge::blob::InMemoryBlobStore;
use lessonforge::error::{StorageError, UnitError};
use lessonforge::generation::{ContentGenerationGateway, GenerationError, GenerationStage};
use lessonforge::orchestrator::{PipelineSettings, UnitOrchestrator};
use lessonforge::queue::{TaskQueue, TaskSubmission};
use lessonforge::unit::{
    InMemoryLessonStore, InMemoryUnitStore, LearningObjective, Lesson, LessonDraft, LessonId,
    LessonStore, MediaAsset, Unit, UnitDraft, UnitId, UnitLifecycleStore, UnitProgress,
    UnitStatus,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

type Reply = Result<Value, GenerationError>;

/// Gateway answering each stage from a script. Scripted replies are consumed
/// in order; once a stage's script runs dry its fallback answers.
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<GenerationStage, VecDeque<Reply>>>,
    fallbacks: Mutex<HashMap<GenerationStage, Reply>>,
    calls: Mutex<Vec<(GenerationStage, Value)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stage: GenerationStage, reply: Reply) -> &Self {
        self.scripts.lock().entry(stage).or_default().push_back(reply);
        self
    }

    pub fn fallback(&self, stage: GenerationStage, reply: Reply) -> &Self {
        self.fallbacks.lock().insert(stage, reply);
        self
    }

    pub fn calls(&self, stage: GenerationStage) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, inputs)| inputs.clone())
            .collect()
    }
}

#[async_trait]
impl ContentGenerationGateway for ScriptedGateway {
    async fn execute(&self, stage: GenerationStage, inputs: Value) -> Reply {
        self.calls.lock().push((stage, inputs));
        if let Some(reply) = self.scripts.lock().get_mut(&stage).and_then(|q| q.pop_front()) {
            return reply;
        }
        self.fallbacks
            .lock()
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| {
                Err(GenerationError::StageFailed {
                    stage,
                    message: "no scripted reply".to_string(),
                })
            })
    }
}

pub fn stage_failure(stage: GenerationStage, message: &str) -> Reply {
    Err(GenerationError::StageFailed {
        stage,
        message: message.to_string(),
    })
}

/// `plan_unit` output. Each lesson is `(title, planned objective ids)`.
pub fn plan_reply(title: &str, objectives: &[&str], lessons: &[(&str, &[&str])]) -> Reply {
    Ok(json!({
        "title": title,
        "learning_objectives": objectives
            .iter()
            .map(|id| json!({ "id": id, "text": format!("Objective {}", id) }))
            .collect::<Vec<_>>(),
        "lessons": lessons
            .iter()
            .map(|(title, ids)| json!({
                "title": title,
                "learning_objective": format!("Learn {}", title),
                "objective_ids": ids,
            }))
            .collect::<Vec<_>>(),
    }))
}

/// `lesson` output with one exercise per tagged objective.
pub fn lesson_reply(objective_ids: &[&str]) -> Reply {
    Ok(json!({
        "exercises": objective_ids
            .iter()
            .enumerate()
            .map(|(i, id)| json!({
                "id": format!("ex-{}", i + 1),
                "kind": "multiple_choice",
                "prompt": format!("Question on {}", id),
                "options": ["a", "b"],
                "answer": "a",
                "objective_id": id,
            }))
            .collect::<Vec<_>>(),
    }))
}

pub fn media_reply(content_type: &str, bytes: &[u8]) -> Reply {
    Ok(json!({
        "content_type": content_type,
        "payload": { "encoding": "base64", "data": STANDARD.encode(bytes) },
        "description": "generated",
        "transcript": "Welcome to the unit.",
        "duration_seconds": 42,
    }))
}

/// Unit store that counts creations and deletions.
#[derive(Default)]
pub struct CountingUnitStore {
    inner: InMemoryUnitStore,
    pub creates: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl CountingUnitStore {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitLifecycleStore for CountingUnitStore {
    async fn create_unit(&self, draft: UnitDraft) -> Result<Unit, StorageError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_unit(draft).await
    }

    async fn get_unit(&self, id: &UnitId) -> Result<Option<Unit>, StorageError> {
        self.inner.get_unit(id).await
    }

    async fn update_unit_status(
        &self,
        id: &UnitId,
        status: UnitStatus,
        error_message: Option<String>,
        progress: Option<UnitProgress>,
    ) -> Result<Unit, StorageError> {
        self.inner
            .update_unit_status(id, status, error_message, progress)
            .await
    }

    async fn update_unit_metadata(
        &self,
        id: &UnitId,
        title: Option<String>,
        learning_objectives: Option<Vec<LearningObjective>>,
    ) -> Result<Unit, StorageError> {
        self.inner
            .update_unit_metadata(id, title, learning_objectives)
            .await
    }

    async fn set_lesson_order(
        &self,
        id: &UnitId,
        lesson_ids: Vec<LessonId>,
    ) -> Result<Unit, StorageError> {
        self.inner.set_lesson_order(id, lesson_ids).await
    }

    async fn set_background_task_id(
        &self,
        id: &UnitId,
        flow_name: &str,
        task_id: &str,
    ) -> Result<(), StorageError> {
        self.inner.set_background_task_id(id, flow_name, task_id).await
    }

    async fn attach_media(
        &self,
        id: &UnitId,
        asset: MediaAsset,
    ) -> Result<(Unit, Option<MediaAsset>), StorageError> {
        self.inner.attach_media(id, asset).await
    }

    async fn list_units(&self, owner_id: Option<&str>) -> Result<Vec<Unit>, StorageError> {
        self.inner.list_units(owner_id).await
    }

    async fn delete_unit(&self, id: &UnitId) -> Result<bool, StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_unit(id).await
    }
}

/// Lesson store that counts creations.
#[derive(Default)]
pub struct CountingLessonStore {
    inner: InMemoryLessonStore,
    pub creates: AtomicUsize,
}

impl CountingLessonStore {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LessonStore for CountingLessonStore {
    async fn create_lesson(
        &self,
        unit_id: &UnitId,
        draft: LessonDraft,
    ) -> Result<Lesson, StorageError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_lesson(unit_id, draft).await
    }

    async fn get_lesson_by_id(&self, id: &str) -> Result<Option<Lesson>, StorageError> {
        self.inner.get_lesson_by_id(id).await
    }

    async fn list_lessons_for_unit(&self, unit_id: &UnitId) -> Result<Vec<Lesson>, StorageError> {
        self.inner.list_lessons_for_unit(unit_id).await
    }

    async fn delete_lessons_for_unit(
        &self,
        unit_id: &UnitId,
    ) -> Result<Vec<Lesson>, StorageError> {
        self.inner.delete_lessons_for_unit(unit_id).await
    }
}

/// Queue that records submissions without running them.
#[derive(Default)]
pub struct RecordingQueue {
    pub submissions: Mutex<Vec<(String, Uuid, Map<String, Value>)>>,
    pub reject: Mutex<bool>,
}

impl RecordingQueue {
    pub fn submitted_ids(&self) -> Vec<Uuid> {
        self.submissions.lock().iter().map(|(_, id, _)| *id).collect()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn submit(
        &self,
        flow_name: &str,
        flow_run_id: Uuid,
        inputs: Map<String, Value>,
    ) -> Result<TaskSubmission, UnitError> {
        if *self.reject.lock() {
            return Err(UnitError::TaskQueue("queue unavailable".to_string()));
        }
        let mut submissions = self.submissions.lock();
        submissions.push((flow_name.to_string(), flow_run_id, inputs));
        Ok(TaskSubmission {
            task_id: format!("task-{}", submissions.len()),
        })
    }
}

/// In-memory orchestrator with every collaborator exposed for assertions.
pub struct Harness {
    pub orchestrator: UnitOrchestrator,
    pub gateway: Arc<ScriptedGateway>,
    pub units: Arc<CountingUnitStore>,
    pub lessons: Arc<CountingLessonStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub queue: Arc<RecordingQueue>,
}

impl Harness {
    pub fn new(settings: PipelineSettings) -> Self {
        let gateway = Arc::new(ScriptedGateway::new());
        let units = Arc::new(CountingUnitStore::default());
        let lessons = Arc::new(CountingLessonStore::default());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let orchestrator = UnitOrchestrator::new(
            units.clone(),
            lessons.clone(),
            gateway.clone(),
            queue.clone(),
            blobs.clone(),
            settings,
        );
        Self {
            orchestrator,
            gateway,
            units,
            lessons,
            blobs,
            queue,
        }
    }

    /// Harness whose pipeline produces no media.
    pub fn without_media() -> Self {
        Self::new(PipelineSettings {
            generate_art: false,
            generate_podcast: false,
            ..Default::default()
        })
    }

    pub async fn unit(&self, id: &UnitId) -> Unit {
        self.units.get_unit(id).await.unwrap().unwrap()
    }

    pub async fn lesson(&self, id: &str) -> Lesson {
        self.lessons.get_lesson_by_id(id).await.unwrap().unwrap()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }
}
