//! Integration tests for retry, dismissal, intro lessons and recovery

use crate::integration::test_utils::{
    lesson_reply, media_reply, plan_reply, stage_failure, Harness,
};
use lessonforge::assembler::PodcastInput;
use lessonforge::blob::BlobStore;
use lessonforge::error::UnitError;
use lessonforge::generation::GenerationStage;
use lessonforge::orchestrator::{CreateUnitRequest, PipelineSettings};
use lessonforge::unit::{
    intro_lesson_id, LessonKind, LessonStore, ProgressStage, UnitId, UnitStatus,
};
use uuid::Uuid;

async fn failed_unit(harness: &Harness) -> UnitId {
    harness.gateway.push(
        GenerationStage::PlanUnit,
        stage_failure(GenerationStage::PlanUnit, "gateway down"),
    );
    harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap_err();
    let units = harness.orchestrator.list_units(None).await.unwrap();
    units[0].unit_id
}

async fn completed_unit(harness: &Harness) -> UnitId {
    harness
        .gateway
        .push(
            GenerationStage::PlanUnit,
            plan_reply("Tides", &["UO1", "UO2"], &[("One", &["UO1"]), ("Two", &["UO2"])]),
        )
        .fallback(GenerationStage::Lesson, lesson_reply(&["UO1", "UO2"]));
    harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap()
        .unit_id()
}

fn podcast(bytes: &[u8]) -> PodcastInput {
    PodcastInput {
        title: None,
        transcript: "Welcome.".to_string(),
        audio_bytes: bytes.to_vec(),
        content_type: "audio/mpeg".to_string(),
    }
}

#[tokio::test]
async fn retry_requeues_a_failed_unit_under_its_id() {
    let harness = Harness::without_media();
    let unit_id = failed_unit(&harness).await;
    assert_eq!(harness.unit(&unit_id).await.status, UnitStatus::Failed);

    let handle = harness.orchestrator.retry_unit(&unit_id).await.unwrap();
    assert_eq!(handle.unit_id, unit_id);
    assert_eq!(handle.status, UnitStatus::InProgress);
    assert_eq!(harness.queue.submitted_ids(), vec![unit_id]);

    let unit = harness.unit(&unit_id).await;
    assert_eq!(unit.status, UnitStatus::InProgress);
    assert!(unit.error_message.is_none());
    assert!(unit.is_in_stage(ProgressStage::Retrying));
    assert_eq!(unit.background_task.unwrap().task_id, "task-1");
}

#[tokio::test]
async fn retry_is_refused_outside_failed() {
    let harness = Harness::without_media();
    let unit_id = completed_unit(&harness).await;

    let err = harness.orchestrator.retry_unit(&unit_id).await.unwrap_err();
    assert!(matches!(err, UnitError::InvalidState(_)));
    assert!(harness.queue.submitted_ids().is_empty());

    let err = harness
        .orchestrator
        .retry_unit(&Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, UnitError::NotFound(_)));
    assert!(harness.queue.submitted_ids().is_empty());
}

#[tokio::test]
async fn queued_retry_runs_to_completion_once() {
    let harness = Harness::without_media();
    let unit_id = failed_unit(&harness).await;
    harness.orchestrator.retry_unit(&unit_id).await.unwrap();

    // Run the queued attempt the way a worker would
    harness
        .gateway
        .push(
            GenerationStage::PlanUnit,
            plan_reply("Tides", &["UO1"], &[("One", &["UO1"])]),
        )
        .push(GenerationStage::Lesson, lesson_reply(&["UO1"]));
    let outcome = harness.orchestrator.pipeline().run(&unit_id).await.unwrap();
    assert_eq!(outcome.lessons.len(), 1);

    let second = harness.orchestrator.pipeline().run(&unit_id).await.unwrap_err();
    assert!(matches!(second, UnitError::InvalidState(_)));

    let unit = harness.unit(&unit_id).await;
    assert_eq!(unit.status, UnitStatus::Completed);
    let lessons = harness.lessons.list_lessons_for_unit(&unit_id).await.unwrap();
    assert_eq!(lessons.len(), 1);
}

#[tokio::test]
async fn dismissing_a_missing_unit_deletes_nothing() {
    let harness = Harness::without_media();
    let dismissed = harness
        .orchestrator
        .dismiss_unit(&Uuid::new_v4())
        .await
        .unwrap();
    assert!(!dismissed);
    assert_eq!(harness.units.deletes(), 0);
}

#[tokio::test]
async fn dismiss_removes_lessons_and_media() {
    let harness = Harness::new(PipelineSettings {
        generate_art: true,
        generate_podcast: true,
        ..Default::default()
    });
    harness
        .gateway
        .push(GenerationStage::Art, media_reply("image/png", b"png-bytes"))
        .push(GenerationStage::Podcast, media_reply("audio/mpeg", b"mp3-bytes"));
    let unit_id = completed_unit(&harness).await;
    assert_eq!(harness.blob_count(), 2);

    assert!(harness.orchestrator.dismiss_unit(&unit_id).await.unwrap());
    assert_eq!(harness.units.deletes(), 1);
    assert_eq!(harness.blob_count(), 0);
    assert!(harness
        .lessons
        .list_lessons_for_unit(&unit_id)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        harness.orchestrator.unit_status(&unit_id).await,
        Err(UnitError::NotFound(_))
    ));
}

#[tokio::test]
async fn dismissing_one_unit_keeps_identical_art_of_another() {
    let harness = Harness::new(PipelineSettings {
        generate_art: true,
        generate_podcast: false,
        ..Default::default()
    });
    harness
        .gateway
        .push(GenerationStage::Art, media_reply("image/png", b"same-cover"))
        .push(GenerationStage::Art, media_reply("image/png", b"same-cover"));
    let first = completed_unit(&harness).await;
    let second = completed_unit(&harness).await;

    let first_art = harness.unit(&first).await.art.unwrap();
    let second_art = harness.unit(&second).await.art.unwrap();
    assert_eq!(first_art.blob.key, second_art.blob.key);
    assert_eq!(harness.blob_count(), 1);

    assert!(harness.orchestrator.dismiss_unit(&first).await.unwrap());
    let bytes = harness.blobs.load(&second_art.blob).await.unwrap();
    assert_eq!(bytes.as_deref(), Some(&b"same-cover"[..]));

    assert!(harness.orchestrator.dismiss_unit(&second).await.unwrap());
    assert_eq!(harness.blob_count(), 0);
}

#[tokio::test]
async fn clearing_lessons_keeps_the_podcast_audio() {
    let harness = Harness::new(PipelineSettings {
        generate_art: false,
        generate_podcast: true,
        ..Default::default()
    });
    harness
        .gateway
        .push(GenerationStage::Podcast, media_reply("audio/mpeg", b"mp3-bytes"));
    let unit_id = completed_unit(&harness).await;

    let unit = harness.unit(&unit_id).await;
    let podcast = unit.podcast.unwrap();
    let intro = harness.lesson(&intro_lesson_id(&unit_id)).await;
    assert_eq!(intro.audio.as_ref().unwrap().key, podcast.blob.key);

    // Same cleanup a fresh re-run performs before planning.
    let removed = harness
        .orchestrator
        .pipeline()
        .remove_lessons(&unit_id)
        .await
        .unwrap();
    assert_eq!(removed, 3);
    let bytes = harness.blobs.load(&podcast.blob).await.unwrap();
    assert_eq!(bytes.as_deref(), Some(&b"mp3-bytes"[..]));
}

#[tokio::test]
async fn intro_lesson_is_created_once_and_ordered_first() {
    let harness = Harness::without_media();
    let unit_id = completed_unit(&harness).await;
    let creates_before = harness.lessons.creates();

    let (first_id, first) = harness
        .orchestrator
        .create_intro_lesson(&unit_id, podcast(b"audio"))
        .await
        .unwrap();
    let (second_id, second) = harness
        .orchestrator
        .create_intro_lesson(&unit_id, podcast(b"other audio"))
        .await
        .unwrap();

    assert_eq!(first_id, intro_lesson_id(&unit_id));
    assert_eq!(first_id, second_id);
    assert_eq!(first, second);
    assert_eq!(first.kind, LessonKind::Intro);
    assert_eq!(first.title, "Introduction: Tides");
    assert!(first.has_audio);
    assert_eq!(harness.lessons.creates(), creates_before + 1);
    assert_eq!(harness.blob_count(), 1);

    let unit = harness.unit(&unit_id).await;
    assert_eq!(unit.lesson_order.len(), 3);
    assert_eq!(unit.lesson_order[0], first_id);

    let intro = harness.lesson(&first_id).await;
    let audio = harness.blobs.load(intro.audio.as_ref().unwrap()).await.unwrap();
    assert_eq!(audio.as_deref(), Some(&b"audio"[..]));
}

#[tokio::test]
async fn intro_lesson_rejects_empty_audio_and_missing_units() {
    let harness = Harness::without_media();
    let unit_id = completed_unit(&harness).await;
    let creates_before = harness.lessons.creates();

    let err = harness
        .orchestrator
        .create_intro_lesson(&unit_id, podcast(b""))
        .await
        .unwrap_err();
    assert!(matches!(err, UnitError::InvalidArgument(_)));

    let err = harness
        .orchestrator
        .create_intro_lesson(&Uuid::new_v4(), podcast(b"audio"))
        .await
        .unwrap_err();
    assert!(matches!(err, UnitError::NotFound(_)));

    assert_eq!(harness.lessons.creates(), creates_before);
    assert_eq!(harness.blob_count(), 0);
}

#[tokio::test]
async fn recovery_fails_units_left_in_progress() {
    let harness = Harness::without_media();
    let request = CreateUnitRequest {
        background: true,
        ..CreateUnitRequest::for_topic("Tides")
    };
    let queued = harness.orchestrator.create_unit(request).await.unwrap();
    let finished = completed_unit(&harness).await;

    let recovered = harness.orchestrator.recover_interrupted().await.unwrap();
    assert_eq!(recovered, vec![queued.unit_id()]);

    let status = harness.orchestrator.unit_status(&queued.unit_id()).await.unwrap();
    assert_eq!(status.status, UnitStatus::Failed);
    assert_eq!(status.error_message.as_deref(), Some("interrupted"));
    assert_eq!(
        harness.orchestrator.unit_status(&finished).await.unwrap().status,
        UnitStatus::Completed
    );

    harness.orchestrator.retry_unit(&queued.unit_id()).await.unwrap();
    assert_eq!(
        harness.queue.submitted_ids(),
        vec![queued.unit_id(), queued.unit_id()]
    );
}
