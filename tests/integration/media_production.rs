//! Integration tests for best-effort unit media

use crate::integration::test_utils::{
    lesson_reply, media_reply, plan_reply, stage_failure, Harness,
};
use lessonforge::error::UnitError;
use lessonforge::generation::GenerationStage;
use lessonforge::orchestrator::{CreateUnitRequest, CreateUnitResult, PipelineSettings};
use lessonforge::unit::{intro_lesson_id, LessonKind, MediaKind, UnitStatus};

fn media_harness(generate_art: bool, generate_podcast: bool) -> Harness {
    let harness = Harness::new(PipelineSettings {
        generate_art,
        generate_podcast,
        ..Default::default()
    });
    harness
        .gateway
        .push(
            GenerationStage::PlanUnit,
            plan_reply("Tides", &["UO1"], &[("One", &["UO1"]), ("Two", &["UO1"])]),
        )
        .fallback(GenerationStage::Lesson, lesson_reply(&["UO1"]));
    harness
}

#[tokio::test]
async fn art_failing_twice_does_not_fail_the_unit() {
    let harness = media_harness(true, false);
    harness
        .gateway
        .fallback(GenerationStage::Art, stage_failure(GenerationStage::Art, "safety filter"));

    let result = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap();

    let unit = harness.unit(&result.unit_id()).await;
    assert_eq!(unit.status, UnitStatus::Completed);
    assert!(unit.art.is_none());
    assert_eq!(harness.gateway.calls(GenerationStage::Art).len(), 2);
    assert_eq!(harness.blob_count(), 0);
}

#[tokio::test]
async fn art_retried_once_is_attached() {
    let harness = media_harness(true, false);
    harness
        .gateway
        .push(GenerationStage::Art, stage_failure(GenerationStage::Art, "busy"))
        .push(GenerationStage::Art, media_reply("image/png", b"png-bytes"));

    let result = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap();

    let unit = harness.unit(&result.unit_id()).await;
    let art = unit.art.expect("art attached");
    assert_eq!(art.kind, MediaKind::Art);
    assert_eq!(art.blob.content_type, "image/png");
    assert_eq!(art.blob.size, 9);
    assert_eq!(harness.gateway.calls(GenerationStage::Art).len(), 2);

    let art_inputs = &harness.gateway.calls(GenerationStage::Art)[0];
    assert_eq!(art_inputs["unit_title"], "Tides");
    assert_eq!(art_inputs["lesson_titles"][1], "Two");
}

#[tokio::test]
async fn podcast_becomes_the_first_lesson() {
    let harness = media_harness(false, true);
    harness
        .gateway
        .push(GenerationStage::Podcast, media_reply("audio/mpeg", b"mp3-bytes"));

    let result = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap();
    let CreateUnitResult::Completed(summary) = result else {
        panic!("expected a completed unit");
    };

    let intro_id = intro_lesson_id(&summary.unit_id);
    assert_eq!(summary.lessons.len(), 3);
    assert_eq!(summary.lessons[0].id, intro_id);

    let unit = harness.unit(&summary.unit_id).await;
    assert_eq!(unit.lesson_order[0], intro_id);
    assert_eq!(unit.podcast.unwrap().duration_seconds, Some(42));

    let intro = harness.lesson(&intro_id).await;
    assert_eq!(intro.kind, LessonKind::Intro);
    assert_eq!(intro.transcript.as_deref(), Some("Welcome to the unit."));
    assert!(intro.exercises.is_empty());
}

#[tokio::test]
async fn wrong_media_type_is_rejected() {
    let harness = media_harness(false, true);
    harness
        .gateway
        .fallback(GenerationStage::Podcast, media_reply("image/png", b"not audio"));

    let result = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap();

    let unit = harness.unit(&result.unit_id()).await;
    assert_eq!(unit.status, UnitStatus::Completed);
    assert!(unit.podcast.is_none());
    assert_eq!(unit.lesson_order.len(), 2);
}

#[tokio::test]
async fn regenerating_art_replaces_the_asset() {
    let harness = media_harness(true, false);
    harness
        .gateway
        .push(GenerationStage::Art, media_reply("image/png", b"first"))
        .push(GenerationStage::Art, media_reply("image/png", b"second"));
    let unit_id = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap()
        .unit_id();
    let first = harness.unit(&unit_id).await.art.unwrap();

    let second = harness.orchestrator.create_unit_art(&unit_id).await.unwrap();
    assert_ne!(first.blob.key, second.blob.key);
    assert_eq!(harness.unit(&unit_id).await.art, Some(second));
    assert_eq!(harness.blob_count(), 1);
}

#[tokio::test]
async fn podcast_on_demand_is_idempotent() {
    let harness = media_harness(false, false);
    harness
        .gateway
        .push(GenerationStage::Podcast, media_reply("audio/mpeg", b"mp3-bytes"));
    let unit_id = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap()
        .unit_id();

    let (asset, intro) = harness.orchestrator.create_unit_podcast(&unit_id).await.unwrap();
    let (again, intro_again) = harness.orchestrator.create_unit_podcast(&unit_id).await.unwrap();
    assert_eq!(asset, again);
    assert_eq!(intro, intro_again);
    assert_eq!(harness.gateway.calls(GenerationStage::Podcast).len(), 1);
    assert_eq!(harness.unit(&unit_id).await.lesson_order.len(), 3);
}

#[tokio::test]
async fn media_for_a_missing_unit_is_not_found() {
    let harness = Harness::without_media();
    let err = harness
        .orchestrator
        .create_unit_art(&uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, UnitError::NotFound(_)));
    assert!(harness.gateway.calls(GenerationStage::Art).is_empty());
}
