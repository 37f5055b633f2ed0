//! Integration tests for partial lesson failure handling

use crate::integration::test_utils::{lesson_reply, plan_reply, stage_failure, Harness};
use lessonforge::error::UnitError;
use lessonforge::generation::GenerationStage;
use lessonforge::orchestrator::{
    CreateUnitRequest, CreateUnitResult, LessonFailurePolicy, PipelineSettings,
};
use lessonforge::unit::{LessonStore, UnitLifecycleStore, UnitStatus};

fn three_lesson_plan(harness: &Harness) {
    harness.gateway.push(
        GenerationStage::PlanUnit,
        plan_reply(
            "Tides",
            &["UO1", "UO2", "UO3"],
            &[("One", &["UO1"]), ("Two", &["UO2"]), ("Three", &["UO3"])],
        ),
    );
}

fn harness_with(policy: LessonFailurePolicy) -> Harness {
    Harness::new(PipelineSettings {
        generate_art: false,
        generate_podcast: false,
        failure_policy: policy,
        ..Default::default()
    })
}

#[tokio::test]
async fn tolerated_failure_completes_without_the_lesson() {
    let harness = harness_with(LessonFailurePolicy::Threshold {
        max_failed_fraction: 0.5,
    });
    three_lesson_plan(&harness);
    harness
        .gateway
        .push(GenerationStage::Lesson, lesson_reply(&["UO1"]))
        .push(GenerationStage::Lesson, stage_failure(GenerationStage::Lesson, "model overloaded"))
        .push(GenerationStage::Lesson, lesson_reply(&["UO3"]));

    let result = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap();
    let CreateUnitResult::Completed(summary) = result else {
        panic!("expected a completed unit");
    };

    assert_eq!(summary.lesson_count, 2);
    assert_eq!(summary.failed_lessons.len(), 1);
    assert_eq!(summary.failed_lessons[0].index, 1);
    assert_eq!(summary.failed_lessons[0].title, "Two");
    assert!(summary.failed_lessons[0].message.contains("model overloaded"));

    let unit = harness.unit(&summary.unit_id).await;
    assert_eq!(unit.status, UnitStatus::Completed);
    let ids: Vec<&str> = unit.learning_objectives.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["UO1", "UO3"]);
}

#[tokio::test]
async fn fail_immediately_stops_at_first_failed_lesson() {
    let harness = harness_with(LessonFailurePolicy::FailImmediately);
    three_lesson_plan(&harness);
    harness
        .gateway
        .push(GenerationStage::Lesson, lesson_reply(&["UO1"]))
        .push(GenerationStage::Lesson, stage_failure(GenerationStage::Lesson, "model overloaded"));

    let err = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap_err();
    let UnitError::GenerationFailure(message) = &err else {
        panic!("expected a generation failure, got {:?}", err);
    };
    assert!(message.contains("1 of 3 lessons failed"));
    assert!(message.contains("Sample errors"));
    assert_eq!(harness.gateway.calls(GenerationStage::Lesson).len(), 2);

    let units = harness.units.list_units(None).await.unwrap();
    assert_eq!(units[0].status, UnitStatus::Failed);
    assert_eq!(units[0].error_message.as_deref(), Some(err.to_string().as_str()));
    // The lesson persisted before the abort stays until a retry clears it
    let lessons = harness.lessons.list_lessons_for_unit(&units[0].id).await.unwrap();
    assert_eq!(lessons.len(), 1);
    assert!(units[0].lesson_order.is_empty());
}

#[tokio::test]
async fn threshold_exceeded_fails_the_unit() {
    let harness = harness_with(LessonFailurePolicy::Threshold {
        max_failed_fraction: 0.5,
    });
    three_lesson_plan(&harness);
    harness
        .gateway
        .fallback(GenerationStage::Lesson, stage_failure(GenerationStage::Lesson, "timeout"));

    let err = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap_err();
    assert!(matches!(err, UnitError::GenerationFailure(_)));
    // 1/3 is tolerated, 2/3 is not
    assert_eq!(harness.gateway.calls(GenerationStage::Lesson).len(), 2);
}

#[tokio::test]
async fn no_successful_lessons_always_fails() {
    let harness = harness_with(LessonFailurePolicy::Threshold {
        max_failed_fraction: 1.0,
    });
    three_lesson_plan(&harness);
    harness
        .gateway
        .fallback(GenerationStage::Lesson, stage_failure(GenerationStage::Lesson, "timeout"));

    let err = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap_err();
    let UnitError::GenerationFailure(message) = err else {
        panic!("expected a generation failure");
    };
    assert!(message.contains("no lessons were generated"));
    assert_eq!(harness.gateway.calls(GenerationStage::Lesson).len(), 3);
}

#[tokio::test]
async fn malformed_lesson_output_counts_as_a_failed_lesson() {
    let harness = harness_with(LessonFailurePolicy::default());
    three_lesson_plan(&harness);
    harness
        .gateway
        .push(GenerationStage::Lesson, lesson_reply(&["UO1"]))
        .push(
            GenerationStage::Lesson,
            Ok(serde_json::json!({ "exercises": "none" })),
        )
        .push(GenerationStage::Lesson, lesson_reply(&["UO3"]));

    let result = harness
        .orchestrator
        .create_unit(CreateUnitRequest::for_topic("Tides"))
        .await
        .unwrap();
    let CreateUnitResult::Completed(summary) = result else {
        panic!("expected a completed unit");
    };
    assert_eq!(summary.failed_lessons.len(), 1);
    assert!(summary.failed_lessons[0].message.contains("Malformed lesson output"));
}
