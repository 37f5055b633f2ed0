//! Unit creation orchestration.
//!
//! [`UnitOrchestrator`] owns the public operations; [`UnitPipeline`] is the
//! body they run, inline for foreground requests and through
//! [`UnitCreationFlow`] when a queue worker picks up a background request.

pub mod flow;
pub mod pipeline;
pub mod service;

pub use flow::{UnitCreationFlow, UnitCreationInputs, UNIT_CREATION_FLOW};
pub use pipeline::{
    filter_objectives, LessonFailure, LessonFailurePolicy, LessonRef, PipelineOutcome,
    PipelineSettings, UnitPipeline,
};
pub use service::{
    CreateUnitRequest, CreateUnitResult, UnitHandle, UnitOrchestrator, UnitStatusView,
    UnitSummary,
};
