//! Generation domain: the gateway contract, the HTTP gateway, and the unit plan model.

pub mod gateway;
pub mod http;
pub mod plan;

pub use gateway::{
    execute_typed, ContentGenerationGateway, GenerationError, GenerationStage, LessonContent,
    MediaOutput, MediaPayload,
};
pub use http::HttpGenerationGateway;
pub use plan::{LessonSpec, PlanRequest, UnitPlan};
