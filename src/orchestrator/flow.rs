//! Queue-side entry point for background unit creation.

use crate::error::UnitError;
use crate::orchestrator::pipeline::UnitPipeline;
use crate::queue::FlowHandler;
use crate::unit::{LearnerLevel, Unit, UnitId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const UNIT_CREATION_FLOW: &str = "unit_creation";

/// Inputs recorded with each background submission. The worker re-reads the
/// unit record; these travel with the task so the queue entry is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCreationInputs {
    pub unit_id: UnitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_material: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lesson_count: Option<u32>,
    pub learner_level: LearnerLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub title: String,
}

impl UnitCreationInputs {
    pub fn from_unit(unit: &Unit) -> Self {
        Self {
            unit_id: unit.id,
            topic: unit.source.topic().map(String::from),
            source_material: unit.source.source_material().map(String::from),
            target_lesson_count: unit.target_lesson_count,
            learner_level: unit.learner_level,
            owner_id: unit.owner_id.clone(),
            title: unit.title.clone(),
        }
    }

    pub fn into_map(self) -> Result<Map<String, Value>, UnitError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(UnitError::TaskQueue(
                "unit creation inputs must serialize to an object".to_string(),
            )),
            Err(e) => Err(UnitError::TaskQueue(format!(
                "failed to encode unit creation inputs: {}",
                e
            ))),
        }
    }
}

/// Runs the pipeline for one unit inside a queue worker.
pub struct UnitCreationFlow {
    pipeline: Arc<UnitPipeline>,
}

impl UnitCreationFlow {
    pub fn new(pipeline: Arc<UnitPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl FlowHandler for UnitCreationFlow {
    async fn run(&self, flow_run_id: Uuid, inputs: Map<String, Value>) -> Result<(), UnitError> {
        let inputs: UnitCreationInputs = match serde_json::from_value(Value::Object(inputs)) {
            Ok(inputs) => inputs,
            Err(e) => {
                let message = format!("unit creation inputs: {}", e);
                self.pipeline.mark_failed(&flow_run_id, &message).await;
                return Err(UnitError::InvalidArgument(message));
            }
        };
        if inputs.unit_id != flow_run_id {
            let message = format!(
                "flow run {} carries inputs for unit {}",
                flow_run_id, inputs.unit_id
            );
            self.pipeline.mark_failed(&flow_run_id, &message).await;
            return Err(UnitError::InvalidArgument(message));
        }

        info!(unit_id = %flow_run_id, "Background unit creation started");
        self.pipeline.run_guarded(&flow_run_id).await.map(|_| ())
    }

    async fn on_timeout(&self, flow_run_id: Uuid) {
        warn!(unit_id = %flow_run_id, "Background unit creation timed out");
        self.pipeline.mark_failed(&flow_run_id, "timed out").await;
    }
}
