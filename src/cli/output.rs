//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::UnitError;

/// Map domain/service errors to a string for CLI output, prefixed with a
/// stable category.
pub fn map_error(e: &UnitError) -> String {
    let category = match e {
        UnitError::NotFound(_) => "not_found",
        UnitError::InvalidState(_) => "invalid_state",
        UnitError::InvalidArgument(_) => "invalid_argument",
        UnitError::GenerationFailure(_) => "generation_failure",
        UnitError::TransientMediaFailure { .. } => "media_failure",
        UnitError::PersistenceFailure(_) => "persistence_failure",
        UnitError::TaskQueue(_) => "task_queue",
        UnitError::ConfigError(_) => "config",
    };
    format!("error[{}]: {}", category, e)
}
