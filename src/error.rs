//! Error types for the unit creation pipeline.

use crate::generation::GenerationError;
use crate::unit::{MediaKind, UnitStatus};
use thiserror::Error;
use uuid::Uuid;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Unit not found: {0}")]
    UnitNotFound(Uuid),

    #[error("Lesson not found: {0}")]
    LessonNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: UnitStatus, to: UnitStatus },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors surfaced by the public unit operations.
#[derive(Debug, Clone, Error)]
pub enum UnitError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Media generation failed for {kind}: {message}")]
    TransientMediaFailure { kind: MediaKind, message: String },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Task queue error: {0}")]
    TaskQueue(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StorageError> for UnitError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnitNotFound(id) => UnitError::NotFound(format!("unit {}", id)),
            StorageError::LessonNotFound(id) => UnitError::NotFound(format!("lesson {}", id)),
            StorageError::InvalidTransition { .. } => UnitError::InvalidState(err.to_string()),
            other => UnitError::PersistenceFailure(other.to_string()),
        }
    }
}

impl From<GenerationError> for UnitError {
    fn from(err: GenerationError) -> Self {
        UnitError::GenerationFailure(err.to_string())
    }
}

impl From<config::ConfigError> for UnitError {
    fn from(err: config::ConfigError) -> Self {
        UnitError::ConfigError(err.to_string())
    }
}
