//! Lessonforge: Learning Unit Generation
//!
//! Plans a unit from a topic or source text, assembles its lessons through a
//! content-generation gateway, keeps the unit's learning objectives aligned
//! with what the lessons actually cover, and attaches cover art and a podcast.

pub mod assembler;
pub mod blob;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod logging;
pub mod media;
pub mod orchestrator;
pub mod queue;
pub mod unit;
