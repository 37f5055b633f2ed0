//! Merge rules: defaults, override order, conflict handling.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Only scalar keys that later layers commonly override are seeded here; the
/// remaining defaults come from the serde `Default` impls.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("gateway.request_timeout_secs", 120)?
        .set_default("pipeline.generate_art", true)?
        .set_default("pipeline.generate_podcast", false)?
        .set_default("queue.workers", 2)?
        .set_default("logging.level", "info")
}
