//! Config loading facade: layered sources resolved into a [`ForgeConfig`].

use crate::config::merge::merge_policy;
use crate::config::sources::{global_file, workspace_file};
use crate::config::ForgeConfig;
use config::{ConfigError, Environment, File};
use std::path::Path;

/// Environment prefix; `LESSONFORGE__PIPELINE__GENERATE_ART=false` sets `pipeline.generate_art`.
pub const ENV_PREFIX: &str = "LESSONFORGE";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (low to high): defaults, global file, workspace
    /// `config/config.toml`, workspace `config/{LESSONFORGE_ENV}.toml`,
    /// `LESSONFORGE__*` environment variables.
    pub fn load(workspace_root: &Path) -> Result<ForgeConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        builder
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    /// Load a single file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<ForgeConfig, ConfigError> {
        merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()
    }

    pub fn default() -> ForgeConfig {
        ForgeConfig::default()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
