//! Workspace config layers: `config/config.toml`, then `config/{LESSONFORGE_ENV}.toml`.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Selects the environment-specific workspace file.
pub const ENV_VAR: &str = "LESSONFORGE_ENV";

/// Active environment name, `development` when unset or blank.
pub fn environment_name() -> String {
    std::env::var(ENV_VAR)
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "development".to_string())
}

/// Workspace layers in merge order, base first.
pub fn layer_paths(workspace_root: &Path, env_name: &str) -> [PathBuf; 2] {
    let config_dir = workspace_root.join("config");
    [
        config_dir.join("config.toml"),
        config_dir.join(format!("{}.toml", env_name)),
    ]
}

pub fn add_to_builder(
    mut builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    for path in layer_paths(workspace_root, &environment_name()) {
        if path.is_file() {
            debug!(config_path = %path.display(), "Adding workspace configuration layer");
            builder = builder.add_source(File::from(path).required(false));
        }
    }
    Ok(builder)
}
