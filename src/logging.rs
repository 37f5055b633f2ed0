//! Structured logging with `tracing`.
//!
//! [`LoggingConfig`] comes from the `[logging]` config section; the process
//! environment then overrides it through `LESSONFORGE_LOG` (a full filter),
//! `LESSONFORGE_LOG_FORMAT`, `LESSONFORGE_LOG_OUTPUT` and
//! `LESSONFORGE_LOG_MODULES` (`target=level,...`).

use crate::error::UnitError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt as std_fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("invalid log format '{}' (expected text or json)", other)),
        }
    }
}

/// Where log lines go. Stdout is left to command results unless asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    #[default]
    Stderr,
    File,
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            other => Err(format!(
                "invalid log output '{}' (expected stdout, stderr or file)",
                other
            )),
        }
    }
}

impl std_fmt::Display for LogOutput {
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        f.write_str(match self {
            LogOutput::Stdout => "stdout",
            LogOutput::Stderr => "stderr",
            LogOutput::File => "file",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level: trace, debug, info, warn, error, off
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Used when `output` is `file`
    pub file: PathBuf,
    /// ANSI colors for text logs on a terminal stream
    pub color: bool,
    /// Per-target levels, e.g. `lessonforge::queue = "debug"`
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file: PathBuf::from("lessonforge.log"),
            color: true,
            modules: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Apply `LESSONFORGE_LOG_FORMAT`, `LESSONFORGE_LOG_OUTPUT` and
    /// `LESSONFORGE_LOG_MODULES`.
    pub fn with_env_overrides(mut self) -> Result<Self, UnitError> {
        if let Ok(format) = std::env::var("LESSONFORGE_LOG_FORMAT") {
            self.format = format.parse().map_err(UnitError::ConfigError)?;
        }
        if let Ok(output) = std::env::var("LESSONFORGE_LOG_OUTPUT") {
            self.output = output.parse().map_err(UnitError::ConfigError)?;
        }
        if let Ok(modules) = std::env::var("LESSONFORGE_LOG_MODULES") {
            for spec in modules.split(',').filter(|s| !s.trim().is_empty()) {
                let (target, level) = spec.split_once('=').ok_or_else(|| {
                    UnitError::ConfigError(format!("invalid module log spec '{}'", spec))
                })?;
                self.modules
                    .insert(target.trim().to_string(), level.trim().to_string());
            }
        }
        Ok(self)
    }

    /// Filter directives in `EnvFilter` syntax: the base level, then one
    /// `target=level` per module override.
    pub fn directives(&self) -> String {
        let level = self.level.trim();
        if level == "off" {
            return "off".to_string();
        }
        std::iter::once(level.to_string())
            .chain(
                self.modules
                    .iter()
                    .map(|(target, level)| format!("{}={}", target.trim(), level.trim())),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> Result<EnvFilter, UnitError> {
        if let Ok(filter) = EnvFilter::try_from_env("LESSONFORGE_LOG") {
            return Ok(filter);
        }
        let directives = self.directives();
        EnvFilter::try_new(&directives).map_err(|e| {
            UnitError::ConfigError(format!("invalid log filter '{}': {}", directives, e))
        })
    }

    fn make_writer(&self) -> Result<BoxMakeWriter, UnitError> {
        match self.output {
            LogOutput::Stdout => Ok(BoxMakeWriter::new(std::io::stdout)),
            LogOutput::Stderr => Ok(BoxMakeWriter::new(std::io::stderr)),
            LogOutput::File => {
                if let Some(dir) = self.file.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir).map_err(|e| {
                        UnitError::ConfigError(format!(
                            "cannot create log directory {}: {}",
                            dir.display(),
                            e
                        ))
                    })?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.file)
                    .map_err(|e| {
                        UnitError::ConfigError(format!(
                            "cannot open log file {}: {}",
                            self.file.display(),
                            e
                        ))
                    })?;
                Ok(BoxMakeWriter::new(std::sync::Mutex::new(file)))
            }
        }
    }
}

/// Install the global subscriber. Environment overrides win over `config`,
/// which wins over defaults.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), UnitError> {
    let config = config.cloned().unwrap_or_default().with_env_overrides()?;
    let filter = config.env_filter()?;
    let writer = config.make_writer()?;
    let ansi = config.color && config.output != LogOutput::File;

    let registry = Registry::default().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };
    installed.map_err(|e| UnitError::ConfigError(format!("failed to install logger: {}", e)))
}
