//! CLI parse: clap types for lessonforge. No behavior; definitions only.

use crate::logging::{LogFormat, LogOutput};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// lessonforge CLI - Generate learning units from a topic or source text
#[derive(Parser, Debug)]
#[command(name = "lessonforge")]
#[command(about = "Plan, generate and manage learning units")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (for config/config.toml lookup)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<LogOutput>,

    /// Log file path (when output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a unit from a topic or a source text file
    Create {
        /// Topic to build the unit around
        #[arg(long, conflicts_with = "source_file", required_unless_present = "source_file")]
        topic: Option<String>,
        /// File whose text seeds the unit
        #[arg(long)]
        source_file: Option<PathBuf>,
        /// Queue the unit and return immediately
        #[arg(long)]
        background: bool,
        /// Target number of lessons
        #[arg(long)]
        lessons: Option<u32>,
        /// Learner level (beginner, intermediate, advanced)
        #[arg(long, default_value = "beginner")]
        level: String,
        /// Owner recorded on the unit
        #[arg(long)]
        owner: Option<String>,
        /// Unit title (the plan names the unit when omitted)
        #[arg(long)]
        title: Option<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Requeue a failed unit
    Retry {
        unit_id: Uuid,
    },
    /// Delete a unit with its lessons and media
    Dismiss {
        unit_id: Uuid,
    },
    /// Show a unit's status and progress
    Status {
        unit_id: Uuid,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List units
    List {
        /// Only units owned by this owner
        #[arg(long)]
        owner: Option<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Generate or replace a unit's cover art
    Art {
        unit_id: Uuid,
    },
    /// Generate a unit's podcast and intro lesson
    Podcast {
        unit_id: Uuid,
    },
    /// Mark units interrupted by a previous run as failed
    Recover,
}

impl Commands {
    /// Whether the command hands work to the task queue.
    pub fn uses_queue(&self) -> bool {
        matches!(
            self,
            Commands::Create {
                background: true,
                ..
            } | Commands::Retry { .. }
        )
    }
}
