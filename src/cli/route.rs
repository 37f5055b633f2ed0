//! CLI route: single route table and run context. Dispatches to the
//! orchestrator and presentation.

use crate::blob::{BlobStore, FsBlobStore};
use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_intro_text, format_media_text, format_recovered_text, format_status_text,
    format_unit_handle_text, format_unit_list_text, format_unit_summary_text, to_json,
};
use crate::config::{ConfigLoader, ForgeConfig};
use crate::error::{StorageError, UnitError};
use crate::generation::{ContentGenerationGateway, HttpGenerationGateway};
use crate::orchestrator::{
    CreateUnitRequest, CreateUnitResult, UnitCreationFlow, UnitOrchestrator, UnitPipeline,
    UNIT_CREATION_FLOW,
};
use crate::queue::{LocalTaskQueue, TaskQueue};
use crate::unit::{LearnerLevel, LessonStore, SledLessonStore, SledUnitStore, UnitLifecycleStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Runtime context for CLI execution: config, stores, queue and orchestrator.
pub struct RunContext {
    config: ForgeConfig,
    orchestrator: UnitOrchestrator,
    queue: Arc<LocalTaskQueue>,
    unit_store: Arc<SledUnitStore>,
}

impl RunContext {
    /// Build the context from the workspace root and an optional config path.
    /// Must be called inside a tokio runtime.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, UnitError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            UnitError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Self::from_config(config)
    }

    pub fn from_config(config: ForgeConfig) -> Result<Self, UnitError> {
        let data_dir = config.storage.resolved_data_dir();
        std::fs::create_dir_all(&data_dir).map_err(StorageError::IoError)?;
        let db = open_db(&config.storage.units_db_path())?;

        let unit_store = Arc::new(SledUnitStore::new(db.clone())?);
        let units: Arc<dyn UnitLifecycleStore> = unit_store.clone();
        let lessons: Arc<dyn LessonStore> = Arc::new(SledLessonStore::new(&db)?);
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.blob_root())?);

        let http_gateway = HttpGenerationGateway::new(
            config.gateway.endpoint.clone(),
            config.gateway.resolve_api_key(),
            config.gateway.request_timeout(),
        )?;
        let http_client = http_gateway.client().clone();
        let gateway: Arc<dyn ContentGenerationGateway> = Arc::new(http_gateway);

        let pipeline = Arc::new(
            UnitPipeline::new(units, lessons, gateway, blobs, config.pipeline.clone())
                .with_http_client(http_client),
        );
        let queue = Arc::new(LocalTaskQueue::new(config.queue.clone()));
        queue.register(
            UNIT_CREATION_FLOW,
            Arc::new(UnitCreationFlow::new(Arc::clone(&pipeline))),
        );
        let task_queue: Arc<dyn TaskQueue> = queue.clone();
        let orchestrator = UnitOrchestrator::from_pipeline(pipeline, task_queue);

        info!(data_dir = %data_dir.display(), "Run context initialized");
        Ok(Self {
            config,
            orchestrator,
            queue,
            unit_store,
        })
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &UnitOrchestrator {
        &self.orchestrator
    }

    /// Execute a CLI command via the single route table.
    pub async fn execute(&self, command: &Commands) -> Result<String, UnitError> {
        if command.uses_queue() {
            self.queue.start();
        }

        match command {
            Commands::Create {
                topic,
                source_file,
                background,
                lessons,
                level,
                owner,
                title,
                format,
            } => {
                let source_material = source_file
                    .as_deref()
                    .map(read_source_file)
                    .transpose()?;
                let learner_level: LearnerLevel =
                    level.parse().map_err(UnitError::InvalidArgument)?;
                let result = self
                    .orchestrator
                    .create_unit(CreateUnitRequest {
                        topic: topic.clone(),
                        source_material,
                        background: *background,
                        target_lesson_count: *lessons,
                        learner_level,
                        owner_id: owner.clone(),
                        title: title.clone(),
                    })
                    .await?;
                match (result, format.as_str()) {
                    (CreateUnitResult::Completed(summary), "json") => to_json(&summary),
                    (CreateUnitResult::Completed(summary), _) => {
                        Ok(format_unit_summary_text(&summary))
                    }
                    (CreateUnitResult::Queued(handle), "json") => to_json(&handle),
                    (CreateUnitResult::Queued(handle), _) => Ok(format_unit_handle_text(&handle)),
                }
            }
            Commands::Retry { unit_id } => {
                let handle = self.orchestrator.retry_unit(unit_id).await?;
                Ok(format_unit_handle_text(&handle))
            }
            Commands::Dismiss { unit_id } => {
                if self.orchestrator.dismiss_unit(unit_id).await? {
                    Ok(format!("Unit {} dismissed.", unit_id))
                } else {
                    Ok(format!("Unit {} not found; nothing to dismiss.", unit_id))
                }
            }
            Commands::Status { unit_id, format } => {
                let view = self.orchestrator.unit_status(unit_id).await?;
                if format == "json" {
                    to_json(&view)
                } else {
                    Ok(format_status_text(&view))
                }
            }
            Commands::List { owner, format } => {
                let views = self.orchestrator.list_units(owner.as_deref()).await?;
                if format == "json" {
                    to_json(&views)
                } else {
                    Ok(format_unit_list_text(&views))
                }
            }
            Commands::Art { unit_id } => {
                let asset = self.orchestrator.create_unit_art(unit_id).await?;
                Ok(format_media_text(&asset))
            }
            Commands::Podcast { unit_id } => {
                let (asset, intro) = self.orchestrator.create_unit_podcast(unit_id).await?;
                Ok(format_intro_text(&asset, &intro))
            }
            Commands::Recover => {
                let recovered = self.orchestrator.recover_interrupted().await?;
                Ok(format_recovered_text(&recovered))
            }
        }
    }

    /// Let queued work finish, stop the workers and flush the stores.
    pub async fn shutdown(&self) -> Result<(), UnitError> {
        let stats = self.queue.stats();
        if stats.pending + stats.running > 0 {
            info!(pending = stats.pending, running = stats.running, "Waiting for queued units");
        }
        self.queue.wait_idle(None).await?;
        self.queue.stop().await;
        self.unit_store.flush()?;
        Ok(())
    }
}

fn open_db(path: &Path) -> Result<sled::Db, UnitError> {
    sled::open(path).map_err(|e| {
        UnitError::PersistenceFailure(format!(
            "Failed to open sled database at {}: {}",
            path.display(),
            e
        ))
    })
}

fn read_source_file(path: &Path) -> Result<String, UnitError> {
    std::fs::read_to_string(path).map_err(|e| {
        UnitError::InvalidArgument(format!("Failed to read {}: {}", path.display(), e))
    })
}
