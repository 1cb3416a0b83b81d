use std::sync::Arc;

use thiserror::Error;

use crate::core::config::{AppPaths, Settings};
use crate::llm::{ModelProvider, OpenAiCompatProvider};
use crate::metrics::MetricsStore;
use crate::rag::RagPipeline;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to initialize metrics store: {0}")]
    Metrics(String),
}

/// Global application state shared across all routes and background tasks.
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: Arc<Settings>,
    pub models: Arc<dyn ModelProvider>,
    pub pipeline: Arc<RagPipeline>,
    pub metrics: MetricsStore,
}

impl AppState {
    /// Initializes from the default data dir and config file, with the
    /// OpenAI-compatible provider as the model backend.
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(AppPaths::new());
        let settings = Arc::new(Settings::load(&paths.config_path));
        let models: Arc<dyn ModelProvider> =
            Arc::new(OpenAiCompatProvider::new(settings.models.clone()));

        Self::assemble(paths, settings, models).await
    }

    /// Wires stores and pipeline from explicit parts (used by tests to
    /// substitute paths and providers).
    pub async fn assemble(
        paths: Arc<AppPaths>,
        settings: Arc<Settings>,
        models: Arc<dyn ModelProvider>,
    ) -> Result<Arc<Self>, InitializationError> {
        let metrics = MetricsStore::new(paths.db_path.clone())
            .await
            .map_err(|err| InitializationError::Metrics(err.to_string()))?;

        let pipeline = Arc::new(RagPipeline::new(
            Arc::clone(&models),
            settings.answer.clone(),
        ));

        // A corrupt index leaves the service uninitialized rather than dead;
        // the next rebuild replaces it anyway.
        if let Err(err) = pipeline.load_index(&paths.index_dir).await {
            tracing::warn!("Failed to load persisted index: {}", err);
        }

        Ok(Arc::new(Self {
            paths,
            settings,
            models,
            pipeline,
            metrics,
        }))
    }
}
