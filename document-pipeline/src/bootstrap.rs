use std::sync::Arc;

use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{
        config::{AppConfig, CompletionBackendKind, EmbeddingBackendKind, OrchestrationBackendKind},
        embedding::EmbeddingProvider,
    },
};

use crate::{
    completion::CompletionProvider,
    coordinator::PipelineCoordinator,
    index_manager::IndexLifecycleManager,
    orchestration::{OrchestrationProvider, QueueOrchestrationProvider, SimpleOrchestrationProvider},
    parser::ParsingProvider,
    runner::{ChunkingConfig, StageRunner, WorkflowExecutor},
    scanner::BatchStatusScanner,
};

/// All pipeline components, assembled once at startup from configuration and
/// handed around explicitly. There is no ambient registry.
pub struct PipelineRuntime {
    pub db: Arc<SurrealDbClient>,
    pub executor: Arc<WorkflowExecutor>,
    pub orchestration: Arc<dyn OrchestrationProvider>,
    pub coordinator: Arc<PipelineCoordinator>,
    pub index_manager: Arc<IndexLifecycleManager>,
    pub scanner: Arc<BatchStatusScanner>,
}

impl PipelineRuntime {
    pub async fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );
        db.ensure_initialized().await?;

        Self::assemble(db, config).await
    }

    /// Build the component graph over an already-connected client. Tests use
    /// this directly with an in-memory database.
    pub async fn assemble(db: Arc<SurrealDbClient>, config: &AppConfig) -> Result<Self, AppError> {
        let openai_client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(config.openai_api_key.clone().unwrap_or_default())
                .with_api_base(&config.openai_base_url),
        ));

        let embedding = match config.embedding_backend {
            EmbeddingBackendKind::Openai => {
                EmbeddingProvider::new_openai(
                    Arc::clone(&openai_client),
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                )
                .await?
            }
            EmbeddingBackendKind::Fastembed => EmbeddingProvider::new_fastembed(None).await?,
            EmbeddingBackendKind::Hashed => {
                EmbeddingProvider::new_hashed(config.embedding_dimensions as usize)?
            }
        };

        let completion = match config.completion_backend {
            CompletionBackendKind::Openai => CompletionProvider::new_openai(
                Arc::clone(&openai_client),
                config.completion_model.clone(),
            ),
            CompletionBackendKind::Extractive => CompletionProvider::new_extractive(),
        };

        let runner = StageRunner::new(
            Arc::clone(&db),
            Arc::new(ParsingProvider::new()),
            Arc::new(embedding),
            Arc::new(completion),
            ChunkingConfig {
                min_chars: config.chunk_min_chars,
                max_chars: config.chunk_max_chars,
            },
        );
        let executor = Arc::new(WorkflowExecutor::new(runner));

        let orchestration: Arc<dyn OrchestrationProvider> = match config.orchestration_backend {
            OrchestrationBackendKind::Simple => {
                Arc::new(SimpleOrchestrationProvider::new(Arc::clone(&executor)))
            }
            OrchestrationBackendKind::Queue => {
                Arc::new(QueueOrchestrationProvider::new(Arc::clone(&db)))
            }
        };

        let coordinator = Arc::new(PipelineCoordinator::new(
            Arc::clone(&db),
            Arc::clone(&orchestration),
            Arc::clone(&executor),
        ));
        let index_manager = Arc::new(IndexLifecycleManager::new(
            Arc::clone(&db),
            Arc::clone(&orchestration),
        ));
        let scanner = Arc::new(BatchStatusScanner::new(
            Arc::clone(&db),
            config.scan_batch_size,
        ));

        Ok(Self {
            db,
            executor,
            orchestration,
            coordinator,
            index_manager,
            scanner,
        })
    }
}
