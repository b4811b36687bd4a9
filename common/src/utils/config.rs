use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    Openai,
    Fastembed,
    Hashed,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionBackendKind {
    Openai,
    Extractive,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationBackendKind {
    /// In-process synchronous execution, no durability.
    Simple,
    /// Durable task queue drained by worker processes.
    Queue,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackendKind,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_completion_backend")]
    pub completion_backend: CompletionBackendKind,
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    #[serde(default = "default_orchestration_backend")]
    pub orchestration_backend: OrchestrationBackendKind,
    #[serde(default = "default_chunk_min_chars")]
    pub chunk_min_chars: usize,
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
    #[serde(default = "default_scan_filter")]
    pub scan_filter: String,
    #[serde(default)]
    pub scan_trigger_extraction: bool,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_backend() -> EmbeddingBackendKind {
    EmbeddingBackendKind::Fastembed
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_completion_backend() -> CompletionBackendKind {
    CompletionBackendKind::Openai
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_orchestration_backend() -> OrchestrationBackendKind {
    OrchestrationBackendKind::Queue
}

fn default_chunk_min_chars() -> usize {
    500
}

fn default_chunk_max_chars() -> usize {
    2000
}

fn default_scan_batch_size() -> usize {
    100
}

fn default_scan_filter() -> String {
    "ingestion_failed".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
