use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Invalid {stage} transition: {from} -> {event}")]
    InvalidTransition {
        stage: &'static str,
        from: &'static str,
        event: &'static str,
    },
    #[error("Status '{0}' is terminal and only accepts an explicit reset")]
    AlreadyTerminal(&'static str),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("Duplicate run: {0}")]
    DuplicateRun(String),
    #[error("Orchestration engine unavailable: {0}")]
    OrchestrationUnavailable(String),
    #[error("Index not found: {0}")]
    IndexNotFound(String),
    #[error("Index name conflict: {0}")]
    IndexNameConflict(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Corrupt input: {0}")]
    CorruptInput(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether the failure is transient and worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RateLimited(_))
    }

    /// Whether a failed submission can be fixed by the caller (re-ordering,
    /// waiting for an in-flight run) rather than by operator intervention.
    pub fn is_recoverable_submission(&self) -> bool {
        matches!(
            self,
            AppError::PreconditionFailed(_) | AppError::DuplicateRun(_)
        )
    }
}
