use async_openai::error::OpenAIError;
use thiserror::Error;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frontmatter error: {0}")]
    Frontmatter(#[from] serde_yaml::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("External service error: {0}")]
    ExternalService(String),
    #[error("Store mutation error at {path}: {message}")]
    StoreMutation { path: String, message: String },
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Consolidation processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether the error came from the content store rather than a remote service.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            AppError::ObjectStore(_)
                | AppError::StoreMutation { .. }
                | AppError::Frontmatter(_)
                | AppError::Io(_)
        )
    }
}
