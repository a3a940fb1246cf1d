use common::error::AppError;
use thiserror::Error;

/// Why a single chunk could not be consolidated. Other chunks of the document continue.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk {chunk_id} of '{document}' failed validation: {source}")]
    Validation {
        document: String,
        chunk_id: String,
        source: AppError,
    },
    #[error("chunk {chunk_id} of '{document}' hit an external service failure: {source}")]
    ExternalService {
        document: String,
        chunk_id: String,
        source: AppError,
    },
    #[error("chunk {chunk_id} of '{document}' could not update the content store: {source}")]
    StoreMutation {
        document: String,
        chunk_id: String,
        source: AppError,
    },
}

impl ChunkError {
    pub fn classify(document: &str, chunk_id: &str, err: AppError) -> Self {
        let document = document.to_string();
        let chunk_id = chunk_id.to_string();
        match err {
            AppError::Validation(_) => ChunkError::Validation {
                document,
                chunk_id,
                source: err,
            },
            err if err.is_store_failure() => ChunkError::StoreMutation {
                document,
                chunk_id,
                source: err,
            },
            err => ChunkError::ExternalService {
                document,
                chunk_id,
                source: err,
            },
        }
    }

    pub fn document(&self) -> &str {
        match self {
            ChunkError::Validation { document, .. }
            | ChunkError::ExternalService { document, .. }
            | ChunkError::StoreMutation { document, .. } => document,
        }
    }

    pub fn chunk_id(&self) -> &str {
        match self {
            ChunkError::Validation { chunk_id, .. }
            | ChunkError::ExternalService { chunk_id, .. }
            | ChunkError::StoreMutation { chunk_id, .. } => chunk_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChunkError::Validation { .. } => "validation",
            ChunkError::ExternalService { .. } => "external_service",
            ChunkError::StoreMutation { .. } => "store_mutation",
        }
    }
}
