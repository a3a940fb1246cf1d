use common::{
    error::AppError,
    storage::{store::ContentStore, types::chunk::Chunk, vector_index::VectorIndex},
};
use tracing::error;

use super::{config::ConsolidationConfig, error::ChunkError, services::ConsolidationServices};
use crate::resolver::Resolution;

/// Validated model output for one chunk.
#[derive(Debug, Clone)]
pub struct DerivedTexts {
    pub summary: String,
    pub question: String,
    pub topic: String,
}

#[derive(Debug, Clone)]
pub struct ChunkEmbeddings {
    pub question: Vec<f32>,
    pub topic: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ResolvedItems {
    pub question: Resolution,
    pub topic: Resolution,
}

/// What a consolidated chunk contributed to the knowledge base.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub final_question: String,
    pub topic: String,
    pub record_location: String,
    /// Topic whose folder received a new record from this chunk.
    pub new_record_topic: Option<String>,
}

pub struct ChunkContext<'a> {
    pub document: &'a str,
    pub chunk: &'a Chunk,
    pub chunk_id: String,
    pub config: &'a ConsolidationConfig,
    pub services: &'a dyn ConsolidationServices,
    pub index: &'a dyn VectorIndex,
    pub store: &'a dyn ContentStore,
    pub derived: Option<DerivedTexts>,
    pub embeddings: Option<ChunkEmbeddings>,
    pub resolved: Option<ResolvedItems>,
    pub outcome: Option<ChunkOutcome>,
}

impl<'a> ChunkContext<'a> {
    pub fn new(
        document: &'a str,
        chunk: &'a Chunk,
        config: &'a ConsolidationConfig,
        services: &'a dyn ConsolidationServices,
        index: &'a dyn VectorIndex,
        store: &'a dyn ContentStore,
    ) -> Self {
        Self {
            document,
            chunk,
            chunk_id: chunk.chunk_id(document),
            config,
            services,
            index,
            store,
            derived: None,
            embeddings: None,
            resolved: None,
            outcome: None,
        }
    }

    pub fn derived(&self) -> Result<&DerivedTexts, AppError> {
        self.derived
            .as_ref()
            .ok_or_else(|| AppError::InternalError("derived texts expected to be available".into()))
    }

    pub fn take_embeddings(&mut self) -> Result<ChunkEmbeddings, AppError> {
        self.embeddings.take().ok_or_else(|| {
            AppError::InternalError("embeddings expected to be available for resolution".into())
        })
    }

    pub fn resolved(&self) -> Result<&ResolvedItems, AppError> {
        self.resolved.as_ref().ok_or_else(|| {
            AppError::InternalError("resolutions expected to be available for persistence".into())
        })
    }

    pub fn take_outcome(&mut self) -> Result<ChunkOutcome, AppError> {
        self.outcome
            .take()
            .ok_or_else(|| AppError::InternalError("chunk outcome expected to be available".into()))
    }

    pub fn abort(&mut self, err: AppError) -> ChunkError {
        let failure = ChunkError::classify(self.document, &self.chunk_id, err);
        error!(
            document = %self.document,
            chunk_id = %self.chunk_id,
            kind = failure.kind(),
            error = %failure,
            "chunk consolidation aborted"
        );
        failure
    }
}
