mod config;
mod context;
mod error;
mod mutation;
mod promotion;
mod services;
mod stages;
mod state;

pub use config::{ConsolidationConfig, ConsolidationTuning};
pub use context::ChunkOutcome;
pub use error::ChunkError;
pub use mutation::atomic_update;
#[allow(clippy::module_name_repetitions)]
pub use services::{
    ConsolidationServices, DefaultConsolidationServices, QUESTION_FALLBACK, SUMMARY_FALLBACK,
    TOPIC_FALLBACK,
};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_openai::Client;
use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{ContentStore, StorageManager},
        types::{
            chunk::Chunk, processing_ledger::ProcessingLedger, source_document::SourceFrontmatter,
            union_into,
        },
        vector_index::{SurrealVectorIndex, VectorIndex},
    },
    utils::{
        config::AppConfig,
        embedding::EmbeddingProvider,
        frontmatter::{parse_frontmatter, render_with_frontmatter},
    },
};
use tracing::{debug, info, warn};

use crate::chunker;

use self::{
    context::ChunkContext,
    promotion::CategoryPromotion,
    stages::{derive, embed, persist, record, resolve},
    state::pending,
};

/// Result of handing one document to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// The document was already flagged as consolidated; nothing was touched.
    Skipped,
    Consolidated(ConsolidatedDocument),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedDocument {
    /// Document text with chunk markers and a frontmatter flagging it consolidated.
    pub content: String,
    pub answered_questions: Vec<String>,
    pub chunk_count: usize,
    pub processed_chunks: usize,
    /// Chunks the ledger already recorded as done by an earlier run.
    pub skipped_chunks: usize,
    pub category: Option<String>,
}

#[allow(clippy::module_name_repetitions)]
pub struct ConsolidationEngine {
    config: ConsolidationConfig,
    services: Arc<dyn ConsolidationServices>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn ContentStore>,
}

impl ConsolidationEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<async_openai::config::OpenAIConfig>>,
        app_config: &AppConfig,
        storage: StorageManager,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        let services =
            DefaultConsolidationServices::new(openai_client, app_config, embedding_provider);

        Self::with_services(
            ConsolidationConfig::from_app_config(app_config),
            Arc::new(services),
            Arc::new(SurrealVectorIndex::new(db)),
            Arc::new(storage),
        )
    }

    pub fn with_services(
        config: ConsolidationConfig,
        services: Arc<dyn ConsolidationServices>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn ContentStore>,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            config,
            services,
            index,
            store,
        })
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Consolidates one document into the knowledge base.
    ///
    /// Chunks are handled one after another; a failing chunk is logged and the rest of
    /// the document continues. When any chunk failed the ledger keeps the committed
    /// chunks and a `Processing` error is returned, so a rerun resumes where this one
    /// stopped.
    #[tracing::instrument(skip_all, fields(document = %document))]
    pub async fn consolidate_document(
        &self,
        document: &str,
        content: &str,
    ) -> Result<DocumentOutcome, AppError> {
        let (frontmatter, body): (SourceFrontmatter, &str) = parse_frontmatter(content)?;
        if frontmatter.consolidated {
            debug!(document, "document already consolidated; skipping");
            return Ok(DocumentOutcome::Skipped);
        }

        let tuning = &self.config.tuning;
        let chunks = chunker::chunk(body, tuning.chunk_max_tokens, tuning.chunk_min_tokens);
        let mut ledger = ProcessingLedger::load(self.store(), &self.config.output_folder).await;

        let started = Instant::now();
        let mut answered_questions = Vec::new();
        let mut topics = Vec::new();
        let mut topic_folders = Vec::new();
        let mut processed_chunks = 0usize;
        let mut skipped_chunks = 0usize;
        let mut failures = Vec::new();

        for chunk in &chunks {
            let chunk_id = chunk.chunk_id(document);
            if ledger.is_processed(&chunk_id) {
                debug!(document, chunk_id = %chunk_id, "chunk already processed; skipping");
                skipped_chunks = skipped_chunks.saturating_add(1);
                continue;
            }

            match self.process_chunk(document, chunk, &mut ledger).await {
                Ok(outcome) => {
                    processed_chunks = processed_chunks.saturating_add(1);
                    union_into(&mut answered_questions, [outcome.final_question]);
                    union_into(&mut topics, [outcome.topic]);
                    union_into(&mut topic_folders, outcome.new_record_topic);
                }
                Err(failure) => {
                    if let Err(err) = ledger.forget(self.store(), &chunk_id).await {
                        warn!(chunk_id = %chunk_id, error = %err, "could not clear ledger entry of failed chunk");
                    }
                    failures.push(failure);
                }
            }
        }

        let category = if topics.len() > 1 {
            self.promote(&topics, &topic_folders).await
        } else {
            None
        };

        let success = failures.is_empty();
        ledger.finish(self.store(), document, success).await?;

        info!(
            document,
            chunks = chunks.len(),
            processed_chunks,
            skipped_chunks,
            failed_chunks = failures.len(),
            topics = topics.len(),
            total_ms = Self::duration_millis(started.elapsed()),
            "document consolidation finished"
        );

        if !success {
            let failed: Vec<String> = failures.iter().map(ToString::to_string).collect();
            return Err(AppError::Processing(format!(
                "{} of {} chunks of '{document}' failed: {}",
                failed.len(),
                chunks.len(),
                failed.join("; ")
            )));
        }

        let annotated = chunker::annotate(body, &chunks);
        let frontmatter = frontmatter.mark_consolidated(answered_questions.clone(), Utc::now());
        let content = render_with_frontmatter(&frontmatter, &annotated)?;

        Ok(DocumentOutcome::Consolidated(ConsolidatedDocument {
            content,
            answered_questions,
            chunk_count: chunks.len(),
            processed_chunks,
            skipped_chunks,
            category,
        }))
    }

    async fn promote(&self, topics: &[String], topic_folders: &[String]) -> Option<String> {
        let promotion = CategoryPromotion {
            config: &self.config,
            services: self.services.as_ref(),
            index: self.index.as_ref(),
            store: self.store(),
        };

        match promotion.promote(topics, topic_folders).await {
            Ok(category) => Some(category),
            Err(err) => {
                warn!(error = %err, topics = ?topics, "category promotion failed; records stay in their topic folders");
                None
            }
        }
    }

    #[tracing::instrument(skip_all, fields(document = %document, start = chunk.start_offset, end = chunk.end_offset))]
    async fn process_chunk(
        &self,
        document: &str,
        chunk: &Chunk,
        ledger: &mut ProcessingLedger,
    ) -> Result<ChunkOutcome, ChunkError> {
        let mut ctx = ChunkContext::new(
            document,
            chunk,
            &self.config,
            self.services.as_ref(),
            self.index.as_ref(),
            self.store(),
        );

        let machine = pending();
        let chunk_started = Instant::now();

        let stage_start = Instant::now();
        let machine = derive(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let derive_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = embed(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let embed_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = resolve(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let resolve_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = persist(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let persist_duration = stage_start.elapsed();

        let _machine = record(machine, &mut ctx, ledger)
            .await
            .map_err(|err| ctx.abort(err))?;

        let outcome = ctx.take_outcome().map_err(|err| ctx.abort(err))?;

        info!(
            document,
            chunk_id = %ctx.chunk_id,
            question = %outcome.final_question,
            topic = %outcome.topic,
            record = %outcome.record_location,
            total_ms = Self::duration_millis(chunk_started.elapsed()),
            derive_ms = Self::duration_millis(derive_duration),
            embed_ms = Self::duration_millis(embed_duration),
            resolve_ms = Self::duration_millis(resolve_duration),
            persist_ms = Self::duration_millis(persist_duration),
            "chunk consolidated"
        );

        Ok(outcome)
    }
}
