#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod formatting;
pub mod pipeline;
pub mod resolver;
pub mod utils;

use common::{
    error::AppError,
    storage::{
        store::{file_name_of, ContentStore},
        types::{processing_ledger::ProcessingLedger, source_document::SourceFrontmatter},
    },
    utils::frontmatter::{parse_frontmatter, render_with_frontmatter},
};
pub use pipeline::{
    ConsolidatedDocument, ConsolidationConfig, ConsolidationEngine, ConsolidationTuning,
    DocumentOutcome,
};
use tracing::{error, info, warn};

const DOCUMENT_EXTENSION: &str = ".md";

/// Tally of one pass over the input folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Consolidates every markdown document under the input folder, one at a time.
///
/// A document that fails is logged and counted; the run moves on to the next one.
pub async fn run_consolidation(engine: &ConsolidationEngine) -> Result<RunSummary, AppError> {
    let store = engine.store();
    let documents = markdown_documents(store, &engine.config().input_folder).await?;
    info!(documents = documents.len(), "consolidation run started");

    let mut summary = RunSummary::default();
    for location in documents {
        match consolidate_location(engine, &location).await {
            Ok(DocumentOutcome::Skipped) => summary.skipped = summary.skipped.saturating_add(1),
            Ok(DocumentOutcome::Consolidated(result)) => {
                info!(
                    document = %location,
                    questions = result.answered_questions.len(),
                    category = result.category.as_deref().unwrap_or("-"),
                    "document consolidated"
                );
                summary.processed = summary.processed.saturating_add(1);
            }
            Err(err) => {
                error!(document = %location, error = %err, "document consolidation failed");
                summary.failed = summary.failed.saturating_add(1);
            }
        }
    }

    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "consolidation run finished"
    );
    Ok(summary)
}

async fn consolidate_location(
    engine: &ConsolidationEngine,
    location: &str,
) -> Result<DocumentOutcome, AppError> {
    let store = engine.store();
    let content = store.read(location).await?;
    let outcome = engine
        .consolidate_document(document_name(location), &content)
        .await?;

    if let DocumentOutcome::Consolidated(result) = &outcome {
        store.write(location, &result.content).await?;
    }
    Ok(outcome)
}

/// Clears the consolidated flag on every input document and drops the ledger, so the
/// next run processes everything again. Returns the number of documents reset.
pub async fn reset_documents(
    store: &dyn ContentStore,
    config: &ConsolidationConfig,
) -> Result<usize, AppError> {
    let mut reset = 0usize;
    for location in markdown_documents(store, &config.input_folder).await? {
        let content = store.read(&location).await?;
        let (frontmatter, body): (SourceFrontmatter, &str) = match parse_frontmatter(&content) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(document = %location, error = %err, "unreadable frontmatter; document not reset");
                continue;
            }
        };
        if !frontmatter.consolidated {
            continue;
        }

        let updated = render_with_frontmatter(&frontmatter.reset(), body)?;
        store.write(&location, &updated).await?;
        reset = reset.saturating_add(1);
    }

    ProcessingLedger::discard(store, &config.output_folder).await?;
    info!(documents = reset, "consolidation state reset");
    Ok(reset)
}

/// Reset followed by a full run.
pub async fn rebuild(engine: &ConsolidationEngine) -> Result<RunSummary, AppError> {
    reset_documents(engine.store(), engine.config()).await?;
    run_consolidation(engine).await
}

async fn markdown_documents(store: &dyn ContentStore, folder: &str) -> Result<Vec<String>, AppError> {
    Ok(store
        .list_files(folder)
        .await?
        .into_iter()
        .filter(|location| location.ends_with(DOCUMENT_EXTENSION))
        .collect())
}

fn document_name(location: &str) -> &str {
    let file_name = file_name_of(location);
    file_name
        .strip_suffix(DOCUMENT_EXTENSION)
        .unwrap_or(file_name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use common::storage::{
        store::{testing::memory_storage, StorageManager},
        types::derived_item::{IndexMatch, ItemKind, ItemMetadata},
        vector_index::VectorIndex,
    };

    use super::*;
    use crate::pipeline::ConsolidationServices;

    /// Answers every chunk with the same question and topic, except that chunks of the
    /// document `broken` and chunks mentioning quicksand get an invalid topic.
    struct FixedServices;

    #[async_trait]
    impl ConsolidationServices for FixedServices {
        async fn summarize(&self, text: &str) -> Result<String, AppError> {
            Ok(text.to_string())
        }

        async fn topic(&self, document: &str, context: &str) -> Result<String, AppError> {
            if document == "broken" || context.contains("Quicksand") {
                return Ok("!".into());
            }
            Ok("Notes".into())
        }

        async fn question(&self, _text: &str) -> Result<String, AppError> {
            Ok("What do the notes say".into())
        }

        async fn merge_questions(&self, existing: &str, _candidate: &str) -> Result<String, AppError> {
            Ok(existing.to_string())
        }

        async fn unify_topics(&self, _topics: &[String]) -> Result<String, AppError> {
            Ok("General".into())
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Ok(vec![1.0, 0.0])
        }
    }

    /// Index that never finds neighbors.
    struct EmptyIndex;

    #[async_trait]
    impl VectorIndex for EmptyIndex {
        async fn upsert(
            &self,
            _kind: ItemKind,
            _id: &str,
            _embedding: &[f32],
            _metadata: &ItemMetadata,
        ) -> Result<(), AppError> {
            Ok(())
        }

        async fn delete_and_upsert(
            &self,
            _kind: ItemKind,
            _old_id: &str,
            _new_id: &str,
            _embedding: &[f32],
            _metadata: &ItemMetadata,
        ) -> Result<(), AppError> {
            Ok(())
        }

        async fn fetch_metadata(
            &self,
            _kind: ItemKind,
            _id: &str,
        ) -> Result<Option<ItemMetadata>, AppError> {
            Ok(None)
        }

        async fn update_metadata(
            &self,
            _kind: ItemKind,
            id: &str,
            _metadata: &ItemMetadata,
        ) -> Result<(), AppError> {
            Err(AppError::NotFound(id.to_string()))
        }

        async fn query(
            &self,
            _kind: ItemKind,
            _embedding: &[f32],
            _top_k: usize,
        ) -> Result<Vec<IndexMatch>, AppError> {
            Ok(Vec::new())
        }
    }

    fn config() -> ConsolidationConfig {
        ConsolidationConfig {
            tuning: ConsolidationTuning {
                chunk_min_tokens: 1,
                chunk_max_tokens: 50,
                ..ConsolidationTuning::default()
            },
            input_folder: "raw".into(),
            output_folder: "out".into(),
        }
    }

    fn engine() -> (ConsolidationEngine, Arc<StorageManager>) {
        engine_with(config())
    }

    fn engine_with(config: ConsolidationConfig) -> (ConsolidationEngine, Arc<StorageManager>) {
        let store = Arc::new(memory_storage());
        let engine = ConsolidationEngine::with_services(
            config,
            Arc::new(FixedServices),
            Arc::new(EmptyIndex),
            Arc::clone(&store) as Arc<dyn ContentStore>,
        )
        .expect("engine");
        (engine, store)
    }

    #[test]
    fn document_name_drops_folder_and_extension() {
        assert_eq!(document_name("raw/journal/2024-05-01.md"), "2024-05-01");
        assert_eq!(document_name("notes.md"), "notes");
    }

    #[tokio::test]
    async fn run_writes_results_back_and_continues_past_failures() {
        let (engine, store) = engine();
        store
            .write("raw/alpha.md", "Gardens need steady watering during summer.")
            .await
            .expect("seed");
        store
            .write("raw/broken.md", "Soil drains slowly after heavy rain.")
            .await
            .expect("seed");
        store
            .write("raw/done.md", "---\nconsolidated: true\n---\nAlready handled.")
            .await
            .expect("seed");
        store
            .write("raw/image.png", "not markdown")
            .await
            .expect("seed");

        let summary = run_consolidation(&engine).await.expect("run");

        assert_eq!(
            summary,
            RunSummary {
                processed: 1,
                skipped: 1,
                failed: 1
            }
        );

        let alpha = store.read("raw/alpha.md").await.expect("read");
        let (frontmatter, _): (SourceFrontmatter, &str) =
            parse_frontmatter(&alpha).expect("frontmatter");
        assert!(frontmatter.consolidated);
        assert_eq!(
            frontmatter.answered_questions,
            vec!["What do the notes say?".to_string()]
        );

        let broken = store.read("raw/broken.md").await.expect("read");
        assert_eq!(broken, "Soil drains slowly after heavy rain.");
        assert!(store
            .exists("out/notes/What do the notes say?.md")
            .await
            .expect("exists"));
    }

    #[tokio::test]
    async fn successful_document_keeps_ledger_entries_of_a_failed_one() {
        let mut config = config();
        config.tuning.chunk_max_tokens = 4;
        let (engine, store) = engine_with(config);
        let mixed = "Gardens need steady watering during summer. Quicksand swallows careless travellers.";
        store.write("raw/a_mixed.md", mixed).await.expect("seed");
        store
            .write("raw/b_ok.md", "Compost improves soil structure.")
            .await
            .expect("seed");

        let summary = run_consolidation(&engine).await.expect("run");

        assert_eq!(
            summary,
            RunSummary {
                processed: 1,
                skipped: 0,
                failed: 1
            }
        );

        let chunks = crate::chunker::chunk(mixed, 4, 1);
        assert_eq!(chunks.len(), 2);
        let ledger = ProcessingLedger::load(store.as_ref(), "out").await;
        assert!(
            ledger.is_processed(&chunks[0].chunk_id("a_mixed")),
            "the committed chunk of the failed document must survive the later success"
        );
        assert!(!ledger.is_processed(&chunks[1].chunk_id("a_mixed")));
        assert_eq!(ledger.processed_count(), 1);
        assert_eq!(store.read("raw/a_mixed.md").await.expect("read"), mixed);
    }

    #[tokio::test]
    async fn reset_clears_flags_and_ledger() {
        let (engine, store) = engine();
        store
            .write("raw/a.md", "---\nconsolidated: true\nauthor: Ada\n---\nBody.")
            .await
            .expect("seed");
        store
            .write("raw/b.md", "No frontmatter here.")
            .await
            .expect("seed");
        store
            .write(&ProcessingLedger::location_for("out"), "{\"raw-0-5\":true}")
            .await
            .expect("seed ledger");

        let reset = reset_documents(engine.store(), engine.config())
            .await
            .expect("reset");

        assert_eq!(reset, 1);
        let a = store.read("raw/a.md").await.expect("read");
        let (frontmatter, body): (SourceFrontmatter, &str) =
            parse_frontmatter(&a).expect("frontmatter");
        assert!(!frontmatter.consolidated);
        assert!(frontmatter.extra.contains_key("author"));
        assert_eq!(body, "Body.");
        assert_eq!(
            store.read("raw/b.md").await.expect("read"),
            "No frontmatter here."
        );
        assert!(!store
            .exists(&ProcessingLedger::location_for("out"))
            .await
            .expect("exists"));
    }

    #[tokio::test]
    async fn rebuild_processes_previously_consolidated_documents() {
        let (engine, store) = engine();
        store
            .write(
                "raw/a.md",
                "---\nconsolidated: true\n---\nCompost improves soil structure over time.",
            )
            .await
            .expect("seed");

        let summary = rebuild(&engine).await.expect("rebuild");

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 0);
        assert!(store
            .exists("out/notes/What do the notes say?.md")
            .await
            .expect("exists"));
    }
}
