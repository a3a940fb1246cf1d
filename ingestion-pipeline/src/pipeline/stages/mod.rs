use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        store::{join_path, ContentStore},
        types::{
            answer_record::{
                create_frontmatter, location_block, record_file_name, AnswerFrontmatter,
                RecordContribution,
            },
            derived_item::ItemKind,
            processing_ledger::ProcessingLedger,
        },
    },
    utils::frontmatter::{parse_frontmatter, render_with_frontmatter},
};
use state_machines::core::GuardError;
use tracing::{debug, instrument, warn};

use super::{
    context::{ChunkContext, ChunkEmbeddings, ChunkOutcome, DerivedTexts, ResolvedItems},
    mutation::atomic_update,
    state::{ChunkMachine, Derived, Embedded, Pending, Persisted, Recorded, Resolved},
};
use crate::{
    formatting::{validate_question, validate_topic},
    resolver::MergeResolver,
};

#[instrument(
    level = "trace",
    skip_all,
    fields(document = %ctx.document, chunk_id = %ctx.chunk_id)
)]
pub async fn derive(
    machine: ChunkMachine<(), Pending>,
    ctx: &mut ChunkContext<'_>,
) -> Result<ChunkMachine<(), Derived>, AppError> {
    let summary = ctx.services.summarize(&ctx.chunk.text).await?;
    let raw_question = ctx.services.question(&summary).await?;
    let topic_context = format!("{summary}\n\n{}", ctx.chunk.text);
    let raw_topic = ctx.services.topic(ctx.document, &topic_context).await?;

    let question = validate_question(&raw_question)?;
    let topic = validate_topic(&raw_topic)?;

    debug!(
        document = %ctx.document,
        chunk_id = %ctx.chunk_id,
        summary_chars = summary.chars().count(),
        question = %question,
        topic = %topic,
        "chunk items derived"
    );

    ctx.derived = Some(DerivedTexts {
        summary,
        question,
        topic,
    });

    machine
        .derive()
        .map_err(|(_, guard)| map_guard_error("derive", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document = %ctx.document, chunk_id = %ctx.chunk_id)
)]
pub async fn embed(
    machine: ChunkMachine<(), Derived>,
    ctx: &mut ChunkContext<'_>,
) -> Result<ChunkMachine<(), Embedded>, AppError> {
    let (question_text, topic_text) = {
        let derived = ctx.derived()?;
        (derived.question.clone(), derived.topic.clone())
    };

    let question = require_embedding(ctx.services.embed(&question_text).await?, &question_text)?;
    let topic = require_embedding(ctx.services.embed(&topic_text).await?, &topic_text)?;

    debug!(
        document = %ctx.document,
        chunk_id = %ctx.chunk_id,
        dimensions = question.len(),
        "chunk items embedded"
    );

    ctx.embeddings = Some(ChunkEmbeddings { question, topic });

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document = %ctx.document, chunk_id = %ctx.chunk_id)
)]
pub async fn resolve(
    machine: ChunkMachine<(), Embedded>,
    ctx: &mut ChunkContext<'_>,
) -> Result<ChunkMachine<(), Resolved>, AppError> {
    let embeddings = ctx.take_embeddings()?;
    let (question_text, topic_text) = {
        let derived = ctx.derived()?;
        (derived.question.clone(), derived.topic.clone())
    };

    let tuning = &ctx.config.tuning;
    let resolver = MergeResolver::new(ctx.index, ctx.services, tuning.similar_items_count);

    let question = resolver
        .resolve(
            ItemKind::Question,
            &question_text,
            embeddings.question,
            tuning.question_similarity_threshold,
        )
        .await?;
    let topic = resolver
        .resolve(
            ItemKind::Topic,
            &topic_text,
            embeddings.topic,
            tuning.topic_similarity_threshold,
        )
        .await?;

    debug!(
        document = %ctx.document,
        chunk_id = %ctx.chunk_id,
        question = %question.identity(),
        question_reused = question.previous_identity().is_some(),
        topic = %topic.identity(),
        topic_reused = topic.previous_identity().is_some(),
        "chunk items resolved"
    );

    ctx.resolved = Some(ResolvedItems { question, topic });

    machine
        .resolve()
        .map_err(|(_, guard)| map_guard_error("resolve", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document = %ctx.document, chunk_id = %ctx.chunk_id)
)]
pub async fn persist(
    machine: ChunkMachine<(), Resolved>,
    ctx: &mut ChunkContext<'_>,
) -> Result<ChunkMachine<(), Persisted>, AppError> {
    let derived = ctx.derived()?.clone();
    let resolved = ctx.resolved()?.clone();
    let store = ctx.store;
    let output = ctx.config.output_folder.as_str();

    let final_question = resolved.question.identity().to_string();
    let final_topic = resolved.topic.identity().to_string();
    let anchor = ctx.chunk.anchor(ctx.document);

    let topics = vec![final_topic.clone()];
    let mut aliases = vec![derived.question.clone()];
    if final_question != derived.question {
        aliases.push(final_question.clone());
    }
    let contribution = RecordContribution {
        topics: &topics,
        questions: &aliases,
        document: ctx.document,
        anchor: &anchor,
    };
    let section = RecordSection {
        summary: &derived.summary,
        contribution: &contribution,
        block: location_block(&derived.question, ctx.document, &anchor),
    };

    let existing = match resolved.question.previous_identity() {
        Some(previous) => {
            let found = store
                .find_file_by_name(output, &record_file_name(previous))
                .await?;
            if found.is_none() {
                warn!(
                    document = %ctx.document,
                    chunk_id = %ctx.chunk_id,
                    previous_question = %previous,
                    "record of merged question not found; creating a new one"
                );
            }
            found
        }
        None => None,
    };

    let (record_location, new_record_topic) = match existing {
        Some(location) => {
            let renamed = sibling_location(&location, &record_file_name(&final_question));
            let target = if renamed != location && store.exists(&renamed).await? {
                warn!(
                    document = %ctx.document,
                    chunk_id = %ctx.chunk_id,
                    record = %location,
                    occupied = %renamed,
                    "merged question's file name is taken; record keeps its current name"
                );
                None
            } else {
                Some(renamed)
            };
            merge_into_record(store, &location, target.as_deref(), &section).await?;
            (target.unwrap_or(location), None)
        }
        None => {
            let folder = join_path(output, &final_topic);
            if !store.folder_exists(&folder).await? {
                store.create_folder(&folder).await?;
            }
            let location = join_path(&folder, &record_file_name(&final_question));
            if store.exists(&location).await? {
                merge_into_record(store, &location, None, &section).await?;
            } else {
                write_new_record(store, &location, &section).await?;
            }
            (location, Some(final_topic.clone()))
        }
    };

    debug!(
        document = %ctx.document,
        chunk_id = %ctx.chunk_id,
        record = %record_location,
        "answer record written"
    );

    ctx.outcome = Some(ChunkOutcome {
        final_question,
        topic: final_topic,
        record_location,
        new_record_topic,
    });

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document = %ctx.document, chunk_id = %ctx.chunk_id)
)]
pub async fn record(
    machine: ChunkMachine<(), Persisted>,
    ctx: &mut ChunkContext<'_>,
    ledger: &mut ProcessingLedger,
) -> Result<ChunkMachine<(), Recorded>, AppError> {
    ledger.mark_processed(ctx.store, &ctx.chunk_id).await?;

    machine
        .record()
        .map_err(|(_, guard)| map_guard_error("record", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid chunk consolidation transition during {event}: {guard:?}"
    ))
}

fn require_embedding(embedding: Vec<f32>, text: &str) -> Result<Vec<f32>, AppError> {
    if embedding.is_empty() {
        return Err(AppError::ExternalService(format!(
            "no embedding produced for '{text}'"
        )));
    }
    Ok(embedding)
}

struct RecordSection<'a> {
    summary: &'a str,
    contribution: &'a RecordContribution<'a>,
    block: String,
}

fn sibling_location(location: &str, file_name: &str) -> String {
    match location.rsplit_once('/') {
        Some((folder, _)) => join_path(folder, file_name),
        None => file_name.to_string(),
    }
}

async fn write_new_record(
    store: &dyn ContentStore,
    location: &str,
    section: &RecordSection<'_>,
) -> Result<(), AppError> {
    let frontmatter = create_frontmatter(
        AnswerFrontmatter::default(),
        section.contribution,
        Utc::now(),
    );
    let rendered = render_with_frontmatter(&frontmatter, section.summary.trim())?;
    store
        .write(location, &format!("{rendered}{}", section.block))
        .await
}

async fn merge_into_record(
    store: &dyn ContentStore,
    location: &str,
    new_location: Option<&str>,
    section: &RecordSection<'_>,
) -> Result<(), AppError> {
    let current = store.read(location).await?;
    let (frontmatter, body): (AnswerFrontmatter, &str) = parse_frontmatter(&current)?;

    let merged_body = format!("{}\n\n{}", body.trim(), section.summary);
    let frontmatter = create_frontmatter(frontmatter, section.contribution, Utc::now());
    let rendered = render_with_frontmatter(&frontmatter, &merged_body)?;

    atomic_update(
        store,
        location,
        &format!("{rendered}{}", section.block),
        new_location,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_location_replaces_file_name() {
        assert_eq!(
            sibling_location("out/science/botany/Old?.md", "New?.md"),
            "out/science/botany/New?.md"
        );
        assert_eq!(sibling_location("Old?.md", "New?.md"), "New?.md");
    }

    #[test]
    fn empty_embeddings_are_rejected() {
        assert!(matches!(
            require_embedding(Vec::new(), "question"),
            Err(AppError::ExternalService(_))
        ));
        assert_eq!(
            require_embedding(vec![0.5], "question").expect("embedding"),
            vec![0.5]
        );
    }
}
