//! Merge-or-create decisions for derived items.
//!
//! Questions that match an existing question are re-phrased to cover both and replace
//! the stored entry. Topics and categories keep the existing identity and only gain
//! usage.

use common::{
    error::AppError,
    storage::{
        types::derived_item::{DerivedItem, IndexMatch, ItemKind, ItemMetadata, ItemRecord},
        vector_index::VectorIndex,
    },
};
use tracing::{debug, info};

use crate::{formatting::validate_question, pipeline::ConsolidationServices};

/// Scores less than this far below the threshold still count as a match.
pub const SIMILARITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// An existing item absorbed the candidate. `item` is its state after the update; its
    /// embedding is only populated when the stored vector was replaced.
    Reuse {
        previous_identity: String,
        item: DerivedItem,
    },
    /// The candidate was inserted as a new item.
    Create { item: DerivedItem },
}

impl Resolution {
    /// Identity to use from here on.
    pub fn identity(&self) -> &str {
        match self {
            Resolution::Reuse { item, .. } | Resolution::Create { item } => item.identity(),
        }
    }

    pub fn previous_identity(&self) -> Option<&str> {
        match self {
            Resolution::Reuse {
                previous_identity, ..
            } => Some(previous_identity),
            Resolution::Create { .. } => None,
        }
    }

    pub fn item(&self) -> &DerivedItem {
        match self {
            Resolution::Reuse { item, .. } | Resolution::Create { item } => item,
        }
    }
}

/// Neighbors scoring strictly above `threshold - SIMILARITY_EPSILON`.
pub fn accepted_matches(
    matches: &[IndexMatch],
    threshold: f64,
) -> impl Iterator<Item = &IndexMatch> + '_ {
    matches
        .iter()
        .filter(move |candidate| candidate.score > threshold - SIMILARITY_EPSILON)
}

/// Most used accepted neighbor; the first one in query order wins ties.
pub fn select_winner(matches: &[IndexMatch], threshold: f64) -> Option<&IndexMatch> {
    accepted_matches(matches, threshold).fold(None, |best: Option<&IndexMatch>, candidate| {
        match best {
            Some(current) if current.metadata.usage_count >= candidate.metadata.usage_count => {
                Some(current)
            }
            _ => Some(candidate),
        }
    })
}

pub struct MergeResolver<'a> {
    index: &'a dyn VectorIndex,
    services: &'a dyn ConsolidationServices,
    top_k: usize,
}

impl<'a> MergeResolver<'a> {
    pub fn new(
        index: &'a dyn VectorIndex,
        services: &'a dyn ConsolidationServices,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            services,
            top_k,
        }
    }

    /// Decides whether `candidate` duplicates an existing item of `kind` and applies the
    /// decision to the index.
    #[tracing::instrument(level = "trace", skip_all, fields(kind = %kind, candidate = %candidate))]
    pub async fn resolve(
        &self,
        kind: ItemKind,
        candidate: &str,
        embedding: Vec<f32>,
        threshold: f64,
    ) -> Result<Resolution, AppError> {
        let neighbors = self.index.query(kind, &embedding, self.top_k).await?;

        let Some(winner) = select_winner(&neighbors, threshold) else {
            return self.create(kind, candidate, embedding).await;
        };

        debug!(
            kind = %kind,
            candidate,
            existing = %winner.id,
            score = winner.score,
            usage_count = winner.metadata.usage_count,
            "near-duplicate found"
        );

        match kind {
            ItemKind::Question => self.merge_question(candidate, winner).await,
            ItemKind::Topic | ItemKind::Category => self.reuse_label(kind, winner).await,
        }
    }

    async fn create(
        &self,
        kind: ItemKind,
        candidate: &str,
        embedding: Vec<f32>,
    ) -> Result<Resolution, AppError> {
        let record = ItemRecord::fresh(candidate, embedding);
        self.index
            .upsert(kind, &record.identity, &record.embedding, &record.metadata())
            .await?;

        info!(kind = %kind, identity = %record.identity, "new item created");
        Ok(Resolution::Create {
            item: DerivedItem::new(kind, record),
        })
    }

    async fn merge_question(
        &self,
        candidate: &str,
        winner: &IndexMatch,
    ) -> Result<Resolution, AppError> {
        let merged_raw = self.services.merge_questions(&winner.id, candidate).await?;
        let merged_identity = validate_question(&merged_raw)?;

        let merged_embedding = self.services.embed(&merged_identity).await?;
        if merged_embedding.is_empty() {
            return Err(AppError::ExternalService(format!(
                "no embedding produced for merged question '{merged_identity}'"
            )));
        }

        let mut merged_from = winner.metadata.merged_from.clone();
        merged_from.push(winner.id.clone());
        let metadata = ItemMetadata {
            usage_count: winner.metadata.usage_count.saturating_add(1),
            merged_from,
            original_identity: Some(
                winner
                    .metadata
                    .original_identity
                    .clone()
                    .unwrap_or_else(|| winner.id.clone()),
            ),
        };

        self.index
            .delete_and_upsert(
                ItemKind::Question,
                &winner.id,
                &merged_identity,
                &merged_embedding,
                &metadata,
            )
            .await?;

        info!(
            previous = %winner.id,
            merged = %merged_identity,
            usage_count = metadata.usage_count,
            "question merged into existing cluster"
        );

        Ok(Resolution::Reuse {
            previous_identity: winner.id.clone(),
            item: DerivedItem::Question(ItemRecord::from_metadata(
                merged_identity,
                merged_embedding,
                metadata,
            )),
        })
    }

    async fn reuse_label(&self, kind: ItemKind, winner: &IndexMatch) -> Result<Resolution, AppError> {
        let current = self
            .index
            .fetch_metadata(kind, &winner.id)
            .await?
            .unwrap_or_else(|| winner.metadata.clone());

        let updated = ItemMetadata {
            usage_count: current.usage_count.saturating_add(1),
            ..current
        };
        self.index.update_metadata(kind, &winner.id, &updated).await?;

        debug!(kind = %kind, identity = %winner.id, usage_count = updated.usage_count, "existing item reused");

        Ok(Resolution::Reuse {
            previous_identity: winner.id.clone(),
            item: DerivedItem::new(
                kind,
                ItemRecord::from_metadata(winner.id.clone(), Vec::new(), updated),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;

    fn neighbor(id: &str, score: f64, usage_count: u64) -> IndexMatch {
        IndexMatch {
            id: id.to_string(),
            score,
            metadata: ItemMetadata {
                usage_count,
                ..Default::default()
            },
        }
    }

    #[test]
    fn threshold_is_inclusive_within_tolerance() {
        let at_threshold = [neighbor("a", 0.9, 1)];
        assert!(select_winner(&at_threshold, 0.9).is_some());

        let within_tolerance = [neighbor("a", 0.9 - 1e-10, 1)];
        assert!(select_winner(&within_tolerance, 0.9).is_some());

        let below = [neighbor("a", 0.9 - 1e-8, 1)];
        assert!(select_winner(&below, 0.9).is_none());
    }

    #[test]
    fn score_exactly_at_tolerance_edge_is_rejected() {
        let threshold = 0.9;
        let edge = [neighbor("a", threshold - SIMILARITY_EPSILON, 1)];
        assert!(select_winner(&edge, threshold).is_none());
        assert_eq!(accepted_matches(&edge, threshold).count(), 0);
    }

    #[test]
    fn highest_usage_wins_and_ties_keep_query_order() {
        let neighbors = [
            neighbor("first", 0.99, 2),
            neighbor("popular", 0.95, 7),
            neighbor("tied", 0.93, 7),
            neighbor("too-far", 0.5, 100),
        ];
        let winner = select_winner(&neighbors, 0.9).expect("winner");
        assert_eq!(winner.id, "popular");
    }

    /// In-memory index that scores by exact embedding equality.
    #[derive(Default)]
    struct ExactIndex {
        entries: Mutex<HashMap<(ItemKind, String), (Vec<f32>, ItemMetadata)>>,
    }

    #[async_trait]
    impl VectorIndex for ExactIndex {
        async fn upsert(
            &self,
            kind: ItemKind,
            id: &str,
            embedding: &[f32],
            metadata: &ItemMetadata,
        ) -> Result<(), AppError> {
            self.entries
                .lock()
                .await
                .insert((kind, id.to_string()), (embedding.to_vec(), metadata.clone()));
            Ok(())
        }

        async fn delete_and_upsert(
            &self,
            kind: ItemKind,
            old_id: &str,
            new_id: &str,
            embedding: &[f32],
            metadata: &ItemMetadata,
        ) -> Result<(), AppError> {
            let mut entries = self.entries.lock().await;
            entries.remove(&(kind, old_id.to_string()));
            entries.insert((kind, new_id.to_string()), (embedding.to_vec(), metadata.clone()));
            Ok(())
        }

        async fn fetch_metadata(
            &self,
            kind: ItemKind,
            id: &str,
        ) -> Result<Option<ItemMetadata>, AppError> {
            Ok(self
                .entries
                .lock()
                .await
                .get(&(kind, id.to_string()))
                .map(|(_, metadata)| metadata.clone()))
        }

        async fn update_metadata(
            &self,
            kind: ItemKind,
            id: &str,
            metadata: &ItemMetadata,
        ) -> Result<(), AppError> {
            match self.entries.lock().await.get_mut(&(kind, id.to_string())) {
                Some(entry) => {
                    entry.1 = metadata.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(id.to_string())),
            }
        }

        async fn query(
            &self,
            kind: ItemKind,
            embedding: &[f32],
            top_k: usize,
        ) -> Result<Vec<IndexMatch>, AppError> {
            let entries = self.entries.lock().await;
            let mut matches: Vec<IndexMatch> = entries
                .iter()
                .filter(|((entry_kind, _), _)| *entry_kind == kind)
                .map(|((_, id), (stored, metadata))| IndexMatch {
                    id: id.clone(),
                    score: if stored.as_slice() == embedding { 1.0 } else { 0.0 },
                    metadata: metadata.clone(),
                })
                .collect();
            matches.sort_by(|a, b| b.score.total_cmp(&a.score));
            matches.truncate(top_k);
            Ok(matches)
        }
    }

    /// Every question embeds to the same vector, so all questions are duplicates.
    struct SameQuestionServices;

    #[async_trait]
    impl ConsolidationServices for SameQuestionServices {
        async fn summarize(&self, text: &str) -> Result<String, AppError> {
            Ok(text.to_string())
        }

        async fn topic(&self, _document: &str, _context: &str) -> Result<String, AppError> {
            Ok("botany".into())
        }

        async fn question(&self, text: &str) -> Result<String, AppError> {
            Ok(text.to_string())
        }

        async fn merge_questions(
            &self,
            existing: &str,
            candidate: &str,
        ) -> Result<String, AppError> {
            let existing = existing.trim_end_matches('?');
            let addition = candidate
                .trim_end_matches('?')
                .split_whitespace()
                .last()
                .unwrap_or_default();
            Ok(format!("{existing} {addition}?"))
        }

        async fn unify_topics(&self, _topics: &[String]) -> Result<String, AppError> {
            Ok("science".into())
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn repeated_near_duplicates_collapse_into_one_question() {
        let index = ExactIndex::default();
        let services = SameQuestionServices;
        let resolver = MergeResolver::new(&index, &services, 3);

        let submissions = ["How do plants grow?", "How do plants thrive?", "How do plants live?"];
        let mut last = None;
        for submission in submissions {
            last = Some(
                resolver
                    .resolve(ItemKind::Question, submission, vec![1.0, 0.0], 0.9)
                    .await
                    .expect("resolve"),
            );
        }

        let entries = index.entries.lock().await;
        assert_eq!(entries.len(), 1, "exactly one question should survive");
        let ((_, identity), (_, metadata)) = entries.iter().next().expect("entry");
        assert_eq!(metadata.usage_count, 3);
        assert_eq!(metadata.original_identity.as_deref(), Some("How do plants grow?"));
        assert_eq!(metadata.merged_from.len(), 2);
        assert_eq!(metadata.merged_from[0], "How do plants grow?");

        let last = last.expect("resolution");
        assert_eq!(last.identity(), identity.as_str());
        assert!(last.previous_identity().is_some());
    }

    #[tokio::test]
    async fn topics_keep_existing_identity() {
        let index = ExactIndex::default();
        let services = SameQuestionServices;
        let resolver = MergeResolver::new(&index, &services, 3);

        let first = resolver
            .resolve(ItemKind::Topic, "botany", vec![0.0, 1.0], 0.8)
            .await
            .expect("create");
        assert!(matches!(first, Resolution::Create { .. }));

        let second = resolver
            .resolve(ItemKind::Topic, "plant-science", vec![0.0, 1.0], 0.8)
            .await
            .expect("reuse");
        assert_eq!(second.identity(), "botany");
        assert_eq!(second.previous_identity(), Some("botany"));

        let metadata = index
            .fetch_metadata(ItemKind::Topic, "botany")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(metadata.usage_count, 2);
        assert!(index
            .fetch_metadata(ItemKind::Topic, "plant-science")
            .await
            .expect("fetch")
            .is_none());
    }

    #[tokio::test]
    async fn dissimilar_candidate_is_created() {
        let index = ExactIndex::default();
        let services = SameQuestionServices;
        let resolver = MergeResolver::new(&index, &services, 3);

        resolver
            .resolve(ItemKind::Category, "science", vec![1.0, 0.0], 0.6)
            .await
            .expect("create");
        let other = resolver
            .resolve(ItemKind::Category, "history", vec![0.0, 1.0], 0.6)
            .await
            .expect("create");

        assert!(matches!(other, Resolution::Create { .. }));
        assert_eq!(index.entries.lock().await.len(), 2);
    }
}
