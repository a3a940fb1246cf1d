use common::{
    error::AppError,
    storage::{
        store::{join_path, ContentStore},
        types::{
            answer_record::{add_category, AnswerFrontmatter},
            derived_item::ItemKind,
        },
        vector_index::VectorIndex,
    },
    utils::frontmatter::{parse_frontmatter, render_with_frontmatter},
};
use tracing::{debug, info, instrument, warn};

use super::{config::ConsolidationConfig, services::ConsolidationServices};
use crate::{formatting::validate_topic, resolver::MergeResolver};

pub struct CategoryPromotion<'a> {
    pub config: &'a ConsolidationConfig,
    pub services: &'a dyn ConsolidationServices,
    pub index: &'a dyn VectorIndex,
    pub store: &'a dyn ContentStore,
}

impl CategoryPromotion<'_> {
    /// Groups the document's topic folders under one unifying category.
    ///
    /// Returns the resolved category. Folders are moved, never regenerated; each moved
    /// record gains the category in its frontmatter.
    #[instrument(level = "trace", skip_all, fields(topics = topics.len()))]
    pub async fn promote(
        &self,
        topics: &[String],
        topic_folders: &[String],
    ) -> Result<String, AppError> {
        let raw_category = self.services.unify_topics(topics).await?;
        let candidate = validate_topic(&raw_category)?;

        let embedding = self.services.embed(&candidate).await?;
        if embedding.is_empty() {
            return Err(AppError::ExternalService(format!(
                "no embedding produced for category '{candidate}'"
            )));
        }

        let resolver = MergeResolver::new(
            self.index,
            self.services,
            self.config.tuning.similar_items_count,
        );
        let resolution = resolver
            .resolve(
                ItemKind::Category,
                &candidate,
                embedding,
                self.config.tuning.category_similarity_threshold,
            )
            .await?;
        let category = resolution.identity().to_string();

        let output = self.config.output_folder.as_str();
        let parent = join_path(output, &category);
        let mut moved = 0usize;

        for topic in topic_folders {
            if *topic == category {
                debug!(topic = %topic, "topic already names the category; not moved");
                continue;
            }

            let source = join_path(output, topic);
            if !self.store.folder_exists(&source).await? {
                debug!(folder = %source, "topic folder no longer exists; not moved");
                continue;
            }

            if !self.store.folder_exists(&parent).await? {
                self.store.create_folder(&parent).await?;
            }

            let destination = join_path(&parent, topic);
            self.store.move_folder(&source, &destination).await?;
            self.tag_folder(&destination, &category).await?;
            moved = moved.saturating_add(1);
        }

        info!(category = %category, moved_folders = moved, "topic folders promoted");
        Ok(category)
    }

    async fn tag_folder(&self, folder: &str, category: &str) -> Result<(), AppError> {
        for location in self.store.list_files(folder).await? {
            if !location.ends_with(".md") {
                continue;
            }

            let content = self.store.read(&location).await?;
            let (frontmatter, body): (AnswerFrontmatter, &str) = match parse_frontmatter(&content) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(record = %location, error = %err, "unreadable frontmatter; category not added");
                    continue;
                }
            };

            let updated = render_with_frontmatter(&add_category(frontmatter, category), body)?;
            self.store.write(&location, &updated).await?;
        }
        Ok(())
    }
}
