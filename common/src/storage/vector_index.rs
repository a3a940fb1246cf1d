use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::derived_item::{IndexMatch, ItemKind, ItemMetadata},
    },
};

/// Nearest-neighbor index over derived items, partitioned by [`ItemKind`].
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        kind: ItemKind,
        id: &str,
        embedding: &[f32],
        metadata: &ItemMetadata,
    ) -> Result<(), AppError>;

    /// Replaces `old_id` by `new_id` in one step; no reader observes both or neither.
    async fn delete_and_upsert(
        &self,
        kind: ItemKind,
        old_id: &str,
        new_id: &str,
        embedding: &[f32],
        metadata: &ItemMetadata,
    ) -> Result<(), AppError>;

    async fn fetch_metadata(&self, kind: ItemKind, id: &str)
        -> Result<Option<ItemMetadata>, AppError>;

    async fn update_metadata(
        &self,
        kind: ItemKind,
        id: &str,
        metadata: &ItemMetadata,
    ) -> Result<(), AppError>;

    /// Up to `top_k` neighbors of `embedding`, best score first.
    async fn query(
        &self,
        kind: ItemKind,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<IndexMatch>, AppError>;
}

#[derive(Debug, Serialize)]
struct StoredItem {
    identity: String,
    embedding: Vec<f32>,
    metadata: ItemMetadata,
}

/// [`VectorIndex`] backed by one SurrealDB table per item kind.
#[derive(Clone)]
pub struct SurrealVectorIndex {
    db: Arc<SurrealDbClient>,
}

impl SurrealVectorIndex {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VectorIndex for SurrealVectorIndex {
    async fn upsert(
        &self,
        kind: ItemKind,
        id: &str,
        embedding: &[f32],
        metadata: &ItemMetadata,
    ) -> Result<(), AppError> {
        let record = StoredItem {
            identity: id.to_string(),
            embedding: embedding.to_vec(),
            metadata: metadata.clone(),
        };

        self.db
            .client
            .query("UPSERT type::thing($table, $id) CONTENT $record RETURN NONE;")
            .bind(("table", kind.table_name()))
            .bind(("id", id.to_string()))
            .bind(("record", record))
            .await?
            .check()?;

        debug!(kind = %kind, id, "index entry upserted");
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
        let record = StoredItem {
            identity: new_id.to_string(),
            embedding: embedding.to_vec(),
            metadata: metadata.clone(),
        };

        self.db
            .client
            .query(
                "BEGIN TRANSACTION;
                 DELETE type::thing($table, $old_id);
                 UPSERT type::thing($table, $new_id) CONTENT $record RETURN NONE;
                 COMMIT TRANSACTION;",
            )
            .bind(("table", kind.table_name()))
            .bind(("old_id", old_id.to_string()))
            .bind(("new_id", new_id.to_string()))
            .bind(("record", record))
            .await?
            .check()?;

        debug!(kind = %kind, old_id, new_id, "index entry replaced");
        Ok(())
    }

    async fn fetch_metadata(
        &self,
        kind: ItemKind,
        id: &str,
    ) -> Result<Option<ItemMetadata>, AppError> {
        let mut response = self
            .db
            .client
            .query("SELECT VALUE metadata FROM type::thing($table, $id);")
            .bind(("table", kind.table_name()))
            .bind(("id", id.to_string()))
            .await?;

        let rows: Vec<ItemMetadata> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn update_metadata(
        &self,
        kind: ItemKind,
        id: &str,
        metadata: &ItemMetadata,
    ) -> Result<(), AppError> {
        let mut response = self
            .db
            .client
            .query("UPDATE type::thing($table, $id) MERGE { metadata: $metadata } RETURN VALUE identity;")
            .bind(("table", kind.table_name()))
            .bind(("id", id.to_string()))
            .bind(("metadata", metadata.clone()))
            .await?;

        let updated: Vec<String> = response.take(0)?;
        if updated.is_empty() {
            return Err(AppError::NotFound(format!(
                "{kind} '{id}' is not in the index"
            )));
        }
        Ok(())
    }

    async fn query(
        &self,
        kind: ItemKind,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<IndexMatch>, AppError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut response = self
            .db
            .client
            .query(
                "SELECT identity, metadata, vector::similarity::cosine(embedding, $vector) AS score
                 FROM type::table($table)
                 ORDER BY score DESC
                 LIMIT $limit;",
            )
            .bind(("table", kind.table_name()))
            .bind(("vector", embedding.to_vec()))
            .bind(("limit", top_k))
            .await?;

        let matches: Vec<IndexMatch> = response.take(0)?;
        debug!(kind = %kind, returned = matches.len(), "similarity query finished");
        Ok(matches)
    }
}
