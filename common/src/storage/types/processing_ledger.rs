use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::{
    error::AppError,
    storage::store::{join_path, ContentStore},
};

pub const LEDGER_FILE_NAME: &str = ".consolidation_state.json";

/// Durable per-chunk completion map for one output folder.
///
/// An entry is only ever `true`: it is written after every side effect of the chunk has
/// been applied, and removed again if handling the chunk fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingLedger {
    location: String,
    entries: BTreeMap<String, bool>,
}

impl ProcessingLedger {
    pub fn location_for(output_folder: &str) -> String {
        join_path(output_folder, LEDGER_FILE_NAME)
    }

    /// Loads the ledger of `output_folder`. A missing or unreadable ledger yields an empty one.
    pub async fn load(store: &dyn ContentStore, output_folder: &str) -> Self {
        let location = Self::location_for(output_folder);
        let entries = match read_entries(store, &location).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(ledger = %location, error = %err, "could not read processing ledger; starting empty");
                BTreeMap::new()
            }
        };
        debug!(ledger = %location, entries = entries.len(), "processing ledger loaded");

        Self { location, entries }
    }

    pub fn is_processed(&self, chunk_id: &str) -> bool {
        self.entries.get(chunk_id).copied().unwrap_or(false)
    }

    pub fn processed_count(&self) -> usize {
        self.entries.values().filter(|done| **done).count()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub async fn mark_processed(
        &mut self,
        store: &dyn ContentStore,
        chunk_id: &str,
    ) -> Result<(), AppError> {
        self.entries.insert(chunk_id.to_string(), true);
        self.persist(store).await
    }

    pub async fn forget(&mut self, store: &dyn ContentStore, chunk_id: &str) -> Result<(), AppError> {
        if self.entries.remove(chunk_id).is_some() {
            self.persist(store).await?;
        }
        Ok(())
    }

    /// Closes the ledger at the end of `document`.
    ///
    /// A fully successful document drops its own entries; entries of other documents
    /// that still await a retry stay. Otherwise only processed entries are persisted,
    /// so the next run skips the chunks that already committed. An empty ledger is
    /// deleted.
    pub async fn finish(
        mut self,
        store: &dyn ContentStore,
        document: &str,
        success: bool,
    ) -> Result<(), AppError> {
        if success {
            self.entries
                .retain(|chunk_id, _| !belongs_to(chunk_id, document));
        }
        self.entries.retain(|_, done| *done);

        if self.entries.is_empty() {
            return store.delete(&self.location).await;
        }
        self.persist(store).await
    }

    /// Deletes the ledger of `output_folder` if one exists.
    pub async fn discard(store: &dyn ContentStore, output_folder: &str) -> Result<(), AppError> {
        store.delete(&Self::location_for(output_folder)).await
    }

    async fn persist(&self, store: &dyn ContentStore) -> Result<(), AppError> {
        let serialized = serde_json::to_string(&self.entries)?;
        store.write(&self.location, &serialized).await
    }
}

/// Whether `chunk_id` has the `<document>-<start>-<end>` shape for `document`.
fn belongs_to(chunk_id: &str, document: &str) -> bool {
    let Some(span) = chunk_id
        .strip_prefix(document)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };
    span.split_once('-').is_some_and(|(start, end)| {
        start.parse::<usize>().is_ok() && end.parse::<usize>().is_ok()
    })
}

async fn read_entries(
    store: &dyn ContentStore,
    location: &str,
) -> Result<BTreeMap<String, bool>, AppError> {
    if !store.exists(location).await? {
        return Ok(BTreeMap::new());
    }
    let raw = store.read(location).await?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::testing::memory_storage;

    #[tokio::test]
    async fn missing_ledger_loads_empty() {
        let store = memory_storage();
        let ledger = ProcessingLedger::load(&store, "out").await;
        assert_eq!(ledger.processed_count(), 0);
        assert_eq!(ledger.location(), "out/.consolidation_state.json");
        assert!(!store.exists(ledger.location()).await.expect("exists"));
    }

    #[tokio::test]
    async fn corrupt_ledger_loads_empty() {
        let store = memory_storage();
        store
            .write("out/.consolidation_state.json", "{not json")
            .await
            .expect("write");
        let ledger = ProcessingLedger::load(&store, "out").await;
        assert_eq!(ledger.processed_count(), 0);
    }

    #[tokio::test]
    async fn marks_persist_and_reload() {
        let store = memory_storage();
        let mut ledger = ProcessingLedger::load(&store, "out").await;
        ledger
            .mark_processed(&store, "garden-0-10")
            .await
            .expect("mark");
        ledger
            .mark_processed(&store, "garden-11-20")
            .await
            .expect("mark");
        ledger.forget(&store, "garden-11-20").await.expect("forget");

        let reloaded = ProcessingLedger::load(&store, "out").await;
        assert!(reloaded.is_processed("garden-0-10"));
        assert!(!reloaded.is_processed("garden-11-20"));
    }

    #[tokio::test]
    async fn finishing_successfully_deletes_the_ledger() {
        let store = memory_storage();
        let mut ledger = ProcessingLedger::load(&store, "out").await;
        ledger.mark_processed(&store, "doc-0-5").await.expect("mark");

        ledger.finish(&store, "doc", true).await.expect("finish");

        assert!(!store
            .exists("out/.consolidation_state.json")
            .await
            .expect("exists"));
    }

    #[tokio::test]
    async fn finishing_with_failure_keeps_processed_entries() {
        let store = memory_storage();
        store
            .write(
                "out/.consolidation_state.json",
                r#"{"doc-0-5":true,"doc-6-9":false}"#,
            )
            .await
            .expect("seed");
        let ledger = ProcessingLedger::load(&store, "out").await;

        ledger.finish(&store, "doc", false).await.expect("finish");

        let raw = store
            .read("out/.consolidation_state.json")
            .await
            .expect("read");
        assert_eq!(raw, r#"{"doc-0-5":true}"#);
    }

    #[tokio::test]
    async fn successful_document_keeps_entries_of_other_documents() {
        let store = memory_storage();
        let mut ledger = ProcessingLedger::load(&store, "out").await;
        ledger
            .mark_processed(&store, "mixed-0-22")
            .await
            .expect("mark");
        ledger.mark_processed(&store, "ok-0-30").await.expect("mark");
        ledger
            .mark_processed(&store, "ok-extra-0-9")
            .await
            .expect("mark");

        ledger.finish(&store, "ok", true).await.expect("finish");

        let reloaded = ProcessingLedger::load(&store, "out").await;
        assert!(reloaded.is_processed("mixed-0-22"));
        assert!(reloaded.is_processed("ok-extra-0-9"));
        assert!(!reloaded.is_processed("ok-0-30"));
        assert_eq!(reloaded.processed_count(), 2);
    }

    #[test]
    fn chunk_ids_belong_only_to_their_document() {
        assert!(belongs_to("notes-0-12", "notes"));
        assert!(belongs_to("a-b-3-9", "a-b"));
        assert!(!belongs_to("a-b-3-9", "a"));
        assert!(!belongs_to("notes2-0-12", "notes"));
        assert!(!belongs_to("notes-0", "notes"));
    }
}
