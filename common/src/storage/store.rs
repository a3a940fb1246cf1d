use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};
use tracing::{debug, warn};

use crate::{
    error::AppError,
    utils::config::{AppConfig, StorageKind},
};

pub type DynStore = Arc<dyn ObjectStore>;

/// Hierarchical file access used by the consolidation engine.
///
/// Locations are `/`-separated logical paths. Folders are location prefixes: a folder
/// exists once something lives under it.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn read(&self, location: &str) -> Result<String, AppError>;

    async fn write(&self, location: &str, content: &str) -> Result<(), AppError>;

    async fn exists(&self, location: &str) -> Result<bool, AppError>;

    /// Moves `from` to `to`, replacing anything already at `to`.
    async fn rename(&self, from: &str, to: &str) -> Result<(), AppError>;

    /// Deletes `location`; deleting a missing location is not an error.
    async fn delete(&self, location: &str) -> Result<(), AppError>;

    /// Every file below `folder`, recursively, as full locations.
    async fn list_files(&self, folder: &str) -> Result<Vec<String>, AppError>;

    async fn create_folder(&self, _folder: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn folder_exists(&self, folder: &str) -> Result<bool, AppError> {
        Ok(!self.list_files(folder).await?.is_empty())
    }

    /// Moves every file below `from` to the same relative location below `to`.
    ///
    /// Files whose destination already exists are left in place.
    async fn move_folder(&self, from: &str, to: &str) -> Result<(), AppError> {
        move_files(self, from, to).await
    }

    /// Searches below `root` for a file whose final path segment equals `file_name`.
    async fn find_file_by_name(
        &self,
        root: &str,
        file_name: &str,
    ) -> Result<Option<String>, AppError> {
        Ok(self
            .list_files(root)
            .await?
            .into_iter()
            .find(|location| file_name_of(location) == file_name))
    }
}

/// Renames every file below `from` to the same relative location below `to`, leaving
/// files whose destination already exists in place.
async fn move_files<S: ContentStore + ?Sized>(
    store: &S,
    from: &str,
    to: &str,
) -> Result<(), AppError> {
    let source_prefix = format!("{}/", from.trim_end_matches('/'));
    for location in store.list_files(from).await? {
        let Some(relative) = location.strip_prefix(&source_prefix) else {
            continue;
        };
        let destination = join_path(to, relative);
        if store.exists(&destination).await? {
            warn!(
                source = %location,
                destination = %destination,
                "destination already exists; leaving file in place"
            );
            continue;
        }
        store.rename(&location, &destination).await?;
    }
    Ok(())
}

/// Joins a folder and a relative location with a single separator.
pub fn join_path(folder: &str, relative: &str) -> String {
    let folder = folder.trim_matches('/');
    let relative = relative.trim_start_matches('/');
    if folder.is_empty() {
        relative.to_string()
    } else {
        format!("{folder}/{relative}")
    }
}

/// Final segment of a location.
pub fn file_name_of(location: &str) -> &str {
    location.rsplit('/').next().unwrap_or(location)
}

/// Storage manager with persistent state and proper lifecycle management.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    /// Create a new StorageManager with the specified configuration.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Create a StorageManager with a custom storage backend.
    ///
    /// This method is useful for testing scenarios where you want to inject
    /// a specific storage backend.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    /// Get the storage backend kind.
    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    /// Access the resolved local base directory when using the local backend.
    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    /// Resolve an object location to a filesystem path when using the local backend.
    ///
    /// Returns `None` when the backend is not local or when the provided location includes
    /// unsupported components (absolute paths or parent traversals).
    pub fn resolve_local_path(&self, location: &str) -> Option<PathBuf> {
        let base = self.local_base_path()?;
        let relative = Path::new(location);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return None;
        }

        Some(base.join(relative))
    }

    /// Cleanup filesystem directories for local backend.
    ///
    /// This is a best-effort cleanup and ignores errors.
    async fn cleanup_filesystem_directories(&self, prefix: &str) {
        if !matches!(self.backend_kind, StorageKind::Local) {
            return;
        }

        let Some(base) = &self.local_base else {
            return;
        };

        let Some(mut current) = self.resolve_local_path(prefix) else {
            warn!(
                prefix = %prefix,
                "Skipping directory cleanup for unsupported prefix components"
            );
            return;
        };

        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(()) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => {
                        debug!(
                            error = %err,
                            path = %current.display(),
                            "Failed to remove directory during cleanup"
                        );
                        break;
                    }
                },
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl ContentStore for StorageManager {
    async fn read(&self, location: &str) -> Result<String, AppError> {
        let path = ObjPath::from(location);
        let bytes = self.store.get(&path).await?.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|err| AppError::StoreMutation {
            path: location.to_string(),
            message: format!("content is not valid UTF-8: {err}"),
        })
    }

    async fn write(&self, location: &str, content: &str) -> Result<(), AppError> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(Bytes::from(content.to_owned()));
        self.store.put(&path, payload).await?;
        Ok(())
    }

    async fn exists(&self, location: &str) -> Result<bool, AppError> {
        let path = ObjPath::from(location);
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), AppError> {
        self.store
            .rename(&ObjPath::from(from), &ObjPath::from(to))
            .await?;
        Ok(())
    }

    async fn delete(&self, location: &str) -> Result<(), AppError> {
        match self.store.delete(&ObjPath::from(location)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_files(&self, folder: &str) -> Result<Vec<String>, AppError> {
        let prefix = ObjPath::from(folder);
        let metas: Vec<object_store::ObjectMeta> =
            self.store.list(Some(&prefix)).try_collect().await?;
        let mut locations: Vec<String> = metas
            .iter()
            .map(|meta| decode_location(&meta.location))
            .collect();
        locations.sort();
        Ok(locations)
    }

    async fn create_folder(&self, folder: &str) -> Result<(), AppError> {
        if let Some(dir) = self.resolve_local_path(folder) {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    async fn folder_exists(&self, folder: &str) -> Result<bool, AppError> {
        if let Some(dir) = self.resolve_local_path(folder) {
            if tokio::fs::metadata(&dir)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false)
            {
                return Ok(true);
            }
        }
        Ok(!self.list_files(folder).await?.is_empty())
    }

    async fn move_folder(&self, from: &str, to: &str) -> Result<(), AppError> {
        move_files(self, from, to).await?;
        self.cleanup_filesystem_directories(from).await;
        Ok(())
    }
}

/// Create a storage backend based on configuration.
///
/// This factory function handles the creation and initialization of different
/// storage backends with proper error handling and validation.
async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

/// Resolve the absolute base directory used for local storage from config.
///
/// If `data_dir` is relative, it is resolved against the current working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}

/// object_store percent-encodes characters such as `?` inside path segments; listing
/// hands back the encoded form, which must be decoded before it is reused as a location.
fn decode_location(path: &ObjPath) -> String {
    path.parts()
        .map(|part| percent_decode(part.as_ref()))
        .collect::<Vec<_>>()
        .join("/")
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while let Some(&byte) = bytes.get(idx) {
        if byte == b'%' {
            let high = bytes.get(idx.saturating_add(1)).and_then(|b| hex_value(*b));
            let low = bytes.get(idx.saturating_add(2)).and_then(|b| hex_value(*b));
            if let (Some(high), Some(low)) = (high, low) {
                decoded.push((high << 4) | low);
                idx = idx.saturating_add(3);
                continue;
            }
        }
        decoded.push(byte);
        idx = idx.saturating_add(1);
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Testing utilities for storage operations.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;

    /// Create a test configuration with memory storage.
    pub fn test_config_memory() -> AppConfig {
        AppConfig {
            openai_api_key: "test".into(),
            data_dir: "/tmp/unused".into(), // Ignored for memory storage
            storage: StorageKind::Memory,
            ..Default::default()
        }
    }

    /// A fresh, isolated in-memory storage manager.
    pub fn memory_storage() -> StorageManager {
        StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config_local(root: &Path) -> AppConfig {
        AppConfig {
            openai_api_key: "test".into(),
            data_dir: root.to_string_lossy().into_owned(),
            storage: StorageKind::Local,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_storage_manager_memory_basic_operations() {
        let cfg = testing::test_config_memory();
        let storage = StorageManager::new(&cfg)
            .await
            .expect("create storage manager");
        assert!(storage.local_base_path().is_none());

        let location = "notes/topic/file.md";
        storage.write(location, "hello").await.expect("write");
        assert_eq!(storage.read(location).await.expect("read"), "hello");
        assert!(storage.exists(location).await.expect("exists"));

        storage.delete(location).await.expect("delete");
        assert!(!storage.exists(location).await.expect("exists after delete"));
        storage
            .delete(location)
            .await
            .expect("deleting a missing file is not an error");
    }

    #[tokio::test]
    async fn test_listing_decodes_escaped_segments() {
        let storage = testing::memory_storage();
        let location = "out/plants/How do plants grow?.md";
        storage.write(location, "body").await.expect("write");

        let listed = storage.list_files("out").await.expect("list");
        assert_eq!(listed, vec![location.to_string()]);
        assert_eq!(storage.read(&listed[0]).await.expect("read"), "body");
    }

    #[tokio::test]
    async fn test_rename_replaces_content_at_destination() {
        let storage = testing::memory_storage();
        storage.write("a/one.md", "first").await.expect("write");
        storage.write("a/two.md", "second").await.expect("write");

        storage.rename("a/one.md", "a/two.md").await.expect("rename");

        assert!(!storage.exists("a/one.md").await.expect("exists"));
        assert_eq!(storage.read("a/two.md").await.expect("read"), "first");
    }

    #[tokio::test]
    async fn test_move_folder_keeps_relative_layout_and_skips_conflicts() {
        let storage = testing::memory_storage();
        storage.write("out/botany/q1.md", "one").await.expect("write");
        storage
            .write("out/botany/nested/q2.md", "two")
            .await
            .expect("write");
        storage
            .write("out/science/botany/q1.md", "existing")
            .await
            .expect("write");

        storage
            .move_folder("out/botany", "out/science/botany")
            .await
            .expect("move");

        assert_eq!(
            storage
                .read("out/science/botany/q1.md")
                .await
                .expect("read"),
            "existing"
        );
        assert_eq!(
            storage
                .read("out/science/botany/nested/q2.md")
                .await
                .expect("read"),
            "two"
        );
        assert!(storage.exists("out/botany/q1.md").await.expect("exists"));
        assert!(!storage
            .exists("out/botany/nested/q2.md")
            .await
            .expect("exists"));
    }

    /// Store that only implements the required methods and relies on the trait's
    /// folder handling.
    struct MinimalStore(StorageManager);

    #[async_trait]
    impl ContentStore for MinimalStore {
        async fn read(&self, location: &str) -> Result<String, AppError> {
            self.0.read(location).await
        }

        async fn write(&self, location: &str, content: &str) -> Result<(), AppError> {
            self.0.write(location, content).await
        }

        async fn exists(&self, location: &str) -> Result<bool, AppError> {
            self.0.exists(location).await
        }

        async fn rename(&self, from: &str, to: &str) -> Result<(), AppError> {
            self.0.rename(from, to).await
        }

        async fn delete(&self, location: &str) -> Result<(), AppError> {
            self.0.delete(location).await
        }

        async fn list_files(&self, folder: &str) -> Result<Vec<String>, AppError> {
            self.0.list_files(folder).await
        }
    }

    #[tokio::test]
    async fn test_default_move_folder_skips_conflicts_like_storage_manager() {
        let storage = MinimalStore(testing::memory_storage());
        storage.write("out/botany/q1.md", "one").await.expect("write");
        storage.write("out/botany/q2.md", "two").await.expect("write");
        storage
            .write("out/science/botany/q1.md", "existing")
            .await
            .expect("write");

        storage
            .move_folder("out/botany", "out/science/botany")
            .await
            .expect("move");

        assert_eq!(
            storage.list_files("out").await.expect("list"),
            vec![
                "out/botany/q1.md".to_string(),
                "out/science/botany/q1.md".to_string(),
                "out/science/botany/q2.md".to_string(),
            ]
        );
        assert_eq!(
            storage
                .read("out/science/botany/q1.md")
                .await
                .expect("read"),
            "existing"
        );
    }

    #[tokio::test]
    async fn test_find_file_by_name_searches_recursively() {
        let storage = testing::memory_storage();
        storage
            .write("out/science/botany/How do plants grow?.md", "x")
            .await
            .expect("write");

        let found = storage
            .find_file_by_name("out", "How do plants grow?.md")
            .await
            .expect("find");
        assert_eq!(
            found.as_deref(),
            Some("out/science/botany/How do plants grow?.md")
        );
        assert!(storage
            .find_file_by_name("out", "missing.md")
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn test_local_backend_folders_and_cleanup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageManager::new(&test_config_local(dir.path()))
            .await
            .expect("create storage manager");

        storage.create_folder("out/botany").await.expect("create");
        assert!(storage.folder_exists("out/botany").await.expect("exists"));

        storage
            .write("out/botany/q.md", "content")
            .await
            .expect("write");
        storage
            .move_folder("out/botany", "out/science/botany")
            .await
            .expect("move");

        assert_eq!(
            storage
                .read("out/science/botany/q.md")
                .await
                .expect("read"),
            "content"
        );
        assert!(
            tokio::fs::metadata(dir.path().join("out/botany")).await.is_err(),
            "emptied source directory should be removed"
        );
        assert!(storage.folder_exists("out/science").await.expect("exists"));
    }

    #[test]
    fn test_join_path_and_file_name() {
        assert_eq!(join_path("out/", "/topic/q.md"), "out/topic/q.md");
        assert_eq!(join_path("", "q.md"), "q.md");
        assert_eq!(file_name_of("out/topic/q.md"), "q.md");
        assert_eq!(file_name_of("q.md"), "q.md");
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("grow%3F.md"), "grow?.md");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("a%2"), "a%2");
    }
}
