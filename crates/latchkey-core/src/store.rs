//! Key-value persistence capability
//!
//! The lockout tracker and biometric gate only ever need string get/set/remove
//! by key. Two adapters are provided:
//!
//! - [`FileStore`] - durable, one JSON object file written atomically
//! - [`MemoryStore`] - process-lifetime only, used when the durable store
//!   cannot be opened
//!
//! The adapter is chosen once by the composition root and held by the
//! consumers as an instance field.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Which kind of backing a store has
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    /// Survives process restart
    Durable,
    /// Lost when the process exits
    Memory,
}

/// String-keyed persistence capability
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Backing kind of this store
    fn kind(&self) -> StoreKind;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }
}

/// Durable store backed by a single JSON file
///
/// All entries are cached in memory after open. Every mutation rewrites the
/// whole file (temp file + rename) and only updates the cache once the write
/// has succeeded, so a failed write leaves both in the previous state.
pub struct FileStore {
    /// Path to the JSON file
    path: PathBuf,

    /// Cached entries (sorted so the file diff is stable)
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or create) the store at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::Storage(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened file store");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full entry set to disk
    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await?;

        // Set restrictive permissions before the file becomes visible (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Durable
    }
}

/// Open the durable store, falling back to memory if it cannot be opened
///
/// Data written to the fallback does not survive a restart.
pub async fn open_store(path: impl Into<PathBuf>) -> Arc<dyn KeyValueStore> {
    let path = path.into();
    match FileStore::open(&path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Durable store unavailable, lockout state will be kept in memory only"
            );
            Arc::new(MemoryStore::new())
        }
    }
}

/// Open the durable store for secret material
///
/// Secret material never goes to the memory fallback. `None` makes the
/// biometric gate report itself unavailable.
pub async fn open_secure_store(path: impl Into<PathBuf>) -> Option<Arc<dyn KeyValueStore>> {
    let path = path.into();
    match FileStore::open(&path).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Secure store unavailable, biometric login will be disabled"
            );
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Memory store that yields to the scheduler on every read, so
    /// concurrent read-modify-write sequences interleave
    #[derive(Debug, Default)]
    pub struct YieldingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl KeyValueStore for YieldingStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let value = self.inner.get(key).await?;
            tokio::task::yield_now().await;
            Ok(value)
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }

        fn kind(&self) -> StoreKind {
            StoreKind::Memory
        }
    }

    /// Store whose every operation fails
    #[derive(Debug, Default)]
    pub struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Err(Error::Storage(format!("read of {} refused", key)))
        }

        async fn set(&self, key: &str, _value: &str) -> Result<()> {
            Err(Error::Storage(format!("write of {} refused", key)))
        }

        async fn remove(&self, key: &str) -> Result<()> {
            Err(Error::Storage(format!("remove of {} refused", key)))
        }

        fn kind(&self) -> StoreKind {
            StoreKind::Durable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);

        // Removing again is fine
        store.remove("a").await.unwrap();
        assert_eq!(store.kind(), StoreKind::Memory);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.json");

        {
            let store = FileStore::open(&path).await.unwrap();
            store.set("failed_attempts_a@b.c", "2").await.unwrap();
            store.set("other", "x").await.unwrap();
            store.remove("other").await.unwrap();
        }

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(
            store.get("failed_attempts_a@b.c").await.unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(store.get("other").await.unwrap(), None);
        assert_eq!(store.kind(), StoreKind::Durable);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        let store = FileStore::open(&path).await.unwrap();
        store.set("k", "v").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_replaces_readable_files() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("biometric.json");
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&path, "{}").unwrap();
        std::fs::write(&temp_path, "stale").unwrap();
        for file in [&path, &temp_path] {
            std::fs::set_permissions(file, std::fs::Permissions::from_mode(0o644)).unwrap();
        }

        let store = FileStore::open(&path).await.unwrap();
        store.set("biometric_credentials", "sealed").await.unwrap();

        assert!(!temp_path.exists());
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupt_file_rejected() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            FileStore::open(&path).await,
            Err(Error::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_open_store_falls_back_to_memory() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        std::fs::write(&path, "garbage").unwrap();

        let store = open_store(&path).await;
        assert_eq!(store.kind(), StoreKind::Memory);

        // The fallback behaves like any other store
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_open_secure_store_has_no_fallback() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("secure.json");
        std::fs::write(&path, "garbage").unwrap();

        assert!(open_secure_store(&path).await.is_none());
    }
}
