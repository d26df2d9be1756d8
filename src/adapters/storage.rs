//! Storage adapters
//!
//! Key-value blob stores (in memory, one JSON file per key) and keyed
//! repositories (in memory, write-through JSON file).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::ports::{KeyValueStore, Repository, StoreError};

/// Volatile blob store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: tokio::sync::RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Blob store writing `<dir>/<key>.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::ReadError(key.to_string(), e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::WriteError(key.to_string(), e.to_string()))?;

        // write to a sibling then rename so readers never see a torn file
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| StoreError::WriteError(key.to_string(), e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::WriteError(key.to_string(), e.to_string()))?;

        tracing::debug!("Stored {} ({} bytes)", path.display(), value.len());
        Ok(())
    }
}

/// Process-local repository
#[derive(Debug)]
pub struct InMemoryRepository<T> {
    records: RwLock<HashMap<String, T>>,
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, key: &str, value: T) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
    }

    fn take(&self, key: &str) -> Option<T> {
        self.records.write().unwrap_or_else(|e| e.into_inner()).remove(key)
    }

    fn modify(&self, key: &str, f: &mut (dyn FnMut(&mut T) + Send)) -> bool {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        match records.get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> HashMap<String, T> {
        self.records.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Repository<T> for InMemoryRepository<T> {
    fn get(&self, key: &str) -> Option<T> {
        self.records.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    async fn put(&self, key: &str, value: T) -> Result<(), StoreError> {
        self.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.take(key))
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn values(&self) -> Vec<T> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<&String> = records.keys().collect();
        keys.sort();
        keys.into_iter().filter_map(|k| records.get(k).cloned()).collect()
    }

    async fn update(&self, key: &str, f: &mut (dyn for<'a> FnMut(&'a mut T) + Send)) -> Result<bool, StoreError> {
        Ok(self.modify(key, f))
    }
}

/// Repository mirrored to a JSON file on every write
///
/// The in-memory copy always takes the change; a failed write is returned
/// to the caller and the file catches up on the next successful one.
#[derive(Debug)]
pub struct JsonFileRepository<T> {
    path: PathBuf,
    inner: InMemoryRepository<T>,
    write_lock: tokio::sync::Mutex<()>,
}

impl<T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static> JsonFileRepository<T> {
    /// Open the repository, loading existing records when the file exists
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let inner = InMemoryRepository::new();
        let key = path.display().to_string();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => {
                let records: HashMap<String, T> =
                    serde_json::from_str(&content).map_err(|e| StoreError::Serialization(e.to_string()))?;
                tracing::info!("Loaded {} records from {}", records.len(), path.display());
                for (k, v) in records {
                    inner.insert(&k, v);
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::ReadError(key, e.to_string())),
        }

        Ok(Self {
            path,
            inner,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> Result<(), StoreError> {
        // snapshot under the lock so the last write on disk is the newest state
        let _guard = self.write_lock.lock().await;
        let key = self.path.display().to_string();
        let content =
            serde_json::to_string_pretty(&self.inner.snapshot()).map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::WriteError(key.clone(), e.to_string()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::WriteError(key.clone(), e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::WriteError(key, e.to_string()))
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static> Repository<T> for JsonFileRepository<T> {
    fn get(&self, key: &str) -> Option<T> {
        self.inner.get(key)
    }

    async fn put(&self, key: &str, value: T) -> Result<(), StoreError> {
        self.inner.insert(key, value);
        self.flush().await
    }

    async fn remove(&self, key: &str) -> Result<Option<T>, StoreError> {
        let removed = self.inner.take(key);
        if removed.is_some() {
            self.flush().await?;
        }
        Ok(removed)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn values(&self) -> Vec<T> {
        self.inner.values()
    }

    async fn update(&self, key: &str, f: &mut (dyn for<'a> FnMut(&'a mut T) + Send)) -> Result<bool, StoreError> {
        if !self.inner.modify(key, f) {
            return Ok(false);
        }
        self.flush().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));

        assert_eq!(store.get("performance/state").await.unwrap(), None);
        store.set("performance/state", "{\"v\":1}").await.unwrap();
        assert_eq!(store.get("performance/state").await.unwrap().as_deref(), Some("{\"v\":1}"));
        assert!(store.path_for("performance/state").ends_with("performance_state.json"));
    }

    #[tokio::test]
    async fn test_in_memory_repository_update() {
        let repo: InMemoryRepository<u32> = InMemoryRepository::new();
        repo.put("b", 2).await.unwrap();
        repo.put("a", 1).await.unwrap();
        assert_eq!(repo.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(repo.values(), vec![1, 2]);

        assert!(repo.update("a", &mut |v| *v += 10).await.unwrap());
        assert_eq!(repo.get("a"), Some(11));
        assert!(!repo.update("missing", &mut |v| *v += 1).await.unwrap());
        assert!(repo.contains("b"));
        assert_eq!(repo.remove("b").await.unwrap(), Some(2));
        assert!(!repo.contains("b"));
    }

    #[tokio::test]
    async fn test_json_file_repository_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("profiles.json");
        {
            let repo: JsonFileRepository<String> = JsonFileRepository::open(&path).await.unwrap();
            repo.put("0xabc", "medium".to_string()).await.unwrap();
            repo.put("0xdef", "low".to_string()).await.unwrap();
            assert!(repo.update("0xabc", &mut |v| v.push_str("-custom")).await.unwrap());
            repo.remove("0xdef").await.unwrap();
        }
        assert!(!path.with_extension("json.tmp").exists());

        let reopened: JsonFileRepository<String> = JsonFileRepository::open(&path).await.unwrap();
        assert_eq!(reopened.keys(), vec!["0xabc".to_string()]);
        assert_eq!(reopened.get("0xabc").as_deref(), Some("medium-custom"));
    }

    #[tokio::test]
    async fn test_json_file_repository_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "not json").unwrap();
        let result: Result<JsonFileRepository<String>, _> = JsonFileRepository::open(&path).await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_json_file_repository_returns_write_failures() {
        let dir = tempdir().unwrap();
        let parent = dir.path().join("state");
        let repo: JsonFileRepository<u32> = JsonFileRepository::open(parent.join("records.json")).await.unwrap();
        // a plain file where the parent directory should be
        std::fs::write(&parent, "").unwrap();

        let put = repo.put("a", 1).await;
        assert!(matches!(put, Err(StoreError::WriteError(_, _))));
        assert!(matches!(repo.update("a", &mut |v| *v += 1).await, Err(StoreError::WriteError(_, _))));
        assert!(matches!(repo.remove("a").await, Err(StoreError::WriteError(_, _))));
        // nothing to flush, so no error
        assert_eq!(repo.remove("a").await.unwrap(), None);
    }
}
