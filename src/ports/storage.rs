//! Persistence ports
//!
//! `KeyValueStore` is the whole-blob string store used for JSON snapshots.
//! `Repository` is the keyed in-process store behind risk profiles, execution
//! statuses and tracker records; backings are swappable.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Failed to read key '{0}': {1}")]
    ReadError(String, String),
    #[error("Failed to write key '{0}': {1}")]
    WriteError(String, String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Keyed record store. Reads are served from memory; writes reach the
/// backing and report its failures.
#[async_trait]
pub trait Repository<T: Clone + Send + 'static>: Send + Sync {
    fn get(&self, key: &str) -> Option<T>;

    async fn put(&self, key: &str, value: T) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<Option<T>, StoreError>;

    fn keys(&self) -> Vec<String>;

    fn values(&self) -> Vec<T>;

    /// Read-modify-write a record; `Ok(false)` when absent
    async fn update(&self, key: &str, f: &mut (dyn for<'a> FnMut(&'a mut T) + Send)) -> Result<bool, StoreError> {
        match self.get(key) {
            Some(mut value) => {
                f(&mut value);
                self.put(key, value).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}
