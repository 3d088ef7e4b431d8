//! In-memory key-value store for testing and degraded operation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::store::{validate_key, KeyValueStore};
use healthsync_common::{Error, Result};

/// In-memory key-value store.
///
/// Useful for testing and as the fallback of [`crate::ResilientStore`].
/// All data is lost on drop. Clones share the same map.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the backend becoming unavailable (or available again).
    ///
    /// While unavailable every operation fails with `Error::Storage`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Storage("Memory store unavailable".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> Error {
    Error::Storage("Memory store lock poisoned".to_string())
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        self.check_available()?;
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.check_available()?;
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.check_available()?;
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get() {
        let store = MemoryStore::new();
        store.set("key", "value").await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), Some("value".to_string()));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        store.set("key", "value").await.unwrap();
        store.delete("key").await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), None);

        // Deleting again is fine
        store.delete("key").await.unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("shared", "1").await.unwrap();
        assert_eq!(other.get("shared").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_unavailable_fails_with_storage_error() {
        let store = MemoryStore::new();
        store.set_available(false);

        let err = store.set("key", "value").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        store.set_available(true);
        store.set("key", "value").await.unwrap();
    }
}
