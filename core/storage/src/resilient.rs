//! Degraded-mode wrapper around a durable store.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::memory::MemoryStore;
use crate::store::{validate_key, KeyValueStore};
use healthsync_common::{Error, Result};

/// A store that keeps working when its durable backend does not.
///
/// Writes the backend rejects with `Error::Storage` land in an in-memory
/// overlay instead and the store flips into degraded mode for the rest of
/// the session. Reads prefer the overlay so the session stays consistent
/// with what it wrote. A later successful durable write for the same key
/// drops the overlay copy.
///
/// Deletes the backend rejects are remembered as tombstones, so a key
/// deleted in degraded mode reads as absent even while the backend still
/// serves its old value.
pub struct ResilientStore {
    durable: Arc<dyn KeyValueStore>,
    overlay: MemoryStore,
    tombstones: Mutex<HashSet<String>>,
    degraded: AtomicBool,
}

impl ResilientStore {
    pub fn new(durable: Arc<dyn KeyValueStore>) -> Self {
        Self {
            durable,
            overlay: MemoryStore::new(),
            tombstones: Mutex::new(HashSet::new()),
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether any write has fallen back to memory this session.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn is_tombstoned(&self, key: &str) -> Result<bool> {
        self.tombstones
            .lock()
            .map(|t| t.contains(key))
            .map_err(|_| Error::Storage("Tombstone lock poisoned".to_string()))
    }

    fn set_tombstone(&self, key: &str, deleted: bool) -> Result<()> {
        let mut tombstones = self
            .tombstones
            .lock()
            .map_err(|_| Error::Storage("Tombstone lock poisoned".to_string()))?;
        if deleted {
            tombstones.insert(key.to_string());
        } else {
            tombstones.remove(key);
        }
        Ok(())
    }

    fn enter_degraded(&self, key: &str, err: &Error) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                "{} store unavailable ({}); continuing in memory-only mode",
                self.durable.name(),
                err
            );
        } else {
            warn!("Keeping '{}' in memory only: {}", key, err);
        }
    }
}

#[async_trait]
impl KeyValueStore for ResilientStore {
    fn name(&self) -> &str {
        "resilient"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        if self.is_tombstoned(key)? {
            return Ok(None);
        }
        if let Some(value) = self.overlay.get(key).await? {
            return Ok(Some(value));
        }

        match self.durable.get(key).await {
            Ok(value) => Ok(value),
            Err(Error::Storage(msg)) => {
                warn!("Read of '{}' failed, treating as absent: {}", key, msg);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        match self.durable.set(key, value).await {
            Ok(()) => {
                self.set_tombstone(key, false)?;
                self.overlay.delete(key).await
            }
            Err(e @ Error::Storage(_)) => {
                self.enter_degraded(key, &e);
                self.set_tombstone(key, false)?;
                self.overlay.set(key, value).await
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.overlay.delete(key).await?;
        match self.durable.delete(key).await {
            Ok(()) => self.set_tombstone(key, false),
            Err(e @ Error::Storage(_)) => {
                self.enter_degraded(key, &e);
                self.set_tombstone(key, true)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend whose reads keep working after writes start failing, like a
    /// full or read-only disk.
    #[derive(Clone, Default)]
    struct ReadOnlyAfter {
        inner: MemoryStore,
        read_only: Arc<AtomicBool>,
    }

    impl ReadOnlyAfter {
        fn freeze(&self) {
            self.read_only.store(true, Ordering::SeqCst);
        }

        fn check_writable(&self) -> Result<()> {
            if self.read_only.load(Ordering::SeqCst) {
                Err(Error::Storage("Read-only file system".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for ReadOnlyAfter {
        fn name(&self) -> &str {
            "read-only"
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.check_writable()?;
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.check_writable()?;
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_delete_sticks_when_backend_read_only() {
        let backend = ReadOnlyAfter::default();
        let store = ResilientStore::new(Arc::new(backend.clone()));
        store.set("health_sync_pending", "old-payload").await.unwrap();
        backend.freeze();

        store.delete("health_sync_pending").await.unwrap();

        assert!(store.is_degraded());
        assert_eq!(store.get("health_sync_pending").await.unwrap(), None);
        assert_eq!(
            backend.get("health_sync_pending").await.unwrap().as_deref(),
            Some("old-payload")
        );
    }

    #[tokio::test]
    async fn test_set_after_degraded_delete_is_visible() {
        let backend = ReadOnlyAfter::default();
        let store = ResilientStore::new(Arc::new(backend.clone()));
        store.set("key", "old").await.unwrap();
        backend.freeze();

        store.delete("key").await.unwrap();
        store.set("key", "new").await.unwrap();

        assert_eq!(store.get("key").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_durable_delete_clears_tombstone() {
        let (backend, store) = setup();
        backend.set_available(false);
        store.delete("key").await.unwrap();

        backend.set_available(true);
        store.delete("key").await.unwrap();
        backend.set("key", "fresh").await.unwrap();

        assert_eq!(store.get("key").await.unwrap().as_deref(), Some("fresh"));
    }

    fn setup() -> (MemoryStore, ResilientStore) {
        let backend = MemoryStore::new();
        let store = ResilientStore::new(Arc::new(backend.clone()));
        (backend, store)
    }

    #[tokio::test]
    async fn test_passthrough_when_healthy() {
        let (backend, store) = setup();

        store.set("key", "value").await.unwrap();

        assert!(!store.is_degraded());
        assert_eq!(backend.get("key").await.unwrap().as_deref(), Some("value"));
    }

    #[tokio::test]
    async fn test_falls_back_to_memory_on_storage_error() {
        let (backend, store) = setup();
        backend.set_available(false);

        store.set("key", "value").await.unwrap();

        assert!(store.is_degraded());
        assert_eq!(store.get("key").await.unwrap().as_deref(), Some("value"));

        backend.set_available(true);
        assert_eq!(backend.get("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_durable_write_clears_overlay() {
        let (backend, store) = setup();
        backend.set_available(false);
        store.set("key", "old").await.unwrap();

        backend.set_available(true);
        store.set("key", "new").await.unwrap();

        assert_eq!(backend.get("key").await.unwrap().as_deref(), Some("new"));
        assert_eq!(store.get("key").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_read_failure_is_absent() {
        let (backend, store) = setup();
        backend.set("key", "value").await.unwrap();
        backend.set_available(false);

        assert_eq!(store.get("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_key_still_rejected() {
        let (_backend, store) = setup();
        assert!(matches!(
            store.set("bad/key", "v").await,
            Err(Error::InvalidInput(_))
        ));
    }
}
