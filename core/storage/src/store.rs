//! Key-value store trait definition.

use async_trait::async_trait;

use healthsync_common::{Error, Result};

/// Durable string key-value store.
///
/// Implementations must make each individual `set` atomic: concurrent
/// readers (including other processes sharing the same backing location)
/// see either the previous value or the new one, never a mix.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the store name (e.g., "file", "memory").
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    ///
    /// # Returns
    /// `None` when the key has never been written or was deleted.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// - `Error::Storage` when the backend is unavailable (quota, permissions)
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Check that a key is usable by every backend.
///
/// Keys are restricted to ASCII alphanumerics, `_`, `-` and `.` so they can
/// double as file names.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("Store key cannot be empty".to_string()));
    }
    if key.starts_with('.') {
        return Err(Error::InvalidInput(format!(
            "Store key cannot start with '.': {}",
            key
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(Error::InvalidInput(format!(
            "Store key contains invalid characters: {}",
            key
        )));
    }
    Ok(())
}
