//! Local filesystem key-value store.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::store::{validate_key, KeyValueStore};
use healthsync_common::{Error, Result};

/// Local filesystem key-value store.
///
/// Each key is a file under the root directory. Writes go to a uniquely
/// named temporary file that is then renamed over the target, so readers
/// in this or any other process never see a partial value.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a new file store rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied or invalid path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| {
                Error::Storage(format!("Cannot create {}: {}", root.display(), e))
            })?;
        }

        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn storage_error(action: &str, key: &str, err: std::io::Error) -> Error {
    Error::Storage(format!("Failed to {} '{}': {}", action, key, err))
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        match fs::read_to_string(self.key_path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("read", key, e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let target = self.key_path(key);
        let tmp = self.root.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));

        if let Err(e) = fs::write(&tmp, value).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(storage_error("write", key, e));
        }

        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(storage_error("commit", key, e));
        }

        debug!("Stored {} bytes under {}", value.len(), key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete", key, e)),
        }
    }
}
