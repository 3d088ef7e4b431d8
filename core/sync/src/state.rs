//! Typed access to the agent's persisted state.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use healthsync_common::{ActivitySummary, Result, Settings, SyncPayload};
use healthsync_storage::KeyValueStore;

/// Keys under which the agent keeps its state.
pub mod keys {
    pub const AUTO_SYNC: &str = "health_sync_auto";
    pub const LAST_SYNC: &str = "health_sync_last";
    pub const PENDING_PAYLOAD: &str = "health_sync_pending";
    pub const SYNC_LOGS: &str = "health_sync_logs";
    pub const LATEST_SNAPSHOT: &str = "health_sync_activity";
}

/// Typed view over the persistent store.
///
/// Reads never fail: a missing, unreadable or corrupt value degrades to
/// the default. Writes return their error so callers can decide whether
/// it matters.
#[derive(Clone)]
pub struct AgentState {
    store: Arc<dyn KeyValueStore>,
}

impl AgentState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!("Reading '{}' failed, using default: {}", key, e);
                None
            }
        }
    }

    /// Current settings; auto-sync stays enabled unless explicitly "false".
    pub async fn settings(&self) -> Settings {
        let auto_sync_enabled = self
            .read(keys::AUTO_SYNC)
            .await
            .map(|v| v.trim() != "false")
            .unwrap_or(true);
        Settings { auto_sync_enabled }
    }

    pub async fn save_settings(&self, settings: Settings) -> Result<()> {
        let value = if settings.auto_sync_enabled { "true" } else { "false" };
        self.store.set(keys::AUTO_SYNC, value).await
    }

    /// Instant of the last successful sync, `None` if never synced.
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        let raw = self.read(keys::LAST_SYNC).await?;
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!("Ignoring corrupt last-sync marker '{}': {}", raw, e);
                None
            }
        }
    }

    pub async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.store.set(keys::LAST_SYNC, &at.to_rfc3339()).await
    }

    /// The payload waiting for a retry, if any.
    pub async fn pending_payload(&self) -> Option<SyncPayload> {
        let raw = self.read(keys::PENDING_PAYLOAD).await?;
        match SyncPayload::from_json(&raw) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("Discarding unreadable pending payload: {}", e);
                None
            }
        }
    }

    /// Store `payload` as the single pending payload, replacing any other.
    pub async fn set_pending_payload(&self, payload: &SyncPayload) -> Result<()> {
        self.store
            .set(keys::PENDING_PAYLOAD, &payload.to_json()?)
            .await
    }

    pub async fn clear_pending_payload(&self) -> Result<()> {
        self.store.delete(keys::PENDING_PAYLOAD).await
    }

    /// Last payload the server accepted.
    pub async fn latest_snapshot(&self) -> Option<SyncPayload> {
        let raw = self.read(keys::LATEST_SNAPSHOT).await?;
        SyncPayload::from_json(&raw).ok()
    }

    pub async fn set_latest_snapshot(&self, payload: &SyncPayload) -> Result<()> {
        self.store
            .set(keys::LATEST_SNAPSHOT, &payload.to_json()?)
            .await
    }

    /// Headline figures of the last accepted payload.
    pub async fn latest_summary(&self) -> ActivitySummary {
        self.latest_snapshot()
            .await
            .map(|p| ActivitySummary::from_payload(&p))
            .unwrap_or_default()
    }
}
