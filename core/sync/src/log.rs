//! Bounded sync history merged from local and remote outcomes.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use healthsync_common::{Result, SyncLogEntry, SyncOutcome};
use healthsync_storage::KeyValueStore;

use crate::config::DEFAULT_LOG_CAPACITY;
use crate::state::keys;
use crate::transport::{RemoteLogEntry, SyncTransport};

/// Sync history kept newest-first and capped at a fixed number of entries.
///
/// The whole list lives under a single store key, so every update is one
/// atomic write. Within a process, updates are serialized so concurrent
/// appends do not lose each other.
pub struct SyncLogStore {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl SyncLogStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_capacity(store, DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All retained entries, newest first. Unreadable state reads as empty.
    pub async fn entries(&self) -> Vec<SyncLogEntry> {
        let raw = match self.store.get(keys::SYNC_LOGS).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!("Sync log unavailable, treating as empty: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<SyncLogEntry>>(&raw) {
            Ok(mut entries) => {
                sort_newest_first(&mut entries);
                entries
            }
            Err(e) => {
                warn!("Discarding unreadable sync log: {}", e);
                Vec::new()
            }
        }
    }

    async fn persist(&self, entries: &[SyncLogEntry]) -> Result<()> {
        let json = serde_json::to_string(entries)?;
        self.store.set(keys::SYNC_LOGS, &json).await
    }

    /// Insert `entry` and drop the oldest existing entries beyond capacity.
    ///
    /// The new entry is always retained, even when merged server entries
    /// carry later timestamps than the local clock.
    pub async fn append(&self, entry: SyncLogEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.entries().await;
        entries.truncate(self.capacity - 1);
        entries.insert(0, entry);
        sort_newest_first(&mut entries);

        self.persist(&entries).await
    }

    /// Up to `limit` entries, newest first.
    pub async fn list(&self, limit: usize) -> Vec<SyncLogEntry> {
        let mut entries = self.entries().await;
        entries.truncate(limit);
        entries
    }

    /// Merge entries reported by the server into the local history and
    /// persist the result as the new canonical log.
    ///
    /// Entries with the same timestamp and message are kept once.
    pub async fn merge_remote(&self, remote: Vec<SyncLogEntry>) -> Result<Vec<SyncLogEntry>> {
        let _guard = self.write_lock.lock().await;

        let local = self.entries().await;
        let merged = merge_entries(remote, local, self.capacity);
        self.persist(&merged).await?;
        Ok(merged)
    }

    /// Pull the server-side history, merge it, and return up to `limit`
    /// entries.
    ///
    /// Any failure fetching or merging falls back to the local entries;
    /// this never returns an error.
    pub async fn refresh(
        &self,
        transport: &dyn SyncTransport,
        fetch_limit: usize,
        limit: usize,
    ) -> Vec<SyncLogEntry> {
        match transport.fetch_logs(fetch_limit).await {
            Ok(remote) => {
                let mapped: Vec<SyncLogEntry> = remote.iter().filter_map(map_remote).collect();
                debug!("Merging {} remote log entries", mapped.len());
                if let Err(e) = self.merge_remote(mapped).await {
                    warn!("Could not persist merged sync log: {}", e);
                }
            }
            Err(e) => {
                debug!("Could not load remote logs, using local logs only: {}", e);
            }
        }
        self.list(limit).await
    }
}

fn sort_newest_first(entries: &mut [SyncLogEntry]) {
    // Stable, so equal timestamps keep their relative order.
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Combine two histories newest-first, dropping duplicates and capping
/// the result at `capacity`.
pub fn merge_entries(
    remote: Vec<SyncLogEntry>,
    local: Vec<SyncLogEntry>,
    capacity: usize,
) -> Vec<SyncLogEntry> {
    let mut seen: HashSet<(DateTime<Utc>, String)> = HashSet::new();
    let mut merged: Vec<SyncLogEntry> = remote
        .into_iter()
        .chain(local)
        .filter(|e| seen.insert((e.timestamp, e.message.clone())))
        .collect();

    sort_newest_first(&mut merged);
    merged.truncate(capacity);
    merged
}

/// Parse a server timestamp. Values without an offset are taken as UTC.
fn parse_remote_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Map a server entry onto the local shape. Entries whose timestamp cannot
/// be read are skipped.
pub fn map_remote(entry: &RemoteLogEntry) -> Option<SyncLogEntry> {
    let Some(timestamp) = parse_remote_timestamp(&entry.timestamp) else {
        debug!("Skipping remote log entry with timestamp '{}'", entry.timestamp);
        return None;
    };

    let outcome = if entry.status == "success" {
        SyncOutcome::Success
    } else {
        SyncOutcome::Error
    };

    let sync_type = entry.sync_type.as_deref().unwrap_or("unknown");
    let message = match entry.records_synced {
        Some(n) => format!("{}: {} records ({})", entry.status, n, sync_type),
        None => format!("{} ({})", entry.status, sync_type),
    };

    Some(SyncLogEntry::new(timestamp, outcome, message))
}
