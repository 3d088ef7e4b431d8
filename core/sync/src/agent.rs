//! Sync agent: one collect, transmit, record pipeline per attempt.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use healthsync_common::{Error, SyncLogEntry, SyncPayload, SyncTrigger};
use healthsync_storage::KeyValueStore;

use crate::connectivity::ConnectivityMonitor;
use crate::log::SyncLogStore;
use crate::source::HealthDataSource;
use crate::state::AgentState;
use crate::transport::SyncTransport;

/// Capacity of the event channel; slow subscribers miss old events.
const EVENT_CAPACITY: usize = 32;

/// Why an attempt failed, coarse enough to drive exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DataSource,
    Connectivity,
    Authentication,
    Rejected,
    Other,
}

impl FailureKind {
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::DataSource(_) => FailureKind::DataSource,
            Error::Transport(_) => FailureKind::Connectivity,
            e if e.is_auth_failure() => FailureKind::Authentication,
            Error::RemoteRejected { .. } => FailureKind::Rejected,
            _ => FailureKind::Other,
        }
    }
}

/// Final state of a sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    /// The server accepted the payload.
    Synced { records_synced: u64 },
    /// The attempt failed while online.
    Failed { kind: FailureKind, message: String },
    /// The attempt failed while offline; the payload waits for reconnect.
    Queued { kind: FailureKind, message: String },
    /// Another attempt was already in flight; nothing was sent.
    Skipped,
}

/// Outcome of [`SyncAgent::run_sync`].
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub attempt_id: Uuid,
    pub trigger: SyncTrigger,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip)]
    pub duration: Duration,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, SyncStatus::Synced { .. })
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.status, SyncStatus::Queued { .. })
    }

    pub fn records_synced(&self) -> Option<u64> {
        match self.status {
            SyncStatus::Synced { records_synced } => Some(records_synced),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.status {
            SyncStatus::Failed { kind, .. } | SyncStatus::Queued { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Short status line for display.
    pub fn summary(&self) -> String {
        match &self.status {
            SyncStatus::Synced { records_synced } => format!("Synced {} records", records_synced),
            SyncStatus::Failed { message, .. } => format!("Sync failed: {}", message),
            SyncStatus::Queued { message, .. } => format!("Queued for retry: {}", message),
            SyncStatus::Skipped => "Sync already in progress".to_string(),
        }
    }
}

/// Notification published by an agent.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started { attempt_id: Uuid, trigger: SyncTrigger },
    Finished(SyncResult),
}

/// Clears the in-flight flag when the attempt ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Orchestrates sync attempts against the remote endpoint.
///
/// `run_sync` never returns an error: every failure is captured in the
/// returned [`SyncResult`] and in the sync log. There is no retry loop
/// inside an attempt; callers decide when to try again.
pub struct SyncAgent {
    source: Arc<dyn HealthDataSource>,
    transport: Arc<dyn SyncTransport>,
    state: AgentState,
    log: Arc<SyncLogStore>,
    connectivity: ConnectivityMonitor,
    in_flight: AtomicBool,
    remote_log_limit: usize,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncAgent {
    /// Create an agent over the given collaborators.
    pub fn new(
        source: Arc<dyn HealthDataSource>,
        transport: Arc<dyn SyncTransport>,
        store: Arc<dyn KeyValueStore>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            transport,
            state: AgentState::new(store.clone()),
            log: Arc::new(SyncLogStore::new(store)),
            connectivity,
            in_flight: AtomicBool::new(false),
            remote_log_limit: 10,
            events,
        }
    }

    /// Set the maximum number of retained log entries.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log = Arc::new(SyncLogStore::with_capacity(self.state.store(), capacity));
        self
    }

    /// Set how many server-side log entries are fetched when refreshing.
    pub fn with_remote_log_limit(mut self, limit: usize) -> Self {
        self.remote_log_limit = limit;
        self
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn log(&self) -> Arc<SyncLogStore> {
        self.log.clone()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn transport(&self) -> Arc<dyn SyncTransport> {
        self.transport.clone()
    }

    /// Subscribe to start/finish notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Whether an attempt is currently running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Sync history merged with the server's, falling back to local only.
    pub async fn refresh_logs(&self, limit: usize) -> Vec<SyncLogEntry> {
        self.log
            .refresh(self.transport.as_ref(), self.remote_log_limit, limit)
            .await
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Run one sync attempt.
    ///
    /// At most one attempt runs at a time per agent; an overlapping call
    /// returns immediately with [`SyncStatus::Skipped`].
    pub async fn run_sync(&self, trigger: SyncTrigger) -> SyncResult {
        let attempt_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        let Some(_flight) = InFlight::acquire(&self.in_flight) else {
            info!(%attempt_id, %trigger, "Sync already in flight, skipping");
            return SyncResult {
                attempt_id,
                trigger,
                status: SyncStatus::Skipped,
                started_at,
                finished_at: Utc::now(),
                duration: start.elapsed(),
            };
        };

        info!(%attempt_id, %trigger, "Starting sync");
        self.emit(SyncEvent::Started { attempt_id, trigger });

        let status = match self.payload_for(trigger).await {
            Ok(payload) => self.transmit(attempt_id, &payload).await,
            Err(e) => {
                warn!(%attempt_id, "Could not collect health data: {}", e);
                self.record_log(SyncLogEntry::error(e.to_string())).await;
                SyncStatus::Failed {
                    kind: FailureKind::from_error(&e),
                    message: e.to_string(),
                }
            }
        };

        let result = SyncResult {
            attempt_id,
            trigger,
            status,
            started_at,
            finished_at: Utc::now(),
            duration: start.elapsed(),
        };
        info!(%attempt_id, duration = ?result.duration, "{}", result.summary());

        self.emit(SyncEvent::Finished(result.clone()));
        result
    }

    /// Payload for this attempt: a retry replays the pending payload when
    /// there is one, everything else collects fresh readings.
    async fn payload_for(&self, trigger: SyncTrigger) -> healthsync_common::Result<SyncPayload> {
        if trigger == SyncTrigger::Retry {
            if let Some(pending) = self.state.pending_payload().await {
                debug!("Replaying pending payload");
                return Ok(pending);
            }
        }
        self.source.collect(trigger).await
    }

    async fn transmit(&self, attempt_id: Uuid, payload: &SyncPayload) -> SyncStatus {
        debug!(%attempt_id, records = payload.record_count(), "Sending to {}", self.transport.endpoint());

        match self.transport.push(payload).await {
            Ok(receipt) => {
                self.record_success(payload).await;
                self.record_log(SyncLogEntry::success(format!(
                    "Synced {} records",
                    receipt.records_synced
                )))
                .await;
                SyncStatus::Synced {
                    records_synced: receipt.records_synced,
                }
            }
            Err(e) => {
                warn!(%attempt_id, "Sync failed: {}", e);
                if let Err(store_err) = self.state.set_pending_payload(payload).await {
                    warn!(%attempt_id, "Could not persist pending payload: {}", store_err);
                }
                self.record_log(SyncLogEntry::error(e.to_string())).await;

                let kind = FailureKind::from_error(&e);
                let message = e.to_string();
                if self.connectivity.is_online() {
                    SyncStatus::Failed { kind, message }
                } else {
                    info!(%attempt_id, "Offline - sync will retry when online");
                    SyncStatus::Queued { kind, message }
                }
            }
        }
    }

    async fn record_success(&self, payload: &SyncPayload) {
        if let Err(e) = self.state.set_last_sync(Utc::now()).await {
            warn!("Could not store last-sync marker: {}", e);
        }
        if let Err(e) = self.state.clear_pending_payload().await {
            warn!("Could not clear pending payload: {}", e);
        }
        if let Err(e) = self.state.set_latest_snapshot(payload).await {
            debug!("Could not store latest snapshot: {}", e);
        }
    }

    async fn record_log(&self, entry: SyncLogEntry) {
        if let Err(e) = self.log.append(entry).await {
            warn!("Could not append sync log entry: {}", e);
        }
    }
}
