//! Background sync context.
//!
//! Runs apart from the foreground agent and shares only the persistent
//! store with it. Successful syncs are announced on a notification channel
//! so a foreground context can refresh its view.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use healthsync_common::SyncTrigger;
use healthsync_storage::KeyValueStore;

use crate::agent::{SyncAgent, SyncResult};
use crate::config::{AgentConfig, BACKGROUND_DEVICE_INFO};
use crate::connectivity::ConnectivityMonitor;
use crate::source::RandomHealthSource;
use crate::transport::SyncTransport;

/// Platform signal that wakes the background context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundSignal {
    /// Periodic wake-up owned by the platform.
    PeriodicWake,
    /// Connectivity came back while the foreground was suspended.
    Reconnected,
    /// Inbound push message, with its text if any.
    Push(Option<String>),
}

/// Sent after a background sync the server accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncNotification {
    pub attempt_id: Uuid,
    pub records_synced: u64,
}

/// Handles background signals, one sync attempt at most per signal.
///
/// The runner keeps no timer of its own; the platform decides when to
/// invoke it again.
pub struct BackgroundRunner {
    agent: SyncAgent,
    notify: broadcast::Sender<SyncNotification>,
}

impl BackgroundRunner {
    pub fn new(agent: SyncAgent) -> Self {
        let (notify, _) = broadcast::channel(16);
        Self { agent, notify }
    }

    /// Build a runner with its own background data source over `store`.
    pub fn from_config(
        config: &AgentConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        let agent = SyncAgent::new(
            Arc::new(RandomHealthSource::background(BACKGROUND_DEVICE_INFO)),
            transport,
            store,
            ConnectivityMonitor::new(true),
        )
        .with_log_capacity(config.log_capacity)
        .with_remote_log_limit(config.remote_log_limit);
        Self::new(agent)
    }

    pub fn agent(&self) -> &SyncAgent {
        &self.agent
    }

    /// Subscribe to successful-sync notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.notify.subscribe()
    }

    /// Handle one signal.
    ///
    /// Returns `None` when there was nothing to do: auto-sync is off for a
    /// wake or push, or a reconnect found no pending payload.
    pub async fn handle(&self, signal: BackgroundSignal) -> Option<SyncResult> {
        let trigger = match &signal {
            BackgroundSignal::PeriodicWake => SyncTrigger::Periodic,
            BackgroundSignal::Push(message) => {
                if let Some(message) = message {
                    info!("Push message received: {}", message);
                }
                SyncTrigger::Auto
            }
            BackgroundSignal::Reconnected => {
                self.agent.connectivity().go_online();
                if self.agent.state().pending_payload().await.is_none() {
                    debug!("No pending payload to sync");
                    return None;
                }
                SyncTrigger::Retry
            }
        };

        if trigger != SyncTrigger::Retry && !self.agent.state().settings().await.auto_sync_enabled {
            debug!(?signal, "Auto-sync disabled, ignoring background signal");
            return None;
        }

        let result = self.agent.run_sync(trigger).await;
        if let Some(records_synced) = result.records_synced() {
            // Nobody listening is fine.
            let _ = self.notify.send(SyncNotification {
                attempt_id: result.attempt_id,
                records_synced,
            });
        }
        Some(result)
    }

    /// Handle signals until the sending side closes.
    pub async fn run(self, mut signals: mpsc::Receiver<BackgroundSignal>) {
        info!("Background runner started");
        while let Some(signal) = signals.recv().await {
            debug!(?signal, "Background signal");
            if let Some(result) = self.handle(signal).await {
                info!("Background sync finished: {}", result.summary());
            }
        }
        info!("Background runner stopped");
    }
}
