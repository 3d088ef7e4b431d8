//! Sync scheduling: periodic auto-sync and retry on reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use healthsync_common::{Error, Result, Settings, SyncTrigger};

use crate::agent::{SyncAgent, SyncResult};
use crate::config::AgentConfig;
use crate::connectivity::SubscriptionId;

/// Timing used by the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct SchedulePolicy {
    /// Period of the auto-sync timer.
    pub sync_interval: Duration,
    /// Pause after reconnecting before the retry sync.
    pub stabilization_delay: Duration,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30 * 60),
            stabilization_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&AgentConfig> for SchedulePolicy {
    fn from(config: &AgentConfig) -> Self {
        Self {
            sync_interval: config.sync_interval(),
            stabilization_delay: config.stabilization_delay(),
        }
    }
}

/// Requests handled by the coordinator task.
#[derive(Debug)]
enum Command {
    SyncNow(oneshot::Sender<SyncResult>),
    /// Re-read settings and restart the periodic timer.
    Reload(oneshot::Sender<bool>),
    Reconnected,
    Shutdown,
}

/// Owns the auto-sync timer and the reconnect subscription of one agent.
///
/// The timer runs only while auto-sync is enabled. Reconnect retries run
/// whether or not auto-sync is enabled. Stopping or dropping the
/// coordinator cancels every pending timer.
pub struct ScheduleCoordinator {
    agent: Arc<SyncAgent>,
    request_tx: mpsc::Sender<Command>,
    auto_sync: Arc<AtomicBool>,
    subscription: SubscriptionId,
    task: Option<JoinHandle<()>>,
}

impl ScheduleCoordinator {
    /// Start scheduling for `agent` from the persisted settings.
    pub async fn start(agent: Arc<SyncAgent>, policy: SchedulePolicy) -> Self {
        let (request_tx, request_rx) = mpsc::channel(100);
        let enabled = agent.state().settings().await.auto_sync_enabled;
        let auto_sync = Arc::new(AtomicBool::new(enabled));

        let reconnect_tx = request_tx.clone();
        let subscription = agent.connectivity().on_online(move || {
            if reconnect_tx.try_send(Command::Reconnected).is_err() {
                warn!("Scheduler not accepting reconnect signals");
            }
        });

        let worker = Worker {
            agent: agent.clone(),
            policy,
            auto_sync: auto_sync.clone(),
        };
        let task = tokio::spawn(worker.run(request_rx, enabled));

        info!(
            auto_sync = enabled,
            interval = ?policy.sync_interval,
            "Sync scheduler started"
        );

        Self {
            agent,
            request_tx,
            auto_sync,
            subscription,
            task: Some(task),
        }
    }

    pub fn agent(&self) -> &Arc<SyncAgent> {
        &self.agent
    }

    pub fn is_auto_sync_enabled(&self) -> bool {
        self.auto_sync.load(Ordering::SeqCst)
    }

    /// Run a manual sync now and wait for its result.
    pub async fn sync_now(&self) -> Result<SyncResult> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(Command::SyncNow(response_tx))
            .await
            .map_err(|_| not_running())?;
        response_rx.await.map_err(|_| not_running())
    }

    /// Persist the auto-sync flag and restart the timer from zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the setting cannot be stored or the scheduler
    /// has stopped.
    pub async fn set_auto_sync(&self, enabled: bool) -> Result<()> {
        self.agent
            .state()
            .save_settings(Settings {
                auto_sync_enabled: enabled,
            })
            .await?;
        self.reload().await?;
        Ok(())
    }

    /// Re-derive the schedule from the stored settings.
    ///
    /// Returns whether auto-sync is now enabled.
    pub async fn reload(&self) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(Command::Reload(response_tx))
            .await
            .map_err(|_| not_running())?;
        response_rx.await.map_err(|_| not_running())
    }

    /// Cancel timers, drop the reconnect subscription and wait for the
    /// scheduler task to finish.
    pub async fn stop(mut self) {
        self.agent.connectivity().unsubscribe(self.subscription);
        let _ = self.request_tx.send(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ScheduleCoordinator {
    fn drop(&mut self) {
        self.agent.connectivity().unsubscribe(self.subscription);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn not_running() -> Error {
    Error::InvalidInput("Scheduler not running".to_string())
}

struct Worker {
    agent: Arc<SyncAgent>,
    policy: SchedulePolicy,
    auto_sync: Arc<AtomicBool>,
}

impl Worker {
    fn periodic_interval(&self) -> Interval {
        let period = self.policy.sync_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Run a sync off the loop so signals keep being handled meanwhile.
    fn spawn_sync(&self, trigger: SyncTrigger) -> JoinHandle<SyncResult> {
        let agent = self.agent.clone();
        tokio::spawn(async move { agent.run_sync(trigger).await })
    }

    async fn run(self, mut request_rx: mpsc::Receiver<Command>, enabled: bool) {
        let mut periodic = enabled.then(|| self.periodic_interval());
        let mut retry_at: Option<Instant> = None;

        loop {
            tokio::select! {
                command = request_rx.recv() => {
                    match command {
                        None | Some(Command::Shutdown) => {
                            info!("Sync scheduler shutting down");
                            break;
                        }
                        Some(Command::SyncNow(response_tx)) => {
                            let sync = self.spawn_sync(SyncTrigger::Manual);
                            tokio::spawn(async move {
                                if let Ok(result) = sync.await {
                                    let _ = response_tx.send(result);
                                }
                            });
                        }
                        Some(Command::Reload(response_tx)) => {
                            let enabled = self.agent.state().settings().await.auto_sync_enabled;
                            self.auto_sync.store(enabled, Ordering::SeqCst);
                            periodic = enabled.then(|| self.periodic_interval());
                            info!(auto_sync = enabled, "Sync schedule reloaded");
                            let _ = response_tx.send(enabled);
                        }
                        Some(Command::Reconnected) => {
                            if retry_at.is_some() {
                                debug!("Reconnected again, restarting stabilization delay");
                            }
                            retry_at = Some(Instant::now() + self.policy.stabilization_delay);
                        }
                    }
                }

                _ = tick(&mut periodic) => {
                    debug!("Triggering periodic sync");
                    self.spawn_sync(SyncTrigger::Periodic);
                }

                _ = deadline(retry_at) => {
                    retry_at = None;
                    if self.agent.connectivity().is_online() {
                        info!("Connection stable, retrying sync");
                        self.spawn_sync(SyncTrigger::Retry);
                    } else {
                        debug!("Offline again before retry, dropping it");
                    }
                }
            }
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::testing::{sample_payload, FixedSource, ScriptedTransport};
    use healthsync_common::TriggeredBy;
    use healthsync_storage::MemoryStore;

    const MINUTE: Duration = Duration::from_secs(60);

    struct Harness {
        transport: Arc<ScriptedTransport>,
        connectivity: ConnectivityMonitor,
        agent: Arc<SyncAgent>,
    }

    async fn harness(online: bool, auto_sync: bool) -> Harness {
        let store = MemoryStore::new();
        let transport = Arc::new(ScriptedTransport::new());
        let connectivity = ConnectivityMonitor::new(online);
        let agent = Arc::new(SyncAgent::new(
            Arc::new(FixedSource::new(8000)),
            transport.clone(),
            Arc::new(store),
            connectivity.clone(),
        ));
        agent
            .state()
            .save_settings(Settings {
                auto_sync_enabled: auto_sync,
            })
            .await
            .unwrap();
        Harness {
            transport,
            connectivity,
            agent,
        }
    }

    fn periodic_pushes(transport: &ScriptedTransport) -> usize {
        transport
            .pushed()
            .iter()
            .filter(|p| p.triggered_by == TriggeredBy::Periodic)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sync_fires_each_interval() {
        let h = harness(true, true).await;
        let coordinator = ScheduleCoordinator::start(h.agent.clone(), SchedulePolicy::default()).await;
        assert!(coordinator.is_auto_sync_enabled());

        tokio::time::sleep(29 * MINUTE).await;
        assert_eq!(periodic_pushes(&h.transport), 0);

        tokio::time::sleep(2 * MINUTE).await;
        assert_eq!(periodic_pushes(&h.transport), 1);

        tokio::time::sleep(30 * MINUTE).await;
        assert_eq!(periodic_pushes(&h.transport), 2);

        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_runs_periodic() {
        let h = harness(true, false).await;
        let coordinator = ScheduleCoordinator::start(h.agent.clone(), SchedulePolicy::default()).await;
        assert!(!coordinator.is_auto_sync_enabled());

        tokio::time::sleep(95 * MINUTE).await;
        assert_eq!(h.transport.push_count(), 0);

        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_cancels_timer() {
        let h = harness(true, true).await;
        let coordinator = ScheduleCoordinator::start(h.agent.clone(), SchedulePolicy::default()).await;

        tokio::time::sleep(10 * MINUTE).await;
        coordinator.set_auto_sync(false).await.unwrap();
        assert!(!coordinator.is_auto_sync_enabled());
        assert!(!h.agent.state().settings().await.auto_sync_enabled);

        tokio::time::sleep(61 * MINUTE).await;
        assert_eq!(h.transport.push_count(), 0);

        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_restarts_interval_from_zero() {
        let h = harness(true, true).await;
        let coordinator = ScheduleCoordinator::start(h.agent.clone(), SchedulePolicy::default()).await;

        tokio::time::sleep(20 * MINUTE).await;
        coordinator.set_auto_sync(true).await.unwrap();

        // 40 minutes after start, 20 after the restart
        tokio::time::sleep(20 * MINUTE).await;
        assert_eq!(periodic_pushes(&h.transport), 0);

        tokio::time::sleep(11 * MINUTE).await;
        assert_eq!(periodic_pushes(&h.transport), 1);

        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_retries_pending_once() {
        let h = harness(false, false).await;
        let pending = sample_payload(SyncTrigger::Manual, 1234);
        h.agent.state().set_pending_payload(&pending).await.unwrap();
        let coordinator = ScheduleCoordinator::start(h.agent.clone(), SchedulePolicy::default()).await;

        h.connectivity.go_online();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.transport.push_count(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(h.transport.pushed(), vec![pending]);
        assert!(h.agent.state().pending_payload().await.is_none());

        // Online re-signal schedules nothing further
        h.connectivity.go_online();
        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(h.transport.push_count(), 1);

        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_connection_retries_once() {
        let h = harness(false, false).await;
        let coordinator = ScheduleCoordinator::start(h.agent.clone(), SchedulePolicy::default()).await;

        h.connectivity.go_online();
        tokio::time::sleep(Duration::from_millis(400)).await;
        h.connectivity.go_offline();
        h.connectivity.go_online();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.transport.push_count(), 1);
        assert_eq!(h.transport.pushed()[0].triggered_by, TriggeredBy::Background);

        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_dropped_when_offline_at_deadline() {
        let h = harness(false, false).await;
        let coordinator = ScheduleCoordinator::start(h.agent.clone(), SchedulePolicy::default()).await;

        h.connectivity.go_online();
        h.connectivity.go_offline();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.transport.push_count(), 0);

        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_sync_now_returns_result() {
        let h = harness(true, false).await;
        h.transport.succeed_with(2);
        let coordinator = ScheduleCoordinator::start(h.agent.clone(), SchedulePolicy::default()).await;

        let result = coordinator.sync_now().await.unwrap();
        assert_eq!(result.trigger, SyncTrigger::Manual);
        assert_eq!(result.records_synced(), Some(2));

        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unsubscribes_and_cancels() {
        let h = harness(false, true).await;
        let coordinator = ScheduleCoordinator::start(h.agent.clone(), SchedulePolicy::default()).await;
        assert_eq!(h.connectivity.subscriber_count(), 1);

        coordinator.stop().await;
        assert_eq!(h.connectivity.subscriber_count(), 0);

        h.connectivity.go_online();
        tokio::time::sleep(60 * MINUTE).await;
        assert_eq!(h.transport.push_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let h = harness(true, true).await;
        {
            let _coordinator =
                ScheduleCoordinator::start(h.agent.clone(), SchedulePolicy::default()).await;
        }
        assert_eq!(h.connectivity.subscriber_count(), 0);

        tokio::time::sleep(60 * MINUTE).await;
        assert_eq!(h.transport.push_count(), 0);
    }
}
