//! Online/offline tracking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::SyncTransport;

type OnlineCallback = Arc<dyn Fn() + Send + Sync>;

/// Token returned by [`ConnectivityMonitor::on_online`], used to
/// unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner {
    online: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(SubscriptionId, OnlineCallback)>>,
}

/// Tracks whether the remote is reachable and notifies subscribers when
/// connectivity comes back.
///
/// Callbacks fire once per offline to online transition. Repeated online
/// signals while already online are ignored. Clones share state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the platform's current reachability.
    pub fn new(initially_online: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                online: AtomicBool::new(initially_online),
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Register a callback for offline to online transitions.
    pub fn on_online<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        match self.inner.callbacks.lock() {
            Ok(mut callbacks) => callbacks.push((id, Arc::new(callback))),
            Err(_) => warn!("Connectivity callbacks poisoned; subscription dropped"),
        }
        id
    }

    /// Remove a previously registered callback.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut callbacks) = self.inner.callbacks.lock() {
            callbacks.retain(|(sub, _)| *sub != id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.callbacks.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Mark the network as reachable.
    pub fn go_online(&self) {
        if self.inner.online.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Back online");
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let callbacks: Vec<OnlineCallback> = match self.inner.callbacks.lock() {
            Ok(callbacks) => callbacks.iter().map(|(_, cb)| cb.clone()).collect(),
            Err(_) => {
                warn!("Connectivity callbacks poisoned; online transition not delivered");
                return;
            }
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Mark the network as unreachable.
    pub fn go_offline(&self) {
        if self.inner.online.swap(false, Ordering::SeqCst) {
            info!("Gone offline");
        }
    }

    pub fn set_online(&self, online: bool) {
        if online {
            self.go_online();
        } else {
            self.go_offline();
        }
    }

    /// Probe the remote once and record the result.
    pub async fn check(&self, transport: &dyn SyncTransport) -> bool {
        let reachable = match transport.probe().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Connectivity probe to {} failed: {}", transport.endpoint(), e);
                false
            }
        };
        self.set_online(reachable);
        reachable
    }

    /// Probe the remote every `every` until the returned task is aborted.
    ///
    /// Stands in for platform online/offline events.
    pub fn spawn_probe_loop(
        &self,
        transport: Arc<dyn SyncTransport>,
        every: Duration,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.check(transport.as_ref()).await;
            }
        })
    }
}
