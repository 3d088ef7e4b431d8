//! Health Sync Agent
//!
//! Store-and-forward synchronization of health readings, including:
//! - Manual, periodic and reconnect-triggered sync attempts
//! - A single pending payload kept across failures
//! - A bounded sync history merged with the server's
//! - A background context sharing only the persistent store

pub mod agent;
pub mod background;
pub mod config;
pub mod connectivity;
pub mod log;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use agent::{FailureKind, SyncAgent, SyncEvent, SyncResult, SyncStatus};
pub use background::{BackgroundRunner, BackgroundSignal, SyncNotification};
pub use config::AgentConfig;
pub use connectivity::{ConnectivityMonitor, SubscriptionId};
pub use log::SyncLogStore;
pub use scheduler::{SchedulePolicy, ScheduleCoordinator};
pub use source::{HealthDataSource, RandomHealthSource};
pub use state::AgentState;
pub use transport::{HttpTransport, PushReceipt, RemoteLogEntry, SyncTransport};
