//! Common utilities and types shared across the health sync agent.
//!
//! This module provides the error taxonomy and the data model exchanged
//! between the data source, the persistent store and the remote endpoint.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    ActivityRecord, ActivitySummary, ApiKey, Settings, SleepRecord, SleepScore, SyncLogEntry,
    SyncOutcome, SyncPayload, SyncTrigger, SyncType, TriggeredBy,
};
