//! Data model shared by the sync agent, the store and the wire.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Kind of sync requested from the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Full,
    Auto,
}

/// What caused the payload to be produced, as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Manual,
    Periodic,
    Background,
}

/// Trigger passed to a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    /// User asked for a sync.
    Manual,
    /// Interval timer fired.
    Periodic,
    /// Platform-driven automatic sync.
    Auto,
    /// Recovery attempt after connectivity came back.
    Retry,
}

impl SyncTrigger {
    /// Sync type reported for payloads built under this trigger.
    pub fn sync_type(self) -> SyncType {
        match self {
            SyncTrigger::Manual | SyncTrigger::Retry => SyncType::Full,
            SyncTrigger::Periodic | SyncTrigger::Auto => SyncType::Auto,
        }
    }

    /// Wire `triggered_by` value for this trigger.
    pub fn triggered_by(self) -> TriggeredBy {
        match self {
            SyncTrigger::Manual => TriggeredBy::Manual,
            SyncTrigger::Periodic | SyncTrigger::Auto => TriggeredBy::Periodic,
            SyncTrigger::Retry => TriggeredBy::Background,
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Periodic => "periodic",
            SyncTrigger::Auto => "auto",
            SyncTrigger::Retry => "retry",
        };
        f.write_str(name)
    }
}

/// One day of activity as reported by the data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub date: NaiveDate,
    pub steps: u32,
    pub calories_burned: u32,
    #[serde(rename = "distance_m", default)]
    pub distance_meters: u32,
    #[serde(default)]
    pub active_minutes: u32,
    pub source: String,
}

/// Sleep quality score, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SleepScore(u8);

impl SleepScore {
    pub const MAX: u8 = 100;

    /// Create a score, rejecting values above 100.
    pub fn new(value: u8) -> crate::Result<Self> {
        if value > Self::MAX {
            return Err(crate::Error::InvalidInput(format!(
                "sleep score {} exceeds {}",
                value,
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SleepScore {
    type Error = crate::Error;

    fn try_from(value: u8) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<SleepScore> for u8 {
    fn from(score: SleepScore) -> u8 {
        score.0
    }
}

/// One night of sleep as reported by the data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepRecord {
    pub date: NaiveDate,
    #[serde(rename = "sleep_duration_minutes")]
    pub duration_minutes: u32,
    pub sleep_score: SleepScore,
    pub source: String,
}

/// A record produced for transmission to the remote endpoint.
///
/// Payloads are built once by the data source and then only moved or
/// borrowed; nothing mutates them after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub sync_type: SyncType,
    #[serde(rename = "activity_data", default)]
    pub activity_records: Vec<ActivityRecord>,
    #[serde(rename = "sleep_data", default)]
    pub sleep_records: Vec<SleepRecord>,
    pub device_info: String,
    pub triggered_by: TriggeredBy,
}

impl SyncPayload {
    /// Total number of records carried by this payload.
    pub fn record_count(&self) -> usize {
        self.activity_records.len() + self.sleep_records.len()
    }

    /// Serialize to the JSON wire body.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON wire body.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Headline numbers from a payload, for display.
///
/// Each figure is absent when the payload carried no record of that kind.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActivitySummary {
    pub steps: Option<u32>,
    pub calories: Option<u32>,
    pub sleep_hours: Option<f64>,
}

impl ActivitySummary {
    pub fn from_payload(payload: &SyncPayload) -> Self {
        let activity = payload.activity_records.first();
        let sleep = payload.sleep_records.first();

        Self {
            steps: activity.map(|a| a.steps),
            calories: activity.map(|a| a.calories_burned),
            // Hours rounded to one decimal.
            sleep_hours: sleep.map(|s| (s.duration_minutes as f64 / 6.0).round() / 10.0),
        }
    }
}

/// Outcome recorded in the sync log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Success,
    Error,
}

/// A single entry of the sync history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub outcome: SyncOutcome,
    pub message: String,
}

impl SyncLogEntry {
    pub fn new(timestamp: DateTime<Utc>, outcome: SyncOutcome, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            outcome,
            message: message.into(),
        }
    }

    /// Success entry stamped now.
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Utc::now(), SyncOutcome::Success, message)
    }

    /// Error entry stamped now.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Utc::now(), SyncOutcome::Error, message)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == SyncOutcome::Success
    }
}

/// User-controlled settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub auto_sync_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_sync_enabled: true,
        }
    }
}

/// Static API credential, wiped from memory on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey([REDACTED; {} chars])", self.0.len())
    }
}
