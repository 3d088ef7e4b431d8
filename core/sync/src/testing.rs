//! Test doubles shared by the unit tests of this crate.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use healthsync_common::{
    ActivityRecord, Error, Result, SleepRecord, SleepScore, SyncPayload, SyncTrigger,
};

use crate::source::HealthDataSource;
use crate::transport::{PushReceipt, RemoteLogEntry, SyncTransport};

/// Deterministic payload with the given step count.
pub fn sample_payload(trigger: SyncTrigger, steps: u32) -> SyncPayload {
    let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    SyncPayload {
        sync_type: trigger.sync_type(),
        activity_records: vec![ActivityRecord {
            date,
            steps,
            calories_burned: 400,
            distance_meters: steps * 7 / 10,
            active_minutes: 80,
            source: "test".to_string(),
        }],
        sleep_records: vec![SleepRecord {
            date: date.pred_opt().unwrap(),
            duration_minutes: 420,
            sleep_score: SleepScore::new(90).unwrap(),
            source: "test".to_string(),
        }],
        device_info: "test device".to_string(),
        triggered_by: trigger.triggered_by(),
    }
}

/// Error that can be replayed any number of times.
#[derive(Debug, Clone)]
enum Failure {
    Transport(String),
    Rejected(u16, String),
    Other(String),
}

impl Failure {
    fn from_error(err: Error) -> Self {
        match err {
            Error::Transport(msg) => Failure::Transport(msg),
            Error::RemoteRejected { status, body } => Failure::Rejected(status, body),
            other => Failure::Other(other.to_string()),
        }
    }

    fn to_error(&self) -> Error {
        match self {
            Failure::Transport(msg) => Error::Transport(msg.clone()),
            Failure::Rejected(status, body) => Error::rejected(*status, body.clone()),
            Failure::Other(msg) => Error::Serialization(msg.clone()),
        }
    }
}

#[derive(Default)]
struct Script {
    push_failure: Option<Failure>,
    records_synced: Option<u64>,
    probe_failure: Option<Failure>,
    logs: Vec<RemoteLogEntry>,
    logs_failure: Option<Failure>,
    push_delay: Duration,
    pushed: Vec<SyncPayload>,
}

/// Transport whose answers are set by the test.
///
/// By default every push succeeds and reports the payload's record count.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed_with(&self, records_synced: u64) {
        let mut script = self.script.lock().unwrap();
        script.push_failure = None;
        script.records_synced = Some(records_synced);
    }

    pub fn fail_with(&self, err: Error) {
        self.script.lock().unwrap().push_failure = Some(Failure::from_error(err));
    }

    pub fn fail_probe_with(&self, err: Error) {
        self.script.lock().unwrap().probe_failure = Some(Failure::from_error(err));
    }

    pub fn set_remote_logs(&self, logs: Vec<RemoteLogEntry>) {
        self.script.lock().unwrap().logs = logs;
    }

    pub fn fail_logs_with(&self, err: Error) {
        self.script.lock().unwrap().logs_failure = Some(Failure::from_error(err));
    }

    pub fn set_push_delay(&self, delay: Duration) {
        self.script.lock().unwrap().push_delay = delay;
    }

    /// Payloads received so far, in order.
    pub fn pushed(&self) -> Vec<SyncPayload> {
        self.script.lock().unwrap().pushed.clone()
    }

    pub fn push_count(&self) -> usize {
        self.script.lock().unwrap().pushed.len()
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    fn endpoint(&self) -> &str {
        "scripted://test"
    }

    async fn probe(&self) -> Result<()> {
        match &self.script.lock().unwrap().probe_failure {
            Some(f) => Err(f.to_error()),
            None => Ok(()),
        }
    }

    async fn push(&self, payload: &SyncPayload) -> Result<PushReceipt> {
        let delay = {
            let mut script = self.script.lock().unwrap();
            script.pushed.push(payload.clone());
            script.push_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let script = self.script.lock().unwrap();
        match &script.push_failure {
            Some(f) => Err(f.to_error()),
            None => Ok(PushReceipt {
                records_synced: script
                    .records_synced
                    .unwrap_or(payload.record_count() as u64),
            }),
        }
    }

    async fn fetch_logs(&self, limit: usize) -> Result<Vec<RemoteLogEntry>> {
        let script = self.script.lock().unwrap();
        match &script.logs_failure {
            Some(f) => Err(f.to_error()),
            None => Ok(script.logs.iter().take(limit).cloned().collect()),
        }
    }
}

/// Source returning a fixed step count, or failing on demand.
#[derive(Default)]
pub struct FixedSource {
    steps: AtomicUsize,
    fail: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FixedSource {
    pub fn new(steps: u32) -> Self {
        Self {
            steps: AtomicUsize::new(steps as usize),
            ..Default::default()
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.fail.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthDataSource for FixedSource {
    async fn collect(&self, trigger: SyncTrigger) -> Result<SyncPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.fail.lock().unwrap().clone() {
            return Err(Error::DataSource(msg));
        }
        Ok(sample_payload(
            trigger,
            self.steps.load(Ordering::SeqCst) as u32,
        ))
    }
}
