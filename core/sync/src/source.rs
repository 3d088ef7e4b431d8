//! Health data sources.

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};

use healthsync_common::{
    ActivityRecord, Result, SleepRecord, SleepScore, SyncPayload, SyncTrigger,
};

/// Source label for foreground payloads.
pub const APP_SOURCE: &str = "health_sync_app";
/// Source label for payloads built by the background runner.
pub const BACKGROUND_SOURCE: &str = "background_sync";

/// Supplier of health readings.
///
/// Implementations build a fresh payload for every sync attempt.
#[async_trait]
pub trait HealthDataSource: Send + Sync {
    /// Collect the current readings.
    ///
    /// # Errors
    /// - `Error::DataSource` when readings are unavailable
    async fn collect(&self, trigger: SyncTrigger) -> Result<SyncPayload>;
}

/// Placeholder source producing plausible random readings.
///
/// Stands in for a real health platform integration.
pub struct RandomHealthSource {
    source: String,
    device_info: String,
}

impl RandomHealthSource {
    pub fn new(device_info: impl Into<String>) -> Self {
        Self {
            source: APP_SOURCE.to_string(),
            device_info: device_info.into(),
        }
    }

    /// Flavor used by the background runner.
    pub fn background(device_info: impl Into<String>) -> Self {
        Self {
            source: BACKGROUND_SOURCE.to_string(),
            device_info: device_info.into(),
        }
    }

    /// Build a payload for `today` from the given readings.
    fn build(
        &self,
        trigger: SyncTrigger,
        today: NaiveDate,
        steps: u32,
        calories: u32,
        sleep_minutes: u32,
        sleep_score: u8,
    ) -> Result<SyncPayload> {
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);

        Ok(SyncPayload {
            sync_type: trigger.sync_type(),
            activity_records: vec![ActivityRecord {
                date: today,
                steps,
                calories_burned: calories,
                // Stride of roughly 0.7 m.
                distance_meters: steps * 7 / 10,
                active_minutes: calories / 5,
                source: self.source.clone(),
            }],
            sleep_records: vec![SleepRecord {
                date: yesterday,
                duration_minutes: sleep_minutes,
                sleep_score: SleepScore::new(sleep_score)?,
                source: self.source.clone(),
            }],
            device_info: self.device_info.clone(),
            triggered_by: trigger.triggered_by(),
        })
    }
}

/// Uniform integer in `low..low + span`.
fn random_in(low: u32, span: u32) -> u32 {
    rand::random_range(low..low + span)
}

#[async_trait]
impl HealthDataSource for RandomHealthSource {
    async fn collect(&self, trigger: SyncTrigger) -> Result<SyncPayload> {
        let steps = random_in(5000, 7000);
        let calories = random_in(250, 350);
        let sleep_minutes = random_in(360, 180);
        let sleep_score = random_in(80, 20) as u8;

        self.build(
            trigger,
            Utc::now().date_naive(),
            steps,
            calories,
            sleep_minutes,
            sleep_score,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthsync_common::{SyncType, TriggeredBy};

    #[tokio::test]
    async fn test_random_ranges() {
        let source = RandomHealthSource::new("test");

        for _ in 0..200 {
            let payload = source.collect(SyncTrigger::Manual).await.unwrap();
            let activity = &payload.activity_records[0];
            let sleep = &payload.sleep_records[0];

            assert!((5000..12000).contains(&activity.steps));
            assert!((250..600).contains(&activity.calories_burned));
            assert_eq!(activity.distance_meters, activity.steps * 7 / 10);
            assert_eq!(activity.active_minutes, activity.calories_burned / 5);
            assert!((360..540).contains(&sleep.duration_minutes));
            assert!((80..100).contains(&sleep.sleep_score.value()));
        }
    }

    #[tokio::test]
    async fn test_payload_reflects_trigger() {
        let source = RandomHealthSource::new("device");

        let manual = source.collect(SyncTrigger::Manual).await.unwrap();
        assert_eq!(manual.sync_type, SyncType::Full);
        assert_eq!(manual.triggered_by, TriggeredBy::Manual);
        assert_eq!(manual.device_info, "device");

        let periodic = source.collect(SyncTrigger::Periodic).await.unwrap();
        assert_eq!(periodic.sync_type, SyncType::Auto);
        assert_eq!(periodic.triggered_by, TriggeredBy::Periodic);
    }

    #[tokio::test]
    async fn test_background_flavor_labels_source() {
        let source = RandomHealthSource::background("bg");
        let payload = source.collect(SyncTrigger::Auto).await.unwrap();

        assert_eq!(payload.activity_records[0].source, BACKGROUND_SOURCE);
        assert_eq!(payload.sleep_records[0].source, BACKGROUND_SOURCE);
    }

    #[test]
    fn test_sleep_dated_day_before() {
        let source = RandomHealthSource::new("d");
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let payload = source
            .build(SyncTrigger::Manual, today, 6000, 300, 420, 90)
            .unwrap();

        assert_eq!(payload.activity_records[0].date, today);
        assert_eq!(
            payload.sleep_records[0].date,
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }
}
