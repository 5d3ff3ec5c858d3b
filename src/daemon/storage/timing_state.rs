use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, error, warn};

use crate::{
    fs::operations::{quarantine, read_if_exists, write_replacing},
    utils::clock::Clock,
};

use super::entities::TimingStateEntity;

/// How long delivered dates are remembered.
pub const SENT_DATES_KEPT_DAYS: i64 = 30;

impl TimingStateEntity {
    /// A delivery made now for today's report.
    /// A scheduled send at `at`, on behalf of `date`.
    pub fn record_send(&mut self, at: DateTime<Utc>, date: NaiveDate) {
        self.last_send = Some(at);
        self.last_daily_send_date = Some(date);
        self.record_delivered(date, date);
    }

    /// A delivery for some earlier `date`, e.g. a recovered report. Doesn't touch the schedule.
    pub fn record_delivered(&mut self, date: NaiveDate, today: NaiveDate) {
        self.sent_dates.insert(date);
        let oldest = today - Duration::days(SENT_DATES_KEPT_DAYS);
        self.sent_dates.retain(|d| *d >= oldest);
    }

    pub fn was_sent(&self, date: NaiveDate) -> bool {
        self.sent_dates.contains(&date)
    }

    /// Previous days within `days_back` that never got a report, oldest first.
    pub fn unsent_recent_dates(&self, today: NaiveDate, days_back: u32) -> Vec<NaiveDate> {
        (1..=i64::from(days_back))
            .rev()
            .map(|back| today - Duration::days(back))
            .filter(|date| !self.was_sent(*date))
            .collect()
    }
}

/// Keeps [TimingStateEntity] in a single small JSON file.
pub struct TimingStateStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl TimingStateStore {
    pub fn new(path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self { path, clock }
    }

    /// Missing or corrupted state means nothing was ever sent.
    pub async fn load(&self) -> TimingStateEntity {
        let bytes = match read_if_exists(&self.path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("No timing state yet");
                return TimingStateEntity::default();
            }
            Err(e) => {
                warn!("Couldn't read timing state {:?}: {e}", self.path);
                return TimingStateEntity::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!("Timing state is corrupted: {e}");
                if let Err(e) = quarantine(&self.path, self.clock.time().timestamp()).await {
                    error!("Failed to quarantine {:?}: {e}", self.path);
                }
                TimingStateEntity::default()
            }
        }
    }

    pub async fn save(&self, state: &TimingStateEntity) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        write_replacing(&self.path, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::{NaiveDate, NaiveDateTime};
    use tempfile::tempdir;

    use crate::{daemon::storage::entities::TimingStateEntity, utils::clock::ManualClock};

    use super::TimingStateStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn noon(d: u32) -> NaiveDateTime {
        day(d).and_hms_opt(12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn state_survives_a_restart() -> Result<()> {
        let dir = tempdir()?;
        let clock = Arc::new(ManualClock::new(noon(10)));
        let store = TimingStateStore::new(dir.path().join("timing_state.json"), clock);

        let mut state = store.load().await;
        assert_eq!(state, TimingStateEntity::default());
        state.record_send(noon(10).and_utc(), day(10));
        store.save(&state).await?;

        let loaded = store.load().await;
        assert_eq!(loaded.last_daily_send_date, Some(day(10)));
        assert_eq!(loaded.last_send, Some(noon(10).and_utc()));
        assert!(loaded.was_sent(day(10)));
        Ok(())
    }

    #[tokio::test]
    async fn corrupted_state_starts_over() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("timing_state.json");
        std::fs::write(&path, "last_send = yesterday")?;
        let store = TimingStateStore::new(path.clone(), Arc::new(ManualClock::new(noon(10))));

        assert_eq!(store.load().await, TimingStateEntity::default());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn unsent_dates_skip_delivered_ones() {
        let mut state = TimingStateEntity::default();
        state.record_delivered(day(8), day(10));

        assert_eq!(state.unsent_recent_dates(day(10), 3), vec![day(7), day(9)]);
        assert!(state.unsent_recent_dates(day(10), 0).is_empty());
    }

    #[test]
    fn old_sent_dates_are_forgotten() {
        let mut state = TimingStateEntity::default();
        let april = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        state.record_delivered(april, april);
        assert!(state.was_sent(april));
        state.record_send(noon(10).and_utc(), day(10));

        assert_eq!(state.sent_dates.len(), 1);
        assert_eq!(state.last_daily_send_date, Some(day(10)));
    }
}
