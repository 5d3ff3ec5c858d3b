use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Time map as it sits on disk. Entries are validated one at a time when loaded, so a single bad
/// value doesn't take the rest of the file with it.
pub type RawTimes = BTreeMap<String, Value>;

/// Current or dated foreground record.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct ForegroundRecordEntity {
    pub date: NaiveDate,
    #[serde(default)]
    pub times: RawTimes,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_subjects: usize,
    #[serde(default)]
    pub total_secs: u64,
}

/// Current or dated background media record.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct BackgroundRecordEntity {
    pub date: NaiveDate,
    #[serde(default)]
    pub visible: RawTimes,
    #[serde(default)]
    pub playing: RawTimes,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_sites: usize,
    #[serde(default)]
    pub total_visible_secs: u64,
    #[serde(default)]
    pub total_playing_secs: u64,
}

/// Everything that has to survive a restart for report timing.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Default)]
pub struct TimingStateEntity {
    /// Last successful delivery, any mode.
    #[serde(default)]
    pub last_send: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_daily_send_date: Option<NaiveDate>,
    /// Dates a report was delivered for.
    #[serde(default)]
    pub sent_dates: BTreeSet<NaiveDate>,
}

pub fn to_raw_times<K: ToString>(times: &BTreeMap<K, u64>) -> RawTimes {
    times
        .iter()
        .map(|(key, seconds)| (key.to_string(), Value::from(*seconds)))
        .collect()
}

/// Accepts non negative numbers and numeric strings. Returns the valid entries and how many were
/// skipped.
pub fn validated_times(raw: &RawTimes, what: &str) -> (BTreeMap<String, f64>, usize) {
    let mut times = BTreeMap::new();
    let mut skipped = 0;
    for (key, value) in raw {
        let seconds = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match seconds {
            Some(seconds) if seconds.is_finite() && seconds >= 0. => {
                times.insert(key.clone(), seconds);
            }
            _ => {
                warn!("Skipping invalid {what} entry {key:?}: {value}");
                skipped += 1;
            }
        }
    }
    (times, skipped)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{to_raw_times, validated_times, ForegroundRecordEntity, RawTimes};

    #[test]
    fn bad_entries_are_skipped_individually() {
        let raw: RawTimes = serde_json::from_value(json!({
            "code.exe - a": 12,
            "vlc.exe - b": "7.5",
            "broken": "abc",
            "negative": -3,
            "nested": { "x": 1 },
        }))
        .unwrap();

        let (times, skipped) = validated_times(&raw, "foreground");

        assert_eq!(
            times,
            BTreeMap::from([("code.exe - a".to_string(), 12.), ("vlc.exe - b".to_string(), 7.5)])
        );
        assert_eq!(skipped, 3);
    }

    #[test]
    fn record_without_optional_fields_parses() {
        let entity: ForegroundRecordEntity =
            serde_json::from_str(r#"{"date":"2025-06-01","times":{"a":1}}"#).unwrap();
        assert_eq!(entity.total_subjects, 0);
        assert_eq!(entity.last_updated, None);
        assert_eq!(to_raw_times(&BTreeMap::from([("a", 1u64)])), entity.times);
    }
}
