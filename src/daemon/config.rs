use std::{ops::RangeInclusive, path::Path, time::Duration};

use chrono::NaiveTime;
use serde::Deserialize;
use toml::{Table, Value};
use tracing::{debug, warn};

use super::report::scheduler::{ReportMode, MIN_INTERVAL};

pub const CONFIG_FILE: &str = "config.toml";

const DAY_SECS: u64 = 24 * 60 * 60;
const MAX_CHUNK_HOURS: u64 = 24;
const MAX_RETENTION_DAYS: u32 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportModeKind {
    Interval,
    TimeOfDay,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub enabled: bool,
    pub mode: ReportModeKind,
    pub interval: Duration,
    pub daily_time: NaiveTime,
    pub early_send: Duration,
    pub late_grace: Duration,
}

impl ReportConfig {
    pub fn mode(&self) -> ReportMode {
        let to_chrono = |d: Duration| chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero());
        match self.mode {
            ReportModeKind::Interval => ReportMode::interval(to_chrono(self.interval)),
            ReportModeKind::TimeOfDay => ReportMode::TimeOfDay {
                target: self.daily_time,
                early: to_chrono(self.early_send),
                grace: to_chrono(self.late_grace),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionsConfig {
    pub chunk: chrono::Duration,
    /// Consecutive failures of the marker source before it's switched off.
    pub source_failure_limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub dated_backups: bool,
    pub retention_days: u32,
    pub missed_report_days_back: u32,
    pub missed_report_recovery: bool,
}

/// Everything tunable about the daemon. Passed down explicitly, never global.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub sample_interval: Duration,
    pub coordinator_interval: Duration,
    pub save_interval: Duration,
    pub observation_timeout: Duration,
    pub min_dwell: chrono::Duration,
    pub report: ReportConfig,
    pub sessions: SessionsConfig,
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            coordinator_interval: Duration::from_secs(60),
            save_interval: Duration::from_secs(60),
            observation_timeout: Duration::from_millis(2000),
            min_dwell: chrono::Duration::milliseconds(1000),
            report: ReportConfig {
                enabled: true,
                mode: ReportModeKind::Interval,
                interval: Duration::from_secs(180),
                daily_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
                early_send: Duration::from_secs(5 * 60),
                late_grace: Duration::from_secs(5 * 60),
            },
            sessions: SessionsConfig {
                chunk: chrono::Duration::hours(4),
                source_failure_limit: 3,
            },
            storage: StorageConfig {
                dated_backups: true,
                retention_days: 30,
                missed_report_days_back: 3,
                missed_report_recovery: false,
            },
        }
    }
}

/// Reads one field of a table, keeping `current` when the field is missing or invalid.
struct Fields<'a> {
    table: &'a Table,
    section: &'a str,
}

impl<'a> Fields<'a> {
    fn section(table: &'a Table, name: &'a str) -> Option<Self> {
        match table.get(name) {
            Some(Value::Table(table)) => Some(Self {
                table,
                section: name,
            }),
            Some(other) => {
                warn!("Config section [{name}] is a {}, ignoring it", other.type_str());
                None
            }
            None => None,
        }
    }

    fn read<T>(&self, key: &str, current: &mut T, parse: impl FnOnce(&Value) -> Option<T>) {
        let Some(value) = self.table.get(key) else {
            return;
        };
        match parse(value) {
            Some(v) => *current = v,
            None => warn!(
                "Invalid config value {}{key} = {value}, keeping the default",
                if self.section.is_empty() {
                    String::new()
                } else {
                    format!("{}.", self.section)
                }
            ),
        }
    }

    fn integer(&self, key: &str, current: &mut u64, range: RangeInclusive<u64>) {
        self.read(key, current, |v| {
            v.as_integer()
                .and_then(|v| u64::try_from(v).ok())
                .filter(|v| range.contains(v))
        })
    }

    /// Whole seconds, at most a day.
    fn seconds(&self, key: &str, current: &mut Duration, min: u64) {
        let mut secs = current.as_secs();
        self.integer(key, &mut secs, min..=DAY_SECS);
        *current = Duration::from_secs(secs);
    }

    fn millis(&self, key: &str, current: &mut u64, min: u64) {
        self.integer(key, current, min..=DAY_SECS * 1000)
    }

    fn minutes(&self, key: &str, current: &mut Duration) {
        let mut minutes = current.as_secs() / 60;
        self.integer(key, &mut minutes, 0..=DAY_SECS / 60);
        *current = Duration::from_secs(minutes * 60);
    }

    fn count(&self, key: &str, current: &mut u32, range: RangeInclusive<u32>) {
        self.read(key, current, |v| {
            v.as_integer()
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| range.contains(v))
        })
    }

    fn flag(&self, key: &str, current: &mut bool) {
        self.read(key, current, Value::as_bool)
    }
}

pub fn parse_daily_time(text: &str) -> Option<NaiveTime> {
    let (hours, minutes) = text.trim().split_once(':')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    NaiveTime::from_hms_opt(hours.parse().ok()?, minutes.parse().ok()?, 0)
}

impl EngineConfig {
    /// Applies every valid field of `text` on top of the defaults.
    pub fn from_toml(text: &str) -> Self {
        let mut config = Self::default();
        let table = match text.parse::<Table>() {
            Ok(table) => table,
            Err(e) => {
                warn!("Config can't be parsed, using defaults: {e}");
                return config;
            }
        };

        let root = Fields {
            table: &table,
            section: "",
        };
        root.seconds("sample_interval_secs", &mut config.sample_interval, 1);
        root.seconds("coordinator_interval_secs", &mut config.coordinator_interval, 10);
        root.seconds("save_interval_secs", &mut config.save_interval, 1);

        let mut timeout = config.observation_timeout.as_millis() as u64;
        root.millis("observation_timeout_ms", &mut timeout, 1);
        config.observation_timeout = Duration::from_millis(timeout);

        let mut min_dwell = config.min_dwell.num_milliseconds() as u64;
        root.millis("min_dwell_ms", &mut min_dwell, 0);
        if let Some(dwell) = i64::try_from(min_dwell)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
        {
            config.min_dwell = dwell;
        }

        if let Some(report) = Fields::section(&table, "report") {
            let r = &mut config.report;
            report.flag("enabled", &mut r.enabled);
            report.read("mode", &mut r.mode, |v| {
                v.as_str()
                    .and_then(|s| ReportModeKind::deserialize(Value::String(s.into())).ok())
            });
            report.seconds("interval_secs", &mut r.interval, MIN_INTERVAL.num_seconds() as u64);
            report.read("daily_time", &mut r.daily_time, |v| {
                v.as_str().and_then(parse_daily_time)
            });
            report.minutes("early_send_minutes", &mut r.early_send);
            report.minutes("late_grace_minutes", &mut r.late_grace);
        }

        if let Some(sessions) = Fields::section(&table, "sessions") {
            let mut hours = config.sessions.chunk.num_hours() as u64;
            sessions.integer("chunk_hours", &mut hours, 1..=MAX_CHUNK_HOURS);
            if let Some(chunk) = i64::try_from(hours).ok().and_then(chrono::Duration::try_hours) {
                config.sessions.chunk = chunk;
            }
            sessions.count(
                "source_failure_limit",
                &mut config.sessions.source_failure_limit,
                1..=u32::MAX,
            );
        }

        if let Some(storage) = Fields::section(&table, "storage") {
            let s = &mut config.storage;
            storage.flag("dated_backups", &mut s.dated_backups);
            storage.count("retention_days", &mut s.retention_days, 1..=MAX_RETENTION_DAYS);
            storage.count(
                "missed_report_days_back",
                &mut s.missed_report_days_back,
                0..=MAX_RETENTION_DAYS,
            );
            storage.flag("missed_report_recovery", &mut s.missed_report_recovery);
        }

        config
    }

    /// Loads `<app_dir>/config.toml`. A missing or unreadable file means defaults.
    pub fn load(app_dir: &Path) -> Self {
        let path = app_dir.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {path:?}, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!("Couldn't read config {path:?}, using defaults: {e}");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveTime;
    use tempfile::tempdir;

    use crate::daemon::report::scheduler::ReportMode;

    use super::{parse_daily_time, EngineConfig, ReportModeKind};

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        assert_eq!(EngineConfig::load(dir.path()), EngineConfig::default());
    }

    #[test]
    fn garbage_gives_defaults() {
        assert_eq!(EngineConfig::from_toml("this is = = not toml"), EngineConfig::default());
    }

    #[test]
    fn valid_fields_apply() {
        let config = EngineConfig::from_toml(
            r#"
            sample_interval_secs = 2
            min_dwell_ms = 500

            [report]
            mode = "time_of_day"
            daily_time = "17:30"
            early_send_minutes = 10

            [storage]
            retention_days = 7
            missed_report_recovery = true
            "#,
        );
        assert_eq!(config.sample_interval, Duration::from_secs(2));
        assert_eq!(config.min_dwell, chrono::Duration::milliseconds(500));
        assert_eq!(config.report.mode, ReportModeKind::TimeOfDay);
        assert_eq!(
            config.report.mode(),
            ReportMode::TimeOfDay {
                target: NaiveTime::from_hms_opt(17, 30, 0).unwrap(),
                early: chrono::Duration::minutes(10),
                grace: chrono::Duration::minutes(5),
            }
        );
        assert_eq!(config.storage.retention_days, 7);
        assert!(config.storage.missed_report_recovery);
    }

    #[test]
    fn invalid_fields_fall_back_individually() {
        let config = EngineConfig::from_toml(
            r#"
            sample_interval_secs = 0
            coordinator_interval_secs = "often"
            save_interval_secs = 30

            [report]
            mode = "hourly"
            interval_secs = 5
            daily_time = "6pm"

            [sessions]
            chunk_hours = -1
            "#,
        );
        let defaults = EngineConfig::default();
        assert_eq!(config.sample_interval, defaults.sample_interval);
        assert_eq!(config.coordinator_interval, defaults.coordinator_interval);
        assert_eq!(config.save_interval, Duration::from_secs(30));
        assert_eq!(config.report.mode, ReportModeKind::Interval);
        assert_eq!(config.report.interval, defaults.report.interval);
        assert_eq!(config.report.daily_time, defaults.report.daily_time);
        assert_eq!(config.sessions.chunk, defaults.sessions.chunk);
    }

    #[test]
    fn out_of_range_values_keep_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            sample_interval_secs = 9000000000000
            coordinator_interval_secs = 86401
            save_interval_secs = 9223372036854775807
            observation_timeout_ms = 86400001
            min_dwell_ms = 9223372036854775807

            [report]
            interval_secs = 9000000000000
            late_grace_minutes = 9000000000000

            [sessions]
            chunk_hours = 9000000000000

            [storage]
            retention_days = 4000000000
            "#,
        );
        let defaults = EngineConfig::default();
        assert_eq!(config.sample_interval, defaults.sample_interval);
        assert_eq!(config.coordinator_interval, defaults.coordinator_interval);
        assert_eq!(config.save_interval, defaults.save_interval);
        assert_eq!(config.observation_timeout, defaults.observation_timeout);
        assert_eq!(config.min_dwell, defaults.min_dwell);
        assert_eq!(config.report.interval, defaults.report.interval);
        assert_eq!(config.report.late_grace, defaults.report.late_grace);
        assert_eq!(config.sessions.chunk, defaults.sessions.chunk);
        assert_eq!(config.storage.retention_days, defaults.storage.retention_days);
    }

    #[test]
    fn upper_bounds_are_inclusive() {
        let config = EngineConfig::from_toml(
            r#"
            sample_interval_secs = 86400

            [sessions]
            chunk_hours = 24
            "#,
        );
        assert_eq!(config.sample_interval, Duration::from_secs(86400));
        assert_eq!(config.sessions.chunk, chrono::Duration::hours(24));
    }

    #[test]
    fn daily_time_must_be_hh_mm() {
        assert_eq!(parse_daily_time("09:05"), NaiveTime::from_hms_opt(9, 5, 0));
        assert_eq!(parse_daily_time("9:05"), NaiveTime::from_hms_opt(9, 5, 0));
        assert_eq!(parse_daily_time("24:00"), None);
        assert_eq!(parse_daily_time("18:0"), None);
        assert_eq!(parse_daily_time("18"), None);
    }
}
