use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    daemon::collection::{
        background::{BackgroundAccumulator, BackgroundTotals, Site},
        foreground::ForegroundAccumulator,
        subject::Subject,
        whole_seconds_f64,
    },
    fs::operations::{quarantine, read_if_exists, write_replacing},
    utils::{
        clock::Clock,
        time::{date_to_record_name, record_name_to_date},
    },
};

use super::entities::{
    to_raw_times, validated_times, BackgroundRecordEntity, ForegroundRecordEntity, RawTimes,
};

const CURRENT_DIR: &str = "current";
const DAILY_DIR: &str = "daily";
const FOREGROUND: &str = "foreground";
const BACKGROUND: &str = "background";

/// Totals of one calendar day as read back from disk.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotRecord {
    pub date: NaiveDate,
    pub foreground: BTreeMap<Subject, f64>,
    pub visible: BTreeMap<Site, f64>,
    pub playing: BTreeMap<Site, f64>,
}

impl SnapshotRecord {
    pub fn foreground_secs(&self) -> BTreeMap<Subject, u64> {
        self.foreground
            .iter()
            .map(|(subject, seconds)| (subject.clone(), whole_seconds_f64(*seconds)))
            .collect()
    }

    pub fn background_totals(&self) -> BackgroundTotals {
        let rounded = |map: &BTreeMap<Site, f64>| -> BTreeMap<Site, u64> {
            map.iter()
                .map(|(site, seconds)| (site.clone(), whole_seconds_f64(*seconds)))
                .collect()
        };
        BackgroundTotals {
            visible: rounded(&self.visible),
            playing: rounded(&self.playing),
        }
    }
}

/// What [SnapshotStore::load_into] put back into the accumulators.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestoreReport {
    pub foreground_restored: bool,
    pub background_restored: bool,
    pub subjects: usize,
    pub foreground_secs: f64,
    pub sites: usize,
    pub visible_secs: f64,
    pub playing_secs: f64,
    /// Entries dropped because their value wasn't a duration.
    pub skipped_entries: usize,
}

/// Durable copy of the accumulators. Layout under the root:
///  - `current/foreground.json`, `current/background.json` hold the running day.
///  - `daily/<kind>_<YYYY-MM-DD>.json` hold one record per day for history and recovery.
///
/// Every write replaces the whole file. Files that can't be parsed are moved aside and treated as
/// absent.
pub struct SnapshotStore {
    root: PathBuf,
    dated_backups: bool,
    clock: Arc<dyn Clock>,
}

fn dated_name(kind: &str, date: NaiveDate) -> String {
    format!("{kind}_{}.json", date_to_record_name(date))
}

fn dated_name_to_date(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(".json")?;
    let (_, date) = stem.rsplit_once('_')?;
    record_name_to_date(date)
}

/// Age of a quarantined `<file>.corrupted.<unix seconds>`: the date of the record it held, or the
/// moment it was moved aside.
fn quarantined_name_to_date(name: &str) -> Option<NaiveDate> {
    let (original, seconds) = name.rsplit_once(".corrupted.")?;
    dated_name_to_date(original).or_else(|| {
        let seconds = seconds.parse().ok()?;
        DateTime::<Utc>::from_timestamp(seconds, 0).map(|at| at.date_naive())
    })
}

async fn purge_dir(
    dir: &Path,
    cutoff: NaiveDate,
    date_of: impl Fn(&str) -> Option<NaiveDate>,
) -> Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Some(date) = entry.file_name().to_str().and_then(&date_of) else {
            continue;
        };
        if date >= cutoff {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove {:?}: {e}", entry.path()),
        }
    }
    Ok(removed)
}

fn entities(
    date: NaiveDate,
    foreground: &BTreeMap<Subject, u64>,
    background: &BackgroundTotals,
    now: DateTime<Utc>,
) -> (ForegroundRecordEntity, BackgroundRecordEntity) {
    let sites = background
        .visible
        .keys()
        .chain(background.playing.keys())
        .collect::<BTreeSet<_>>();
    (
        ForegroundRecordEntity {
            date,
            times: to_raw_times(foreground),
            last_updated: Some(now),
            total_subjects: foreground.len(),
            total_secs: foreground.values().sum(),
        },
        BackgroundRecordEntity {
            date,
            visible: to_raw_times(&background.visible),
            playing: to_raw_times(&background.playing),
            last_updated: Some(now),
            total_sites: sites.len(),
            total_visible_secs: background.visible.values().sum(),
            total_playing_secs: background.playing.values().sum(),
        },
    )
}

fn foreground_times(entity: &ForegroundRecordEntity) -> (BTreeMap<Subject, f64>, usize) {
    let (times, skipped) = validated_times(&entity.times, "foreground");
    let times = times
        .into_iter()
        .map(|(key, seconds)| (Subject::new(key), seconds))
        .collect();
    (times, skipped)
}

fn site_times(raw: &RawTimes, what: &str) -> (BTreeMap<Site, f64>, usize) {
    let (times, skipped) = validated_times(raw, what);
    let times = times
        .into_iter()
        .map(|(key, seconds)| (Site::new(key), seconds))
        .collect();
    (times, skipped)
}

async fn write_entity<T: Serialize>(path: &Path, entity: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(entity)?;
    write_replacing(path, &bytes).await?;
    Ok(())
}

impl SnapshotStore {
    pub fn new(
        root: PathBuf,
        dated_backups: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(root.join(CURRENT_DIR))?;
        std::fs::create_dir_all(root.join(DAILY_DIR))?;

        Ok(Self {
            root,
            dated_backups,
            clock,
        })
    }

    fn current_path(&self, kind: &str) -> PathBuf {
        self.root.join(CURRENT_DIR).join(format!("{kind}.json"))
    }

    fn dated_path(&self, kind: &str, date: NaiveDate) -> PathBuf {
        self.root.join(DAILY_DIR).join(dated_name(kind, date))
    }

    /// Reads and parses a record. Never fails: missing, unreadable and corrupted files all come
    /// back as `None`, corrupted ones after being quarantined.
    async fn read_entity<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let bytes = match read_if_exists(path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Couldn't read snapshot {path:?}: {e}");
                return None;
            }
        };
        match serde_json::from_slice::<T>(&bytes) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!("Snapshot {path:?} is corrupted: {e}");
                if let Err(e) = quarantine(path, self.clock.time().timestamp()).await {
                    error!("Failed to quarantine {path:?}: {e}");
                }
                None
            }
        }
    }

    /// Writes the running state tagged with today's date, plus today's dated record when dated
    /// backups are on.
    #[instrument(skip_all)]
    pub async fn save(
        &self,
        foreground: &BTreeMap<Subject, u64>,
        background: &BackgroundTotals,
    ) -> Result<()> {
        let date = self.clock.local_time().date();
        let (fg, bg) = entities(date, foreground, background, self.clock.time());

        write_entity(&self.current_path(FOREGROUND), &fg).await?;
        write_entity(&self.current_path(BACKGROUND), &bg).await?;

        if self.dated_backups {
            write_entity(&self.dated_path(FOREGROUND, date), &fg).await?;
            write_entity(&self.dated_path(BACKGROUND, date), &bg).await?;
        }
        debug!(
            "Saved {} subjects and {} sites for {date}",
            fg.total_subjects, bg.total_sites
        );
        Ok(())
    }

    /// Writes only the dated record of `date`. Used to close a finished day.
    pub async fn save_dated(
        &self,
        date: NaiveDate,
        foreground: &BTreeMap<Subject, u64>,
        background: &BackgroundTotals,
    ) -> Result<()> {
        if !self.dated_backups {
            return Ok(());
        }
        let (fg, bg) = entities(date, foreground, background, self.clock.time());
        write_entity(&self.dated_path(FOREGROUND, date), &fg).await?;
        write_entity(&self.dated_path(BACKGROUND, date), &bg).await?;
        Ok(())
    }

    /// Restores today's running state. Records from any other day are left alone.
    #[instrument(skip_all)]
    pub async fn load_into(
        &self,
        foreground: &ForegroundAccumulator,
        background: &BackgroundAccumulator,
    ) -> RestoreReport {
        let today = self.clock.local_time().date();
        let mut report = RestoreReport::default();

        let fg = self
            .read_entity::<ForegroundRecordEntity>(&self.current_path(FOREGROUND))
            .await;
        match fg {
            Some(entity) if entity.date == today => {
                let (times, skipped) = foreground_times(&entity);
                report.subjects = times.len();
                report.foreground_secs = times.values().sum();
                report.skipped_entries += skipped;
                report.foreground_restored = true;
                foreground.restore(times);
            }
            Some(entity) => info!("Foreground snapshot is from {}, starting fresh", entity.date),
            None => debug!("No foreground snapshot"),
        }

        let bg = self
            .read_entity::<BackgroundRecordEntity>(&self.current_path(BACKGROUND))
            .await;
        match bg {
            Some(entity) if entity.date == today => {
                let (visible, skipped_visible) = site_times(&entity.visible, "background");
                let (playing, skipped_playing) = site_times(&entity.playing, "playing");
                report.sites = visible.keys().chain(playing.keys()).collect::<BTreeSet<_>>().len();
                report.visible_secs = visible.values().sum();
                report.playing_secs = playing.values().sum();
                report.skipped_entries += skipped_visible + skipped_playing;
                report.background_restored = true;
                background.restore(visible, playing);
            }
            Some(entity) => info!("Background snapshot is from {}, starting fresh", entity.date),
            None => debug!("No background snapshot"),
        }

        report
    }

    /// The dated record of `date`, if either half of it exists and parses.
    pub async fn load_historical(&self, date: NaiveDate) -> Option<SnapshotRecord> {
        let fg = self
            .read_entity::<ForegroundRecordEntity>(&self.dated_path(FOREGROUND, date))
            .await
            .filter(|e| e.date == date);
        let bg = self
            .read_entity::<BackgroundRecordEntity>(&self.dated_path(BACKGROUND, date))
            .await
            .filter(|e| e.date == date);
        if fg.is_none() && bg.is_none() {
            return None;
        }

        let mut record = SnapshotRecord {
            date,
            ..Default::default()
        };
        if let Some(fg) = fg {
            record.foreground = foreground_times(&fg).0;
        }
        if let Some(bg) = bg {
            record.visible = site_times(&bg.visible, "background").0;
            record.playing = site_times(&bg.playing, "playing").0;
        }
        Some(record)
    }

    /// Dates that have a dated record, oldest first.
    pub async fn dated_records(&self) -> Result<Vec<NaiveDate>> {
        let mut dates = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(self.root.join(DAILY_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(date) = entry.file_name().to_str().and_then(dated_name_to_date) {
                dates.insert(date);
            }
        }
        Ok(dates.into_iter().collect())
    }

    /// Deletes dated records, and quarantined files, older than `days` days. Returns how many
    /// files were removed.
    #[instrument(skip(self))]
    pub async fn purge_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = self.clock.local_time().date() - Duration::days(days.into());
        let removed = purge_dir(&self.root.join(DAILY_DIR), cutoff, |name| {
            dated_name_to_date(name).or_else(|| quarantined_name_to_date(name))
        })
        .await?
            + purge_dir(&self.root.join(CURRENT_DIR), cutoff, quarantined_name_to_date).await?;
        if removed > 0 {
            info!("Purged {removed} dated snapshots older than {cutoff}");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use anyhow::Result;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use tempfile::tempdir;

    use crate::{
        daemon::collection::{
            background::{BackgroundAccumulator, BackgroundTotals},
            foreground::ForegroundAccumulator,
        },
        utils::clock::ManualClock,
    };

    use super::{dated_name_to_date, quarantined_name_to_date, SnapshotStore};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn noon(d: u32) -> NaiveDateTime {
        day(d).and_hms_opt(12, 0, 0).unwrap()
    }

    fn totals() -> (BTreeMap<crate::daemon::collection::subject::Subject, u64>, BackgroundTotals) {
        (
            BTreeMap::from([("code.exe - main.rs".into(), 120), ("vlc.exe - song".into(), 30)]),
            BackgroundTotals {
                visible: BTreeMap::from([("YouTube".into(), 60)]),
                playing: BTreeMap::from([("YouTube".into(), 45)]),
            },
        )
    }

    fn accumulators() -> (ForegroundAccumulator, BackgroundAccumulator) {
        (
            ForegroundAccumulator::new(Duration::seconds(1)),
            BackgroundAccumulator::new(),
        )
    }

    #[tokio::test]
    async fn todays_snapshot_is_restored() -> Result<()> {
        let dir = tempdir()?;
        let clock = Arc::new(ManualClock::new(noon(1)));
        let store = SnapshotStore::new(dir.path().to_owned(), true, clock.clone())?;
        let (fg, bg) = totals();
        store.save(&fg, &bg).await?;

        let (fg_acc, bg_acc) = accumulators();
        let report = store.load_into(&fg_acc, &bg_acc).await;

        assert!(report.foreground_restored);
        assert!(report.background_restored);
        assert_eq!(report.subjects, 2);
        assert_eq!(report.foreground_secs, 150.);
        assert_eq!(fg_acc.times(), fg);
        assert_eq!(bg_acc.visible_times(), bg.visible);
        assert_eq!(bg_acc.playing_times(), bg.playing);
        Ok(())
    }

    #[tokio::test]
    async fn yesterdays_snapshot_is_not_current_state() -> Result<()> {
        let dir = tempdir()?;
        let clock = Arc::new(ManualClock::new(noon(1)));
        let store = SnapshotStore::new(dir.path().to_owned(), true, clock.clone())?;
        let (fg, bg) = totals();
        store.save(&fg, &bg).await?;

        clock.set(noon(2));
        let (fg_acc, bg_acc) = accumulators();
        let report = store.load_into(&fg_acc, &bg_acc).await;

        assert!(!report.foreground_restored);
        assert!(!report.background_restored);
        assert!(fg_acc.times().is_empty());
        assert!(bg_acc.visible_times().is_empty());

        let historical = store.load_historical(day(1)).await.unwrap();
        assert_eq!(historical.foreground_secs(), fg);
        assert_eq!(historical.background_totals(), bg);
        Ok(())
    }

    #[tokio::test]
    async fn corrupted_snapshot_is_quarantined() -> Result<()> {
        let dir = tempdir()?;
        let clock = Arc::new(ManualClock::new(noon(1)));
        let store = SnapshotStore::new(dir.path().to_owned(), true, clock.clone())?;
        let path = dir.path().join("current").join("foreground.json");
        std::fs::write(&path, r#"{"date": "2025-06-01", "times": {"a": 1"#)?;

        let (fg_acc, bg_acc) = accumulators();
        let report = store.load_into(&fg_acc, &bg_acc).await;

        assert!(!report.foreground_restored);
        assert!(!path.exists());
        let quarantined = dir
            .path()
            .join("current")
            .join(format!("foreground.json.corrupted.{}", noon(1).and_utc().timestamp()));
        assert!(quarantined.exists());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped() -> Result<()> {
        let dir = tempdir()?;
        let clock = Arc::new(ManualClock::new(noon(1)));
        let store = SnapshotStore::new(dir.path().to_owned(), true, clock.clone())?;
        std::fs::write(
            dir.path().join("current").join("foreground.json"),
            r#"{"date": "2025-06-01", "times": {"good.exe - a": 10, "bad.exe - b": "ten"}}"#,
        )?;

        let (fg_acc, bg_acc) = accumulators();
        let report = store.load_into(&fg_acc, &bg_acc).await;

        assert!(report.foreground_restored);
        assert_eq!(report.skipped_entries, 1);
        assert_eq!(fg_acc.times(), BTreeMap::from([("good.exe - a".into(), 10)]));
        Ok(())
    }

    #[tokio::test]
    async fn dated_backups_can_be_disabled() -> Result<()> {
        let dir = tempdir()?;
        let clock = Arc::new(ManualClock::new(noon(1)));
        let store = SnapshotStore::new(dir.path().to_owned(), false, clock.clone())?;
        let (fg, bg) = totals();
        store.save(&fg, &bg).await?;
        store.save_dated(day(1), &fg, &bg).await?;

        assert!(store.dated_records().await?.is_empty());
        assert_eq!(store.load_historical(day(1)).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn purge_removes_only_old_records() -> Result<()> {
        let dir = tempdir()?;
        let clock = Arc::new(ManualClock::new(noon(1)));
        let store = SnapshotStore::new(dir.path().to_owned(), true, clock.clone())?;
        let (fg, bg) = totals();
        for d in [1, 5, 10] {
            store.save_dated(day(d), &fg, &bg).await?;
        }
        std::fs::write(dir.path().join("daily").join("notes.txt"), "keep me")?;

        clock.set(noon(12));
        let removed = store.purge_older_than(5).await?;

        assert_eq!(removed, 4);
        assert_eq!(store.dated_records().await?, vec![day(10)]);
        assert!(dir.path().join("daily").join("notes.txt").exists());
        Ok(())
    }

    #[test]
    fn dated_names_parse() {
        assert_eq!(dated_name_to_date("foreground_2025-06-01.json"), Some(day(1)));
        assert_eq!(dated_name_to_date("background_2025-06-01.json"), Some(day(1)));
        assert_eq!(dated_name_to_date("foreground_2025-06-01.json.corrupted.5"), None);
        assert_eq!(dated_name_to_date("foreground.json"), None);
    }

    #[test]
    fn quarantined_names_keep_their_age() {
        assert_eq!(
            quarantined_name_to_date("foreground_2025-06-01.json.corrupted.5"),
            Some(day(1))
        );
        let moved_at = noon(3).and_utc().timestamp();
        assert_eq!(
            quarantined_name_to_date(&format!("background.json.corrupted.{moved_at}")),
            Some(day(3))
        );
        assert_eq!(quarantined_name_to_date("foreground.json"), None);
        assert_eq!(quarantined_name_to_date("foreground_2025-06-01.json"), None);
    }

    #[tokio::test]
    async fn purge_removes_old_quarantined_files() -> Result<()> {
        let dir = tempdir()?;
        let clock = Arc::new(ManualClock::new(noon(12)));
        let store = SnapshotStore::new(dir.path().to_owned(), true, clock.clone())?;
        let daily = dir.path().join("daily");
        let current = dir.path().join("current");
        std::fs::write(daily.join("foreground_2025-06-01.json.corrupted.1"), "{")?;
        std::fs::write(daily.join("foreground_2025-06-10.json.corrupted.2"), "{")?;
        let old = format!("foreground.json.corrupted.{}", noon(2).and_utc().timestamp());
        let recent = format!("background.json.corrupted.{}", noon(11).and_utc().timestamp());
        std::fs::write(current.join(&old), "{")?;
        std::fs::write(current.join(&recent), "{")?;
        let (fg, bg) = totals();
        store.save(&fg, &bg).await?;

        let removed = store.purge_older_than(5).await?;

        assert_eq!(removed, 2);
        assert!(!daily.join("foreground_2025-06-01.json.corrupted.1").exists());
        assert!(daily.join("foreground_2025-06-10.json.corrupted.2").exists());
        assert!(!current.join(old).exists());
        assert!(current.join(recent).exists());
        assert!(current.join("foreground.json").exists());
        Ok(())
    }
}
