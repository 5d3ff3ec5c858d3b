use std::{
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufReader},
};
use tracing::{debug, info, warn};

use crate::{
    daemon::{collection::activity::ActivityEvent, sessions::marker::SessionMarker},
    utils::time::{date_to_record_name, record_name_to_date},
};

/// Interface for abstracting storage of activity events.
pub trait ActivityLog {
    type LogFile: ActivityFileHandle;

    /// Opens or creates the log of a specific day. Events are appended, never rewritten.
    fn open_for_append(&self, date: NaiveDate) -> impl Future<Output = Result<Self::LogFile>>;

    /// Every well formed event logged for a day, in file order.
    fn read_day(&self, date: NaiveDate)
        -> impl Future<Output = Result<Vec<ActivityEvent>>> + Send;
}

impl<T: Deref> ActivityLog for T
where
    T::Target: ActivityLog,
{
    type LogFile = <T::Target as ActivityLog>::LogFile;

    fn open_for_append(&self, date: NaiveDate) -> impl Future<Output = Result<Self::LogFile>> {
        self.deref().open_for_append(date)
    }

    fn read_day(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Vec<ActivityEvent>>> + Send {
        self.deref().read_day(date)
    }
}

pub trait ActivityFileHandle {
    fn append(&mut self, events: Vec<ActivityEvent>) -> impl Future<Output = Result<()>>;
    fn get_date(&self) -> NaiveDate;
    fn flush(&mut self) -> impl Future<Output = Result<()>>;
}

/// The main realization of [ActivityLog]: one JSON line per event, one file per local day.
pub struct ActivityLogImpl {
    log_dir: PathBuf,
}

impl ActivityLogImpl {
    pub fn new(log_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&log_dir)?;

        Ok(Self { log_dir })
    }

    async fn read_all_inner(&self, path: &Path) -> Result<Vec<ActivityEvent>> {
        async fn extract(path: &Path) -> std::result::Result<Vec<ActivityEvent>, std::io::Error> {
            debug!("Extracting {path:?}");
            let file = File::open(path).await?;
            file.lock_shared()?;
            let buffer = BufReader::new(file);
            let mut lines = buffer.lines();
            let mut events = vec![];
            while let Ok(Some(v)) = lines.next_line().await {
                if v.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ActivityEvent>(&v) {
                    Ok(v) => events.push(v),
                    Err(e) => {
                        // A write cut short by a crash leaves half a line behind.
                        warn!("Found illegal json string in {path:?} {}: {e}", &v)
                    }
                }
            }

            lines.into_inner().into_inner().unlock_async().await?;

            Ok(events)
        }

        match extract(path).await {
            Ok(s) => Ok(s),
            Err(e) => {
                if e.kind() == ErrorKind::NotFound {
                    Ok(vec![])
                } else {
                    Err(e)?
                }
            }
        }
    }

    /// Session markers logged on `date`.
    pub async fn markers_for(&self, date: NaiveDate) -> Result<Vec<SessionMarker>> {
        let events = self.read_day(date).await?;
        Ok(events
            .iter()
            .filter_map(ActivityEvent::as_session_marker)
            .collect())
    }

    /// Deletes day logs older than `days` days before `today`.
    pub async fn purge_older_than(&self, today: NaiveDate, days: u32) -> Result<usize> {
        let cutoff = today - Duration::days(days.into());
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.log_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(date) = entry.file_name().to_str().and_then(record_name_to_date) else {
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
        if removed > 0 {
            info!("Purged {removed} activity logs older than {cutoff}");
        }
        Ok(removed)
    }
}

impl ActivityLog for ActivityLogImpl {
    type LogFile = ActivityFile<File>;

    async fn open_for_append(&self, date: NaiveDate) -> Result<Self::LogFile> {
        let path = self.log_dir.join(date_to_record_name(date));

        let v = File::options()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(ActivityFile::new(v, date))
    }

    async fn read_day(&self, date: NaiveDate) -> Result<Vec<ActivityEvent>> {
        let path = self.log_dir.join(date_to_record_name(date));
        self.read_all_inner(&path).await
    }
}

pub struct ActivityFile<F> {
    file: F,
    date: NaiveDate,
}

impl<F: AsyncSeek + AsyncWrite + fs4::tokio::AsyncFileExt + Unpin> ActivityFileHandle
    for ActivityFile<F>
{
    async fn append(&mut self, events: Vec<ActivityEvent>) -> Result<()> {
        self.append_inner(events).await
    }

    fn get_date(&self) -> NaiveDate {
        self.date
    }

    async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }
}

impl<F: AsyncSeek + AsyncWrite + fs4::tokio::AsyncFileExt + Unpin> ActivityFile<F> {
    fn new(file: F, date: NaiveDate) -> Self {
        Self { file, date }
    }

    async fn append_inner(&mut self, events: Vec<ActivityEvent>) -> Result<()> {
        // Semi-safe acquire-release for a file
        self.file.lock_exclusive()?;
        let result = Self::append_with_file(&mut self.file, events).await;
        self.file.unlock_async().await?;
        result
    }

    async fn append_with_file(file: &mut F, events: Vec<ActivityEvent>) -> Result<()> {
        let mut buffer = Vec::<u8>::new();
        for event in events {
            serde_json::to_writer(&mut buffer, &event)?;
            buffer.push(b'\n');
        }

        file.seek(std::io::SeekFrom::End(0)).await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use anyhow::Result;
    use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use tempfile::tempdir;

    use crate::daemon::{
        collection::activity::{ActivityEvent, ActivityKind},
        sessions::marker::MarkerKind,
        storage::activity_log::{ActivityFileHandle, ActivityLog, ActivityLogImpl},
    };

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    fn events() -> Vec<ActivityEvent> {
        let start = Utc.from_utc_datetime(&TEST_START_DATE);
        vec![
            ActivityEvent::marker(start, MarkerKind::Startup),
            ActivityEvent::new(
                start + Duration::seconds(5),
                ActivityKind::UnproductiveStarted {
                    subject: "chrome.exe - Reddit".into(),
                },
            ),
            ActivityEvent::marker(start + Duration::hours(1), MarkerKind::Shutdown),
        ]
    }

    #[tokio::test]
    async fn appended_events_read_back() -> Result<()> {
        let dir = tempdir()?;
        let log = ActivityLogImpl::new(dir.path().to_owned())?;
        let events = events();

        let mut file = log.open_for_append(TEST_START_DATE.date()).await?;
        file.append(events[..1].to_vec()).await?;
        file.append(events[1..].to_vec()).await?;
        file.flush().await?;

        // A second handle keeps appending to the same day.
        let mut again = log.open_for_append(TEST_START_DATE.date()).await?;
        again.append(events[..1].to_vec()).await?;

        let stored = log.read_day(TEST_START_DATE.date()).await?;
        assert_eq!(stored.len(), 4);
        assert_eq!(&stored[..3], &events[..]);
        Ok(())
    }

    #[tokio::test]
    async fn broken_lines_are_skipped() -> Result<()> {
        let dir = tempdir()?;
        let log = ActivityLogImpl::new(dir.path().to_owned())?;
        let events = events();

        let mut raw = std::fs::File::create(dir.path().join("2018-07-04"))?;
        writeln!(raw, "{}", serde_json::to_string(&events[0])?)?;
        writeln!(raw, "{{\"moment\": \"2018-07-04T00:00:01Z\", \"kind\": \"unpro")?;
        writeln!(raw)?;
        writeln!(raw, "{}", serde_json::to_string(&events[2])?)?;
        drop(raw);

        let stored = log.read_day(TEST_START_DATE.date()).await?;
        assert_eq!(stored, vec![events[0].clone(), events[2].clone()]);

        let markers = log.markers_for(TEST_START_DATE.date()).await?;
        assert_eq!(
            markers.iter().map(|m| m.kind).collect::<Vec<_>>(),
            vec![MarkerKind::Startup, MarkerKind::Shutdown]
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_day_is_empty() -> Result<()> {
        let dir = tempdir()?;
        let log = ActivityLogImpl::new(dir.path().to_owned())?;
        assert!(log.read_day(TEST_START_DATE.date()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn purge_keeps_recent_days() -> Result<()> {
        let dir = tempdir()?;
        let log = ActivityLogImpl::new(dir.path().to_owned())?;
        for name in ["2018-06-01", "2018-07-01", "2018-07-04", "not-a-date"] {
            std::fs::write(dir.path().join(name), "")?;
        }

        let removed = log.purge_older_than(TEST_START_DATE.date(), 30).await?;

        assert_eq!(removed, 1);
        assert!(!dir.path().join("2018-06-01").exists());
        assert!(dir.path().join("2018-07-01").exists());
        assert!(dir.path().join("not-a-date").exists());
        Ok(())
    }
}
