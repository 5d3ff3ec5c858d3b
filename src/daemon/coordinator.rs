use std::{path::Path, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::utils::{clock::Clock, time::format_seconds};

use super::{
    collection::{
        activity::ActivityEvent, background::BackgroundAccumulator,
        foreground::ForegroundAccumulator,
    },
    config::EngineConfig,
    report::{
        scheduler::ReportScheduler,
        sink::ReportSink,
        summary::ProductivitySummary,
    },
    sessions::{
        marker::{MarkerKind, SessionMarker, SessionMarkerSource},
        reconstruct::{LoginSession, SessionReconstructor},
    },
    storage::{
        activity_log::ActivityLogImpl,
        entities::TimingStateEntity,
        snapshot_store::{RestoreReport, SnapshotStore},
        timing_state::TimingStateStore,
    },
    ACTIVITY_DIR, SNAPSHOT_DIR, TIMING_STATE_FILE,
};

/// The two accumulators, shared between their collectors and the coordinator.
#[derive(Clone)]
pub struct Accumulators {
    pub foreground: Arc<ForegroundAccumulator>,
    pub background: Arc<BackgroundAccumulator>,
}

impl Accumulators {
    pub fn new(min_dwell: Duration) -> Self {
        Self {
            foreground: Arc::new(ForegroundAccumulator::new(min_dwell)),
            background: Arc::new(BackgroundAccumulator::new()),
        }
    }
}

/// Things outside the engine the coordinator talks to.
pub struct Collaborators {
    pub sink: Arc<dyn ReportSink>,
    /// Polled every tick. Must only return markers it hasn't returned before.
    pub markers: Option<Box<dyn SessionMarkerSource>>,
}

/// Low frequency loop that owns everything on disk. Only reads the accumulators through their
/// copying methods, except on day rollover where it resets them.
pub struct Coordinator {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    accumulators: Accumulators,
    collaborators: Collaborators,
    snapshots: SnapshotStore,
    activity: ActivityLogImpl,
    timing: TimingStateStore,
    timing_state: TimingStateEntity,
    scheduler: ReportScheduler,
    /// Interval mode counts from here. The last send, or the startup on a first run.
    schedule_anchor: DateTime<Utc>,
    reconstructor: SessionReconstructor,
    /// Opener of the session still running, as far as this process has seen.
    open_session: Option<MarkerKind>,
    marker_failures: u32,
    events: mpsc::Sender<ActivityEvent>,
    current_day: NaiveDate,
    next_save: Instant,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub async fn new(
        app_dir: &Path,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        accumulators: Accumulators,
        collaborators: Collaborators,
        events: mpsc::Sender<ActivityEvent>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let snapshots = SnapshotStore::new(
            app_dir.join(SNAPSHOT_DIR),
            config.storage.dated_backups,
            clock.clone(),
        )?;
        let activity = ActivityLogImpl::new(app_dir.join(ACTIVITY_DIR))?;
        let timing = TimingStateStore::new(app_dir.join(TIMING_STATE_FILE), clock.clone());
        let timing_state = timing.load().await;

        let scheduler = ReportScheduler::new(config.report.mode(), timing_state.last_daily_send_date);
        let schedule_anchor = match timing_state.last_send {
            Some(last_send) => last_send,
            None => {
                info!("No report was ever sent, report clock starts now");
                clock.time()
            }
        };

        Ok(Self {
            reconstructor: SessionReconstructor::new(config.sessions.chunk),
            current_day: clock.local_time().date(),
            next_save: clock.instant(),
            config,
            clock,
            accumulators,
            collaborators,
            snapshots,
            activity,
            timing,
            timing_state,
            scheduler,
            schedule_anchor,
            open_session: None,
            marker_failures: 0,
            events,
            shutdown,
        })
    }

    /// Restores today's totals, logs the startup and catches up on missed reports. Runs before
    /// the collectors start.
    #[instrument(skip_all)]
    pub async fn startup(&mut self) {
        let restored = self
            .snapshots
            .load_into(&self.accumulators.foreground, &self.accumulators.background)
            .await;
        self.verify_restored(&restored);

        self.record_marker(MarkerKind::Startup).await;
        self.recover_missed_reports().await;
        self.purge().await;
        info!("Report schedule: {}", self.scheduler.mode());
    }

    fn verify_restored(&self, restored: &RestoreReport) {
        if !restored.foreground_restored && !restored.background_restored {
            info!("Nothing to restore for today, starting fresh");
            return;
        }
        info!(
            "Restored {} subjects ({}) and {} background sites ({} visible, {} playing)",
            restored.subjects,
            format_seconds(restored.foreground_secs as i64),
            restored.sites,
            format_seconds(restored.visible_secs as i64),
            format_seconds(restored.playing_secs as i64),
        );
        if restored.skipped_entries > 0 {
            warn!("{} stored entries were invalid and skipped", restored.skipped_entries);
        }

        let mut top = self.accumulators.foreground.times().into_iter().collect::<Vec<_>>();
        top.sort_by(|a, b| b.1.cmp(&a.1));
        for (subject, seconds) in top.into_iter().take(3) {
            debug!("Restored {subject}: {}", format_seconds(seconds as i64));
        }
    }

    pub async fn run(&mut self) {
        info!("Coordinator started");
        let mut tick_point = self.clock.instant();
        loop {
            tick_point = (tick_point + self.config.coordinator_interval).max(self.clock.instant());
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = self.clock.sleep_until(tick_point) => ()
            }
            self.tick().await;
        }
    }

    /// One pass of housekeeping. Every step logs its own failures, nothing here stops the loop.
    pub async fn tick(&mut self) {
        let today = self.clock.local_time().date();
        if today != self.current_day {
            self.roll_over(today).await;
        }

        if self.clock.instant() >= self.next_save {
            self.save().await;
            self.next_save = self.clock.instant() + self.config.save_interval;
        }

        self.poll_markers().await;

        if self.config.report.enabled {
            self.report_if_due().await;
        }
    }

    /// Final save after every collector has flushed, then the shutdown marker.
    pub async fn finish(&mut self) {
        self.save().await;
        self.record_marker(MarkerKind::Shutdown).await;
        info!("Coordinator stopped");
    }

    async fn save(&self) {
        let now = self.clock.time();
        let foreground = self.accumulators.foreground.times_at(now);
        let background = self.accumulators.background.totals_at(now);
        let _ = self
            .snapshots
            .save(&foreground, &background)
            .await
            .inspect_err(|e| error!("Failed to save snapshot {e:?}"));
    }

    #[instrument(skip(self))]
    async fn roll_over(&mut self, today: NaiveDate) {
        let finished = self.current_day;
        let now = self.clock.time();
        info!("Day changed from {finished} to {today}");

        let foreground = self.accumulators.foreground.times_at(now);
        let background = self.accumulators.background.totals_at(now);
        let _ = self
            .snapshots
            .save_dated(finished, &foreground, &background)
            .await
            .inspect_err(|e| error!("Failed to close {finished} {e:?}"));

        self.accumulators.foreground.reset(now);
        self.accumulators.background.reset(now);
        self.current_day = today;
        self.carry_open_session(today).await;

        self.save().await;
        self.purge().await;
    }

    async fn purge(&self) {
        let days = self.config.storage.retention_days;
        let _ = self
            .snapshots
            .purge_older_than(days)
            .await
            .inspect_err(|e| warn!("Failed to purge snapshots {e:?}"));
        let _ = self
            .activity
            .purge_older_than(self.current_day, days)
            .await
            .inspect_err(|e| warn!("Failed to purge activity logs {e:?}"));
    }

    /// Each day's log has to describe its own sessions, so a session still open at midnight is
    /// reopened at the start of the new day.
    async fn carry_open_session(&self, today: NaiveDate) {
        let Some(kind) = self.open_session else {
            return;
        };
        let midnight = today.and_time(NaiveTime::MIN);
        let moment = self.clock.time() - (self.clock.local_time() - midnight);
        info!("Session opened by {kind:?} is still running, carrying it into {today}");
        self.send(ActivityEvent::marker(moment, kind)).await;
    }

    fn track_session(&mut self, kind: MarkerKind) {
        self.open_session = kind.opens_session().then_some(kind);
    }

    async fn record_marker(&mut self, kind: MarkerKind) {
        self.track_session(kind);
        self.send(ActivityEvent::marker(self.clock.time(), kind)).await;
    }

    async fn send(&self, event: ActivityEvent) {
        if let Err(e) = self.events.send(event).await {
            error!("Unexpected error during sending {e:?}");
        }
    }

    fn marker_moment(&self, marker: &SessionMarker) -> DateTime<Utc> {
        Local
            .from_local_datetime(&marker.at)
            .earliest()
            .map(|at| at.to_utc())
            .unwrap_or_else(|| self.clock.time())
    }

    async fn poll_markers(&mut self) {
        let Some(source) = self.collaborators.markers.as_ref() else {
            return;
        };
        match source.poll().await {
            Ok(mut markers) => {
                self.marker_failures = 0;
                markers.sort_by_key(|m| m.at);
                for marker in markers {
                    debug!("New session marker {marker}");
                    let moment = self.marker_moment(&marker);
                    self.track_session(marker.kind);
                    self.send(ActivityEvent::marker(moment, marker.kind)).await;
                }
            }
            Err(e) => {
                self.marker_failures += 1;
                warn!(
                    "Polling session markers failed ({}/{}) {e:?}",
                    self.marker_failures, self.config.sessions.source_failure_limit
                );
                if self.marker_failures >= self.config.sessions.source_failure_limit {
                    error!("Session marker source keeps failing, switching it off");
                    self.collaborators.markers = None;
                }
            }
        }
    }

    /// Sessions of `date` out of the markers in its activity log. Without the log the report simply
    /// goes out without sessions.
    async fn sessions_for(&self, date: NaiveDate, now: NaiveDateTime) -> Vec<LoginSession> {
        match self.activity.markers_for(date).await {
            Ok(markers) => self.reconstructor.reconstruct(markers, now),
            Err(e) => {
                warn!("Skipping sessions for {date}, markers unavailable {e:?}");
                vec![]
            }
        }
    }

    fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        self.clock.local_time() - (self.clock.time() - at)
    }

    #[instrument(skip(self))]
    async fn report_if_due(&mut self) {
        let now_local = self.clock.local_time();
        let decision = self
            .scheduler
            .is_due(now_local, Some(self.to_local(self.schedule_anchor)));
        if !decision.due {
            debug!("Report not due: {}", decision.reason);
            return;
        }
        info!("Report due: {}", decision.reason);

        let date = self.scheduler.report_date(now_local);
        let now = self.clock.time();
        let summary = if date == now_local.date() {
            ProductivitySummary::build(
                date,
                now,
                &self.accumulators.foreground.times_at(now),
                &self.accumulators.background.totals_at(now),
                self.sessions_for(date, now_local).await,
                now_local,
            )
        } else {
            let Some(summary) = self.historical_summary(date).await else {
                warn!("No record of {date} to report on");
                return;
            };
            summary
        };

        match self.collaborators.sink.deliver(&summary).await {
            Ok(()) => {
                self.scheduler.mark_sent(date);
                self.schedule_anchor = now;
                self.timing_state.record_send(now, date);
                self.save_timing_state().await;
            }
            Err(e) => error!("Report delivery failed, retrying on the next tick {e:?}"),
        }
    }

    /// Summary of a finished day out of its dated record.
    async fn historical_summary(&self, date: NaiveDate) -> Option<ProductivitySummary> {
        let record = self.snapshots.load_historical(date).await?;
        let end_of_day = date.and_time(NaiveTime::MIN) + Duration::days(1);
        Some(ProductivitySummary::build(
            date,
            self.clock.time(),
            &record.foreground_secs(),
            &record.background_totals(),
            self.sessions_for(date, end_of_day).await,
            end_of_day,
        ))
    }

    async fn save_timing_state(&self) {
        let _ = self
            .timing
            .save(&self.timing_state)
            .await
            .inspect_err(|e| error!("Failed to save timing state {e:?}"));
    }

    /// Delivers reports for recent days that have a dated record but never got a report.
    #[instrument(skip(self))]
    async fn recover_missed_reports(&mut self) {
        if !self.config.storage.missed_report_recovery || !self.config.report.enabled {
            return;
        }
        let today = self.current_day;
        let missed = self
            .timing_state
            .unsent_recent_dates(today, self.config.storage.missed_report_days_back);

        for date in missed {
            let Some(summary) = self.historical_summary(date).await else {
                debug!("No record for {date}, nothing to recover");
                continue;
            };
            if summary.is_empty() {
                debug!("Record for {date} is empty, skipping");
                continue;
            }
            match self.collaborators.sink.deliver(&summary).await {
                Ok(()) => {
                    info!("Recovered report for {date}");
                    self.timing_state.record_delivered(date, today);
                    self.save_timing_state().await;
                }
                Err(e) => warn!("Failed to recover report for {date} {e:?}"),
            }
        }
    }
}
