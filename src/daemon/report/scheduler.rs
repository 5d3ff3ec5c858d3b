use std::fmt::Display;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tracing::info;

use crate::utils::time::format_seconds;

/// Interval mode never fires more often than this.
pub const MIN_INTERVAL: Duration = Duration::seconds(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// Every `every`, counted from the last successful send.
    Interval { every: Duration },
    /// Once a day: any time in `[target - early, target]`, or up to `grace` after `target` as a
    /// fallback.
    TimeOfDay {
        target: NaiveTime,
        early: Duration,
        grace: Duration,
    },
}

impl ReportMode {
    pub fn interval(every: Duration) -> Self {
        ReportMode::Interval {
            every: every.max(MIN_INTERVAL),
        }
    }
}

impl Display for ReportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportMode::Interval { every } => {
                write!(f, "every {}", format_seconds(every.num_seconds()))
            }
            ReportMode::TimeOfDay { target, early, .. } => write!(
                f,
                "daily at {} (window opens {} early)",
                target.format("%H:%M"),
                format_seconds(early.num_seconds())
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimingDecision {
    pub due: bool,
    pub reason: String,
}

impl TimingDecision {
    fn due(reason: impl Into<String>) -> Self {
        Self {
            due: true,
            reason: reason.into(),
        }
    }

    fn wait(reason: impl Into<String>) -> Self {
        Self {
            due: false,
            reason: reason.into(),
        }
    }
}

/// Decides when a report should go out. All times are local wall clock.
#[derive(Debug, Clone)]
pub struct ReportScheduler {
    mode: ReportMode,
    last_daily_send_date: Option<NaiveDate>,
}

impl ReportScheduler {
    pub fn new(mode: ReportMode, last_daily_send_date: Option<NaiveDate>) -> Self {
        let mode = match mode {
            ReportMode::Interval { every } => ReportMode::interval(every),
            other => other,
        };
        Self {
            mode,
            last_daily_send_date,
        }
    }

    pub fn mode(&self) -> ReportMode {
        self.mode
    }

    pub fn last_daily_send_date(&self) -> Option<NaiveDate> {
        self.last_daily_send_date
    }

    pub fn is_due(&self, now: NaiveDateTime, last_send: Option<NaiveDateTime>) -> TimingDecision {
        match self.mode {
            ReportMode::Interval { every } => Self::interval_due(every, now, last_send),
            ReportMode::TimeOfDay {
                target,
                early,
                grace,
            } => self.time_of_day_due(target, early, grace, now),
        }
    }

    fn interval_due(
        every: Duration,
        now: NaiveDateTime,
        last_send: Option<NaiveDateTime>,
    ) -> TimingDecision {
        let Some(last_send) = last_send else {
            return TimingDecision::due("No report sent yet");
        };
        let since = now - last_send;
        if since >= every {
            TimingDecision::due(format!(
                "Interval elapsed ({} since last report)",
                format_seconds(since.num_seconds())
            ))
        } else {
            TimingDecision::wait(format!(
                "Waiting {} for next interval",
                format_seconds((every - since).num_seconds())
            ))
        }
    }

    /// Date a due report belongs to. Only differs from the date of `now` right after midnight,
    /// while yesterday's target is still within its grace.
    pub fn report_date(&self, now: NaiveDateTime) -> NaiveDate {
        match self.mode {
            ReportMode::TimeOfDay { target, grace, .. } => self
                .pending_from_yesterday(target, grace, now)
                .unwrap_or(now.date()),
            ReportMode::Interval { .. } => now.date(),
        }
    }

    fn pending_from_yesterday(
        &self,
        target: NaiveTime,
        grace: Duration,
        now: NaiveDateTime,
    ) -> Option<NaiveDate> {
        let yesterday = now.date().pred_opt()?;
        let unsent = self
            .last_daily_send_date
            .map_or(true, |sent| sent < yesterday);
        (unsent && now - yesterday.and_time(target) <= grace).then_some(yesterday)
    }

    fn time_of_day_due(
        &self,
        target: NaiveTime,
        early: Duration,
        grace: Duration,
        now: NaiveDateTime,
    ) -> TimingDecision {
        let today = now.date();
        let target_label = target.format("%H:%M");
        if let Some(yesterday) = self.pending_from_yesterday(target, grace, now) {
            let late = now - yesterday.and_time(target);
            return TimingDecision::due(format!(
                "{} late for the {target_label} target of {yesterday}, sending now",
                format_seconds(late.num_seconds())
            ));
        }
        if self.last_daily_send_date == Some(today) {
            return TimingDecision::wait(format!(
                "Daily report already sent today (target {target_label})"
            ));
        }

        let target_at = today.and_time(target);
        // The window never reaches back into the previous day.
        let window_opens = (target_at - early).max(today.and_time(NaiveTime::MIN));

        if now >= target_at {
            let late = now - target_at;
            if late <= grace {
                TimingDecision::due(format!(
                    "{} late for {target_label} target, sending now",
                    format_seconds(late.num_seconds())
                ))
            } else {
                TimingDecision::wait(format!(
                    "Too late ({} past {target_label}), next report tomorrow at {}",
                    format_seconds(late.num_seconds()),
                    window_opens.format("%H:%M")
                ))
            }
        } else if now >= window_opens {
            TimingDecision::due(format!("Early send window active (target {target_label})"))
        } else {
            TimingDecision::wait(format!(
                "Report in {} (window opens {})",
                format_seconds((window_opens - now).num_seconds()),
                window_opens.format("%H:%M")
            ))
        }
    }

    /// Attributes a successful send to `date`. Must be persisted by the caller to survive restarts.
    pub fn mark_sent(&mut self, date: NaiveDate) {
        info!("Marked report as sent for {date}");
        self.last_daily_send_date = Some(date);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

    use super::{ReportMode, ReportScheduler};

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn daily(h: u32, m: u32) -> ReportMode {
        ReportMode::TimeOfDay {
            target: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
            early: Duration::minutes(5),
            grace: Duration::minutes(5),
        }
    }

    #[test]
    fn interval_waits_for_the_full_interval() {
        let scheduler = ReportScheduler::new(ReportMode::interval(Duration::minutes(3)), None);

        assert!(scheduler.is_due(at(1, 9, 0), None).due);
        assert!(!scheduler.is_due(at(1, 9, 2), Some(at(1, 9, 0))).due);
        let decision = scheduler.is_due(at(1, 9, 3), Some(at(1, 9, 0)));
        assert!(decision.due);
        assert_eq!(decision.reason, "Interval elapsed (3m since last report)");
    }

    #[test]
    fn interval_has_a_floor() {
        let scheduler =
            ReportScheduler::new(ReportMode::Interval { every: Duration::seconds(5) }, None);

        assert_eq!(
            scheduler.mode(),
            ReportMode::Interval {
                every: Duration::seconds(60)
            }
        );
        assert!(!scheduler.is_due(at(1, 9, 0) + Duration::seconds(30), Some(at(1, 9, 0))).due);
    }

    #[test]
    fn time_of_day_windows() {
        let scheduler = ReportScheduler::new(daily(18, 0), None);

        assert!(!scheduler.is_due(at(1, 17, 54), None).due);
        assert!(scheduler.is_due(at(1, 17, 55), None).due);
        assert!(scheduler.is_due(at(1, 18, 0), None).due);
        assert!(scheduler.is_due(at(1, 18, 5), None).due);

        let decision = scheduler.is_due(at(1, 18, 6), None);
        assert!(!decision.due);
        assert_eq!(
            decision.reason,
            "Too late (6m past 18:00), next report tomorrow at 17:55"
        );
    }

    #[test]
    fn one_send_per_date() {
        let mut scheduler = ReportScheduler::new(daily(18, 0), None);
        let today = at(1, 17, 56);
        assert!(scheduler.is_due(today, None).due);

        scheduler.mark_sent(today.date());
        for minute in [57, 58, 59] {
            assert!(!scheduler.is_due(at(1, 17, minute), Some(today)).due);
        }
        assert!(!scheduler.is_due(at(1, 18, 3), Some(today)).due);
        assert!(!scheduler.is_due(at(1, 23, 59), Some(today)).due);

        assert!(scheduler.is_due(at(2, 17, 56), Some(today)).due);
    }

    #[test]
    fn early_window_stops_at_midnight() {
        let scheduler = ReportScheduler::new(
            ReportMode::TimeOfDay {
                target: NaiveTime::from_hms_opt(0, 2, 0).unwrap(),
                early: Duration::minutes(10),
                grace: Duration::minutes(5),
            },
            None,
        );

        assert!(scheduler.is_due(at(2, 0, 0), None).due);
        assert!(!scheduler.is_due(at(1, 23, 55), None).due);
    }

    #[test]
    fn late_grace_reaches_past_midnight() {
        let mut scheduler = ReportScheduler::new(daily(23, 58), None);

        let decision = scheduler.is_due(at(2, 0, 1), None);
        assert!(decision.due);
        assert_eq!(
            decision.reason,
            "3m late for the 23:58 target of 2025-06-01, sending now"
        );
        assert_eq!(scheduler.report_date(at(2, 0, 1)), at(1, 0, 0).date());
        assert!(!scheduler.is_due(at(2, 0, 4), None).due);
        assert_eq!(scheduler.report_date(at(2, 0, 4)), at(2, 0, 0).date());

        scheduler.mark_sent(at(1, 0, 0).date());
        assert!(!scheduler.is_due(at(2, 0, 2), None).due);
        assert_eq!(scheduler.report_date(at(2, 0, 2)), at(2, 0, 0).date());
    }

    #[test]
    fn interval_reports_belong_to_today() {
        let scheduler = ReportScheduler::new(ReportMode::interval(Duration::minutes(3)), None);
        assert_eq!(scheduler.report_date(at(2, 0, 1)), at(2, 0, 0).date());
    }
}
