use std::{collections::BTreeMap, fmt::Display, path::Path, sync::Arc};

use ansi_term::Colour;
use anyhow::Result;
use chrono::Local;
use sysinfo::System;

use crate::{
    daemon::{
        config::EngineConfig,
        coordinator::Accumulators,
        report::{
            scheduler::{ReportScheduler, TimingDecision},
            summary::ProductivitySummary,
        },
        sessions::reconstruct::SessionReconstructor,
        storage::{
            activity_log::ActivityLogImpl, snapshot_store::SnapshotStore,
            timing_state::TimingStateStore,
        },
        ACTIVITY_DIR, SNAPSHOT_DIR, TIMING_STATE_FILE,
    },
    utils::{
        clock::{Clock, DefaultClock},
        time::format_seconds,
    },
};

use super::process::{running_servers, server_paths};

const SHOWN_PER_CATEGORY: usize = 5;

/// Prints today's totals as last saved by the daemon, plus the report timing decision.
pub async fn process_status_command(app_dir: &Path) -> Result<()> {
    let config = EngineConfig::load(app_dir);
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);

    let system = System::new_all();
    match running_servers(&system, &server_paths()?)?.first() {
        Some(pid) => println!("Daemon {} (pid {pid})", Colour::Green.paint("running")),
        None => println!("Daemon {}", Colour::Red.paint("not running")),
    }

    let summary = today_summary(app_dir, &config, clock.clone()).await?;
    for line in render_summary(&summary) {
        println!("{line}");
    }

    let decision = if config.report.enabled {
        let timing = TimingStateStore::new(app_dir.join(TIMING_STATE_FILE), clock.clone())
            .load()
            .await;
        let scheduler = ReportScheduler::new(config.report.mode(), timing.last_daily_send_date);
        let last_send = timing
            .last_send
            .map(|at| at.with_timezone(&Local).naive_local());
        Some((
            scheduler.mode(),
            scheduler.is_due(clock.local_time(), last_send),
        ))
    } else {
        None
    };
    match decision {
        Some((mode, decision)) => println!("{}", render_decision(mode, &decision)),
        None => println!("Reports are disabled"),
    }
    Ok(())
}

/// Today's summary out of the current snapshot and today's activity log.
async fn today_summary(
    app_dir: &Path,
    config: &EngineConfig,
    clock: Arc<dyn Clock>,
) -> Result<ProductivitySummary> {
    let snapshots = SnapshotStore::new(
        app_dir.join(SNAPSHOT_DIR),
        config.storage.dated_backups,
        clock.clone(),
    )?;
    let accumulators = Accumulators::new(config.min_dwell);
    snapshots
        .load_into(&accumulators.foreground, &accumulators.background)
        .await;

    let now = clock.time();
    let now_local = clock.local_time();
    let today = now_local.date();
    let markers = ActivityLogImpl::new(app_dir.join(ACTIVITY_DIR))?
        .markers_for(today)
        .await?;
    let sessions = SessionReconstructor::new(config.sessions.chunk).reconstruct(markers, now_local);

    Ok(ProductivitySummary::build(
        today,
        now,
        &accumulators.foreground.times(),
        &accumulators.background.totals_at(now),
        sessions,
        now_local,
    ))
}

fn render_category<K: Display>(
    name: &str,
    colour: Colour,
    entries: &BTreeMap<K, u64>,
    total: u64,
) -> Vec<String> {
    if entries.is_empty() {
        return vec![];
    }
    let mut lines = vec![format!(
        "{} {}",
        colour.bold().paint(name),
        format_seconds(total as i64)
    )];
    let mut sorted = entries.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| b.1.cmp(a.1));
    for (key, seconds) in sorted.iter().take(SHOWN_PER_CATEGORY) {
        lines.push(format!("  {}\t{key}", format_seconds(**seconds as i64)));
    }
    if sorted.len() > SHOWN_PER_CATEGORY {
        lines.push(format!("  ... and {} more", sorted.len() - SHOWN_PER_CATEGORY));
    }
    lines
}

pub fn render_summary(summary: &ProductivitySummary) -> Vec<String> {
    let mut lines = vec![format!(
        "{} tracked on {}",
        format_seconds(summary.tracked_secs() as i64),
        summary.date
    )];
    lines.extend(render_category(
        "Productive",
        Colour::Green,
        &summary.productive,
        summary.productive_secs,
    ));
    lines.extend(render_category(
        "Unproductive",
        Colour::Red,
        &summary.unproductive,
        summary.unproductive_secs,
    ));
    lines.extend(render_category(
        "Uncategorized",
        Colour::Yellow,
        &summary.uncategorized,
        summary.uncategorized_secs,
    ));

    if !summary.background.is_empty() {
        lines.push(format!(
            "{} {} ({} playing)",
            Colour::Purple.bold().paint("Background media"),
            format_seconds(summary.background_secs as i64),
            format_seconds(summary.playing_secs as i64)
        ));
        for (site, seconds) in &summary.background {
            let playing = summary.playing.get(site).copied().unwrap_or(0);
            lines.push(format!(
                "  {}\t{site} ({} playing)",
                format_seconds(*seconds as i64),
                format_seconds(playing as i64)
            ));
        }
    }

    match (summary.productive_share, summary.score) {
        (Some(share), Some(score)) => {
            lines.push(format!("Productive share {share:.1}% ({score})"))
        }
        _ => lines.push("Nothing categorized yet".into()),
    }

    let sessions = &summary.session_summary;
    lines.push(format!(
        "Sessions {} ({} ongoing), logged {}",
        sessions.total_sessions,
        sessions.ongoing_sessions,
        format_seconds(sessions.total_logged_secs)
    ));
    lines
}

fn render_decision(mode: impl Display, decision: &TimingDecision) -> String {
    let state = if decision.due {
        Colour::Green.paint("due")
    } else {
        Colour::Blue.paint("not due")
    };
    format!("Report {mode}: {state}, {}", decision.reason)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{NaiveDate, TimeZone, Utc};

    use crate::daemon::{
        collection::background::{BackgroundTotals, Site},
        report::{scheduler::TimingDecision, summary::ProductivitySummary},
    };

    use super::{render_decision, render_summary};

    fn summary() -> ProductivitySummary {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let foreground = BTreeMap::from([
            ("Code.exe - main.rs - Visual Studio Code".into(), 3600),
            ("chrome.exe - Reddit - Google Chrome".into(), 600),
        ]);
        let background = BackgroundTotals {
            visible: BTreeMap::from([(Site::new("YouTube"), 900)]),
            playing: BTreeMap::from([(Site::new("YouTube"), 300)]),
        };
        ProductivitySummary::build(
            date,
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            &foreground,
            &background,
            vec![],
            date.and_hms_opt(12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn summary_lists_categories_and_media() {
        let text = render_summary(&summary()).join("\n");
        assert!(text.contains("Code.exe - main.rs - Visual Studio Code"));
        assert!(text.contains("Reddit"));
        assert!(text.contains("YouTube (5m playing)"));
        assert!(text.contains("Sessions 0 (0 ongoing)"));
    }

    #[test]
    fn empty_day_says_so() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let empty = ProductivitySummary::build(
            date,
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            &BTreeMap::new(),
            &BackgroundTotals::default(),
            vec![],
            date.and_hms_opt(12, 0, 0).unwrap(),
        );
        let text = render_summary(&empty).join("\n");
        assert!(text.starts_with("0s tracked on 2025-06-01"));
        assert!(text.contains("Nothing categorized yet"));
    }

    #[test]
    fn decision_carries_the_reason() {
        let line = render_decision(
            "every 3m",
            &TimingDecision {
                due: false,
                reason: "Interval not elapsed".into(),
            },
        );
        assert!(line.starts_with("Report every 3m: "));
        assert!(line.ends_with("Interval not elapsed"));
    }
}
