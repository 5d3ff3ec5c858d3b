use std::{path::Path, sync::Arc};

use ansi_term::Colour;
use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveTime};
use clap::Parser;
use futures::{stream, StreamExt};

use crate::{
    daemon::{
        config::EngineConfig,
        report::summary::{ProductivitySummary, ScoreLevel},
        storage::{snapshot_store::SnapshotStore, timing_state::TimingStateStore},
        SNAPSHOT_DIR, TIMING_STATE_FILE,
    },
    utils::{
        clock::{Clock, DefaultClock},
        time::format_seconds,
    },
};

#[derive(Debug, Parser)]
pub struct HistoryCommand {
    #[arg(long, short, default_value_t = 7, help = "How many days back, today included")]
    days: u32,
}

/// Prints one line per day that has a dated record, newest first.
pub async fn process_history_command(
    app_dir: &Path,
    HistoryCommand { days }: HistoryCommand,
) -> Result<()> {
    let config = EngineConfig::load(app_dir);
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let snapshots = Arc::new(SnapshotStore::new(
        app_dir.join(SNAPSHOT_DIR),
        config.storage.dated_backups,
        clock.clone(),
    )?);
    let timing = TimingStateStore::new(app_dir.join(TIMING_STATE_FILE), clock.clone())
        .load()
        .await;

    let today = clock.local_time().date();
    let generated_at = clock.time();
    let summaries = stream::iter(recent_dates(today, days))
        .map(|date| {
            let snapshots = snapshots.clone();
            async move { (date, snapshots.load_historical(date).await) }
        })
        .buffered(4)
        .filter_map(|(date, record)| async move {
            let record = record?;
            let end_of_day = date.and_time(NaiveTime::MIN) + Duration::days(1);
            Some(ProductivitySummary::build(
                date,
                generated_at,
                &record.foreground_secs(),
                &record.background_totals(),
                vec![],
                end_of_day,
            ))
        })
        .collect::<Vec<_>>()
        .await;

    if summaries.is_empty() {
        println!("No dated records in the last {days} days");
    }
    for summary in summaries {
        println!("{}", history_line(&summary, timing.was_sent(summary.date)));
    }
    Ok(())
}

/// `today` and the `days - 1` days before it, newest first.
fn recent_dates(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days as i64)
        .filter_map(|back| today.checked_sub_signed(Duration::days(back)))
        .collect()
}

fn score_colour(score: Option<ScoreLevel>) -> Colour {
    match score {
        Some(ScoreLevel::Excellent) | Some(ScoreLevel::Good) => Colour::Green,
        Some(ScoreLevel::Fair) => Colour::Yellow,
        Some(ScoreLevel::NeedsImprovement) => Colour::Red,
        None => Colour::White,
    }
}

pub fn history_line(summary: &ProductivitySummary, sent: bool) -> String {
    let share = match (summary.productive_share, summary.score) {
        (Some(share), Some(score)) => format!("{share:.0}% {score}"),
        _ => "-".into(),
    };
    format!(
        "{}\t{}\tproductive {}\tunproductive {}\tplaying {}\t{}{}",
        summary.date,
        format_seconds(summary.tracked_secs() as i64),
        format_seconds(summary.productive_secs as i64),
        format_seconds(summary.unproductive_secs as i64),
        format_seconds(summary.playing_secs as i64),
        score_colour(summary.score).paint(share),
        if sent { "\treported" } else { "" }
    )
}
