use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use clap::{CommandFactory, Parser};
use tracing::info;

use crate::{
    daemon::{
        config::EngineConfig,
        sessions::{
            marker::{parse_marker_lines, SessionMarker},
            reconstruct::{LoginSession, SessionReconstructor},
            summary::summarize,
        },
        storage::activity_log::ActivityLogImpl,
        ACTIVITY_DIR,
    },
    utils::time::{format_seconds, record_name_to_date},
};

use super::Args;

const SESSION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Parser)]
pub struct SessionsCommand {
    #[arg(long, short, help = "Day to rebuild, YYYY-MM-DD. Today by default")]
    date: Option<String>,
    #[arg(
        long,
        short,
        conflicts_with = "date",
        help = "Text file with lines like \"[2025-06-01 09:00:00] User logged in\""
    )]
    file: Option<PathBuf>,
    #[arg(long, help = "Split sessions longer than this many hours. Defaults to config.toml")]
    chunk_hours: Option<u32>,
}

/// Rebuilds sessions either from the daemon's activity log of a day or from an exported file.
pub async fn process_sessions_command(
    app_dir: &Path,
    SessionsCommand {
        date,
        file,
        chunk_hours,
    }: SessionsCommand,
) -> Result<()> {
    let config = EngineConfig::load(app_dir);
    let chunk = chunk_hours
        .filter(|h| *h > 0)
        .and_then(|h| Duration::try_hours(h.into()))
        .unwrap_or(config.sessions.chunk);
    let now = Local::now().naive_local();

    let (markers, now) = match (file, date) {
        (Some(file), _) => {
            let text = tokio::fs::read_to_string(&file).await?;
            let markers = markers_from_text(&text);
            info!("Read {} markers from {file:?}", markers.len());
            (markers, now)
        }
        (None, date) => {
            let date = match date {
                Some(date) => parse_date(&date)?,
                None => now.date(),
            };
            let log = ActivityLogImpl::new(app_dir.join(ACTIVITY_DIR))?;
            (log.markers_for(date).await?, now.min(end_of_day(date)))
        }
    };

    let sessions = SessionReconstructor::new(chunk).reconstruct(markers, now);
    for line in render_sessions(&sessions, now) {
        println!("{line}");
    }
    Ok(())
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    record_name_to_date(text.trim()).ok_or_else(|| {
        Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate date {text}, expected YYYY-MM-DD"),
            )
            .into()
    })
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::days(1)
}

/// Lines that aren't markers are skipped.
pub fn markers_from_text(text: &str) -> Vec<SessionMarker> {
    parse_marker_lines(text.lines())
}

pub fn render_sessions(sessions: &[LoginSession], now: NaiveDateTime) -> Vec<String> {
    if sessions.is_empty() {
        return vec!["No sessions".into()];
    }
    let mut lines = vec!["Login\t\t\tLogout\t\t\tDuration\tType".to_string()];
    for session in sessions {
        let logout = session
            .logout
            .map(|at| at.format(SESSION_TIME_FORMAT).to_string())
            .unwrap_or_else(|| "-\t\t".into());
        lines.push(format!(
            "{}\t{logout}\t{}\t\t{}",
            session.login.format(SESSION_TIME_FORMAT),
            format_seconds(session.elapsed(now).num_seconds()),
            session.kind
        ));
    }

    let summary = summarize(sessions, now);
    lines.push(String::new());
    lines.push(format!(
        "Completed {}, ongoing {}, logged {}",
        summary.completed_sessions,
        summary.ongoing_sessions,
        format_seconds(summary.total_logged_secs)
    ));
    if summary.completed_sessions > 0 {
        lines.push(format!(
            "Average {}, longest {}, shortest {}",
            format_seconds(summary.average_secs),
            format_seconds(summary.longest_secs),
            format_seconds(summary.shortest_secs)
        ));
    }
    if summary.chains > 0 {
        lines.push(format!(
            "Chains {}, longest continuous {}",
            summary.chains,
            format_seconds(summary.longest_continuous_secs)
        ));
    }
    lines
}
