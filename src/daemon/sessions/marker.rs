use std::fmt::Display;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const MARKER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Login,
    Logout,
    Startup,
    Shutdown,
}

impl MarkerKind {
    pub fn opens_session(self) -> bool {
        matches!(self, MarkerKind::Login | MarkerKind::Startup)
    }

    fn phrase(self) -> &'static str {
        match self {
            MarkerKind::Login => "User logged in",
            MarkerKind::Logout => "User logged out",
            MarkerKind::Startup => "System startup detected",
            MarkerKind::Shutdown => "System shutdown detected",
        }
    }

    fn from_text(text: &str) -> Option<Self> {
        let text = text.to_lowercase();
        [
            MarkerKind::Login,
            MarkerKind::Logout,
            MarkerKind::Startup,
            MarkerKind::Shutdown,
        ]
        .into_iter()
        .find(|kind| text.contains(&kind.phrase().to_lowercase()))
    }
}

/// A login/logout style boundary at a local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub kind: MarkerKind,
    pub at: NaiveDateTime,
}

impl SessionMarker {
    pub fn new(kind: MarkerKind, at: NaiveDateTime) -> Self {
        Self { kind, at }
    }
}

/// Renders the marker as a `[YYYY-MM-DD HH:MM:SS] User logged in` style line.
impl Display for SessionMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.at.format(MARKER_TIME_FORMAT),
            self.kind.phrase()
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParsedLine {
    Marker(SessionMarker),
    /// Timestamp is fine but the line isn't a session boundary.
    Unknown,
    /// No parseable timestamp.
    Invalid,
}

pub fn parse_marker_line(line: &str) -> ParsedLine {
    let Some(rest) = line.trim_start().strip_prefix('[') else {
        return ParsedLine::Invalid;
    };
    let Some((stamp, text)) = rest.split_once(']') else {
        return ParsedLine::Invalid;
    };
    let Ok(at) = NaiveDateTime::parse_from_str(stamp.trim(), MARKER_TIME_FORMAT) else {
        return ParsedLine::Invalid;
    };
    match MarkerKind::from_text(text) {
        Some(kind) => ParsedLine::Marker(SessionMarker { kind, at }),
        None => ParsedLine::Unknown,
    }
}

/// Keeps only lines that parse into markers.
pub fn parse_marker_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<SessionMarker> {
    lines
        .into_iter()
        .filter_map(|line| match parse_marker_line(line) {
            ParsedLine::Marker(marker) => Some(marker),
            _ => None,
        })
        .collect()
}

/// External producer of login/logout markers, for example an OS event log reader. Each poll
/// returns the markers observed since the previous one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionMarkerSource: Send + Sync {
    async fn poll(&self) -> Result<Vec<SessionMarker>>;
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{parse_marker_line, parse_marker_lines, MarkerKind, ParsedLine, SessionMarker};

    fn at(h: u32, m: u32, s: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn display_parses_back() {
        let marker = SessionMarker::new(MarkerKind::Shutdown, at(15, 55, 31));
        assert_eq!(marker.to_string(), "[2025-06-01 15:55:31] System shutdown detected");
        assert_eq!(parse_marker_line(&marker.to_string()), ParsedLine::Marker(marker));
    }

    #[test]
    fn lines_are_classified() {
        assert_eq!(
            parse_marker_line("[2025-06-01 09:00:00] user LOGGED IN on console"),
            ParsedLine::Marker(SessionMarker::new(MarkerKind::Login, at(9, 0, 0)))
        );
        assert_eq!(
            parse_marker_line("[2025-06-01 09:00:00] Unproductive tab opened: YouTube"),
            ParsedLine::Unknown
        );
        assert_eq!(parse_marker_line("[yesterday] User logged in"), ParsedLine::Invalid);
        assert_eq!(parse_marker_line("User logged in"), ParsedLine::Invalid);
    }

    #[test]
    fn only_markers_are_kept() {
        let markers = parse_marker_lines([
            "[2025-06-01 09:00:00] User logged in",
            "[2025-06-01 25:00:00] User logged out",
            "garbage",
            "[2025-06-01 17:00:00] User logged out",
        ]);
        assert_eq!(
            markers,
            vec![
                SessionMarker::new(MarkerKind::Login, at(9, 0, 0)),
                SessionMarker::new(MarkerKind::Logout, at(17, 0, 0)),
            ]
        );
    }
}
