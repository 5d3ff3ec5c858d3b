use std::fmt::Display;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::marker::{MarkerKind, SessionMarker};

pub const DEFAULT_CHUNK: Duration = Duration::hours(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "part", rename_all = "snake_case")]
pub enum SessionKind {
    Normal,
    /// Opened by a system startup rather than a login.
    Startup,
    /// A second login arrived before a logout. Bounded by that second login.
    Incomplete,
    /// Logout without a login. Zero length.
    Orphaned,
    /// Still open, no logout yet.
    Ongoing,
    /// One chunk of a long session. Takes the place of whatever tag the whole session would have
    /// had, so a long `Startup` or `Incomplete` session comes out as plain parts.
    Part(u32),
    /// Trailing, still open chunk of a long session.
    OngoingPart(u32),
}

impl SessionKind {
    pub fn part(self) -> Option<u32> {
        match self {
            SessionKind::Part(n) | SessionKind::OngoingPart(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_ongoing(self) -> bool {
        matches!(self, SessionKind::Ongoing | SessionKind::OngoingPart(_))
    }
}

impl Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKind::Normal => f.write_str("Normal"),
            SessionKind::Startup => f.write_str("Startup"),
            SessionKind::Incomplete => f.write_str("Incomplete"),
            SessionKind::Orphaned => f.write_str("Orphaned"),
            SessionKind::Ongoing => f.write_str("Ongoing"),
            SessionKind::Part(n) => write!(f, "Part {n}"),
            SessionKind::OngoingPart(n) => write!(f, "Ongoing (Part {n})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSession {
    pub login: NaiveDateTime,
    pub logout: Option<NaiveDateTime>,
    pub kind: SessionKind,
}

impl LoginSession {
    fn closed(login: NaiveDateTime, logout: NaiveDateTime, kind: SessionKind) -> Self {
        Self {
            login,
            logout: Some(logout),
            kind,
        }
    }

    fn open(login: NaiveDateTime, kind: SessionKind) -> Self {
        Self {
            login,
            logout: None,
            kind,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.logout.is_some()
    }

    /// Defined only for sessions with a logout.
    pub fn duration(&self) -> Option<Duration> {
        self.logout.map(|logout| logout - self.login)
    }

    /// Like [LoginSession::duration], but open sessions are measured up to `now`.
    pub fn elapsed(&self, now: NaiveDateTime) -> Duration {
        self.duration()
            .unwrap_or_else(|| (now - self.login).max(Duration::zero()))
    }
}

/// Rebuilds sessions out of an unordered stream of markers. Long sessions are cut into
/// `chunk` sized parts without losing any time.
#[derive(Debug, Clone, Copy)]
pub struct SessionReconstructor {
    chunk: Duration,
}

impl Default for SessionReconstructor {
    fn default() -> Self {
        Self {
            chunk: DEFAULT_CHUNK,
        }
    }
}

impl SessionReconstructor {
    pub fn new(chunk: Duration) -> Self {
        if chunk <= Duration::zero() {
            return Self::default();
        }
        Self { chunk }
    }

    pub fn reconstruct(
        &self,
        markers: impl IntoIterator<Item = SessionMarker>,
        now: NaiveDateTime,
    ) -> Vec<LoginSession> {
        let mut markers = markers.into_iter().collect::<Vec<_>>();
        markers.sort_by_key(|m| m.at);

        let mut sessions = vec![];
        let mut pending: Option<SessionMarker> = None;

        for marker in markers {
            if marker.kind.opens_session() {
                if let Some(previous) = pending.take() {
                    debug!("Login at {} has no logout before {}", previous.at, marker.at);
                    self.segment(previous.at, marker.at, SessionKind::Incomplete, &mut sessions);
                }
                pending = Some(marker);
                continue;
            }

            match pending.take() {
                Some(login) => {
                    let kind = match login.kind {
                        MarkerKind::Startup => SessionKind::Startup,
                        _ => SessionKind::Normal,
                    };
                    self.segment(login.at, marker.at, kind, &mut sessions);
                }
                None => {
                    sessions.push(LoginSession::closed(
                        marker.at,
                        marker.at,
                        SessionKind::Orphaned,
                    ));
                }
            }
        }

        if let Some(login) = pending {
            self.ongoing(login.at, now, &mut sessions);
        }

        sessions
    }

    fn segment(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        kind: SessionKind,
        into: &mut Vec<LoginSession>,
    ) {
        if end - start <= self.chunk {
            into.push(LoginSession::closed(start, end, kind));
            return;
        }
        let (last_start, part) = self.full_chunks(start, end, into);
        into.push(LoginSession::closed(last_start, end, SessionKind::Part(part)));
    }

    fn ongoing(&self, start: NaiveDateTime, now: NaiveDateTime, into: &mut Vec<LoginSession>) {
        if now - start <= self.chunk {
            into.push(LoginSession::open(start, SessionKind::Ongoing));
            return;
        }
        let (last_start, part) = self.full_chunks(start, now, into);
        into.push(LoginSession::open(last_start, SessionKind::OngoingPart(part)));
    }

    /// Emits whole chunks while more than a chunk remains. Returns where the remainder starts and
    /// its part number.
    fn full_chunks(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        into: &mut Vec<LoginSession>,
    ) -> (NaiveDateTime, u32) {
        let mut current = start;
        let mut part = 1;
        while end - current > self.chunk {
            let chunk_end = current + self.chunk;
            into.push(LoginSession::closed(current, chunk_end, SessionKind::Part(part)));
            current = chunk_end;
            part += 1;
        }
        (current, part)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    use crate::daemon::sessions::marker::{MarkerKind, SessionMarker};

    use super::{LoginSession, SessionKind, SessionReconstructor};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn marker(kind: MarkerKind, at: NaiveDateTime) -> SessionMarker {
        SessionMarker::new(kind, at)
    }

    #[test]
    fn long_session_is_split_into_parts() {
        let sessions = SessionReconstructor::default().reconstruct(
            [
                marker(MarkerKind::Login, at(8, 0)),
                marker(MarkerKind::Logout, at(17, 0)),
            ],
            at(23, 0),
        );

        let durations = sessions
            .iter()
            .map(|s| s.duration().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            durations,
            vec![Duration::hours(4), Duration::hours(4), Duration::hours(1)]
        );
        assert_eq!(
            sessions.iter().map(|s| s.kind).collect::<Vec<_>>(),
            vec![
                SessionKind::Part(1),
                SessionKind::Part(2),
                SessionKind::Part(3)
            ]
        );
        assert_eq!(sessions[0].login, at(8, 0));
        assert_eq!(sessions[2].logout, Some(at(17, 0)));
    }

    #[test]
    fn exact_multiple_of_chunk_keeps_all_time() {
        let sessions = SessionReconstructor::default().reconstruct(
            [
                marker(MarkerKind::Startup, at(8, 0)),
                marker(MarkerKind::Shutdown, at(16, 0)),
            ],
            at(23, 0),
        );
        assert_eq!(sessions.len(), 2);
        let total = sessions
            .iter()
            .map(|s| s.duration().unwrap())
            .fold(Duration::zero(), |a, b| a + b);
        assert_eq!(total, Duration::hours(8));
    }

    #[test]
    fn orphaned_logout() {
        let sessions = SessionReconstructor::default()
            .reconstruct([marker(MarkerKind::Logout, at(10, 0))], at(12, 0));
        assert_eq!(
            sessions,
            vec![LoginSession {
                login: at(10, 0),
                logout: Some(at(10, 0)),
                kind: SessionKind::Orphaned,
            }]
        );
        assert_eq!(sessions[0].duration(), Some(Duration::zero()));
    }

    #[test]
    fn repeated_login_is_incomplete_then_ongoing() {
        let sessions = SessionReconstructor::default().reconstruct(
            [
                marker(MarkerKind::Login, at(9, 5)),
                marker(MarkerKind::Login, at(9, 0)),
            ],
            at(10, 0),
        );
        assert_eq!(
            sessions,
            vec![
                LoginSession {
                    login: at(9, 0),
                    logout: Some(at(9, 5)),
                    kind: SessionKind::Incomplete,
                },
                LoginSession {
                    login: at(9, 5),
                    logout: None,
                    kind: SessionKind::Ongoing,
                },
            ]
        );
        assert_eq!(sessions[1].duration(), None);
        assert_eq!(sessions[1].elapsed(at(10, 0)), Duration::minutes(55));
    }

    #[test]
    fn long_ongoing_session_ends_with_open_part() {
        let sessions = SessionReconstructor::new(Duration::hours(4))
            .reconstruct([marker(MarkerKind::Startup, at(1, 0))], at(10, 30));
        assert_eq!(
            sessions.iter().map(|s| s.kind).collect::<Vec<_>>(),
            vec![
                SessionKind::Part(1),
                SessionKind::Part(2),
                SessionKind::OngoingPart(3)
            ]
        );
        assert_eq!(sessions[2].kind.to_string(), "Ongoing (Part 3)");
        let total = sessions
            .iter()
            .map(|s| s.elapsed(at(10, 30)))
            .fold(Duration::zero(), |a, b| a + b);
        assert_eq!(total, Duration::minutes(9 * 60 + 30));
    }

    #[test]
    fn startup_session_keeps_its_kind() {
        let sessions = SessionReconstructor::default().reconstruct(
            [
                marker(MarkerKind::Startup, at(8, 0)),
                marker(MarkerKind::Logout, at(9, 0)),
                marker(MarkerKind::Login, at(9, 30)),
                marker(MarkerKind::Shutdown, at(11, 0)),
            ],
            at(12, 0),
        );
        assert_eq!(
            sessions.iter().map(|s| s.kind).collect::<Vec<_>>(),
            vec![SessionKind::Startup, SessionKind::Normal]
        );
    }

    #[test]
    fn parts_replace_the_session_tag() {
        let sessions = SessionReconstructor::new(Duration::hours(4)).reconstruct(
            [
                marker(MarkerKind::Startup, at(1, 0)),
                marker(MarkerKind::Login, at(6, 0)),
                marker(MarkerKind::Logout, at(7, 0)),
            ],
            at(8, 0),
        );
        assert_eq!(
            sessions.iter().map(|s| s.kind).collect::<Vec<_>>(),
            vec![
                SessionKind::Part(1),
                SessionKind::Part(2),
                SessionKind::Normal
            ]
        );
        assert_eq!(sessions[1].logout, Some(at(6, 0)));
    }

    #[test]
    fn non_positive_chunk_falls_back_to_default() {
        let sessions = SessionReconstructor::new(Duration::zero()).reconstruct(
            [
                marker(MarkerKind::Login, at(8, 0)),
                marker(MarkerKind::Logout, at(11, 0)),
            ],
            at(12, 0),
        );
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].kind, SessionKind::Normal);
    }
}
