use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::daemon::sessions::marker::{MarkerKind, SessionMarker};

use super::{background::Site, subject::Subject};

/// Transitions worth a line in the activity log. None of these affect accumulated time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityKind {
    UnproductiveStarted {
        subject: Subject,
    },
    UnproductiveEnded {
        subject: Subject,
        open_secs: i64,
    },
    MediaDetected {
        site: Site,
        browser: Arc<str>,
        session_id: Arc<str>,
        playing: bool,
    },
    MediaStartedPlaying {
        site: Site,
        session_id: Arc<str>,
    },
    MediaStoppedPlaying {
        site: Site,
        session_id: Arc<str>,
    },
    MediaStopped {
        site: Site,
        session_id: Arc<str>,
        total_secs: i64,
        playing_secs: i64,
        /// Closed because the daemon stopped, not because the window went away.
        shutdown: bool,
    },
    Marker {
        marker: MarkerKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub moment: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ActivityKind,
}

impl ActivityEvent {
    pub fn new(moment: DateTime<Utc>, kind: ActivityKind) -> Self {
        Self { moment, kind }
    }

    pub fn marker(moment: DateTime<Utc>, kind: MarkerKind) -> Self {
        Self::new(moment, ActivityKind::Marker { marker: kind })
    }

    pub fn local_moment(&self) -> NaiveDateTime {
        self.moment.with_timezone(&Local).naive_local()
    }

    /// Session boundary carried by this event, in local time.
    pub fn as_session_marker(&self) -> Option<SessionMarker> {
        match self.kind {
            ActivityKind::Marker { marker } => Some(SessionMarker::new(marker, self.local_moment())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::daemon::sessions::marker::MarkerKind;

    use super::{ActivityEvent, ActivityKind};

    #[test]
    fn events_are_single_json_objects() {
        let moment = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let event = ActivityEvent::new(
            moment,
            ActivityKind::UnproductiveEnded {
                subject: "chrome.exe - YouTube".into(),
                open_secs: 42,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"unproductive_ended""#));
        assert!(json.contains(r#""subject":"chrome.exe - YouTube""#));
        assert_eq!(serde_json::from_str::<ActivityEvent>(&json).unwrap(), event);
    }

    #[test]
    fn only_markers_become_session_markers() {
        let moment = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let marker = ActivityEvent::marker(moment, MarkerKind::Startup);
        assert_eq!(marker.as_session_marker().map(|m| m.kind), Some(MarkerKind::Startup));

        let other = ActivityEvent::new(
            moment,
            ActivityKind::UnproductiveStarted {
                subject: "x.exe - reddit".into(),
            },
        );
        assert_eq!(other.as_session_marker(), None);
    }
}
