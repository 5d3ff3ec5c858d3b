use std::{collections::BTreeMap, fmt::Display};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    daemon::{
        categorize::{categorize, Category},
        collection::{
            background::{BackgroundTotals, Site},
            subject::Subject,
        },
        sessions::{
            reconstruct::LoginSession,
            summary::{summarize, SessionSummary},
        },
    },
    utils::percentage::{seconds_percentage, Percentage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreLevel {
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
}

impl ScoreLevel {
    pub fn from_share(share: Percentage) -> Self {
        match *share {
            s if s >= 80. => ScoreLevel::Excellent,
            s if s >= 70. => ScoreLevel::Good,
            s if s >= 60. => ScoreLevel::Fair,
            _ => ScoreLevel::NeedsImprovement,
        }
    }
}

impl Display for ScoreLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScoreLevel::Excellent => "excellent",
            ScoreLevel::Good => "good",
            ScoreLevel::Fair => "fair",
            ScoreLevel::NeedsImprovement => "needs improvement",
        })
    }
}

/// Everything a report is made of. Seconds are whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivitySummary {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,

    pub productive: BTreeMap<Subject, u64>,
    pub unproductive: BTreeMap<Subject, u64>,
    pub uncategorized: BTreeMap<Subject, u64>,
    pub productive_secs: u64,
    pub unproductive_secs: u64,
    pub uncategorized_secs: u64,
    /// Productive share of categorized time, background playback counted as unproductive.
    /// `None` when nothing was categorized.
    pub productive_share: Option<f64>,
    pub score: Option<ScoreLevel>,

    pub background: BTreeMap<Site, u64>,
    pub playing: BTreeMap<Site, u64>,
    pub background_secs: u64,
    pub playing_secs: u64,

    pub sessions: Vec<LoginSession>,
    pub session_summary: SessionSummary,
}

impl ProductivitySummary {
    pub fn build(
        date: NaiveDate,
        generated_at: DateTime<Utc>,
        foreground: &BTreeMap<Subject, u64>,
        background: &BackgroundTotals,
        sessions: Vec<LoginSession>,
        now: NaiveDateTime,
    ) -> Self {
        let mut productive = BTreeMap::new();
        let mut unproductive = BTreeMap::new();
        let mut uncategorized = BTreeMap::new();
        for (subject, seconds) in foreground {
            let target = match categorize(subject.as_str()) {
                Category::Productive => &mut productive,
                Category::Unproductive => &mut unproductive,
                Category::Uncategorized => &mut uncategorized,
                Category::Ignored => continue,
            };
            target.insert(subject.clone(), *seconds);
        }

        let productive_secs = productive.values().sum::<u64>();
        let unproductive_secs = unproductive.values().sum::<u64>();
        let uncategorized_secs = uncategorized.values().sum::<u64>();
        let playing_secs = background.playing.values().sum::<u64>();

        let scored = productive_secs + unproductive_secs + playing_secs;
        let productive_share =
            (scored > 0).then(|| seconds_percentage(productive_secs, scored));

        Self {
            date,
            generated_at,
            productive,
            unproductive,
            uncategorized,
            productive_secs,
            unproductive_secs,
            uncategorized_secs,
            productive_share: productive_share.map(|p| *p),
            score: productive_share.map(ScoreLevel::from_share),
            background_secs: background.visible.values().sum(),
            playing_secs,
            background: background.visible.clone(),
            playing: background.playing.clone(),
            session_summary: summarize(&sessions, now),
            sessions,
        }
    }

    pub fn tracked_secs(&self) -> u64 {
        self.productive_secs + self.unproductive_secs + self.uncategorized_secs
    }

    pub fn is_empty(&self) -> bool {
        self.tracked_secs() == 0 && self.background_secs == 0 && self.sessions.is_empty()
    }
}
