use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::reconstruct::{LoginSession, SessionKind};

/// Aggregate view over reconstructed sessions. Durations are whole seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub ongoing_sessions: usize,
    /// Sum over completed sessions only.
    pub total_logged_secs: i64,
    pub average_secs: i64,
    pub longest_secs: i64,
    pub shortest_secs: i64,
    /// Number of long sessions that were cut into parts.
    pub chains: usize,
    pub chained_sessions: usize,
    /// Longest uninterrupted stretch, whether a whole chain or a single session.
    pub longest_continuous_secs: i64,
}

pub fn summarize(sessions: &[LoginSession], now: NaiveDateTime) -> SessionSummary {
    let completed = sessions
        .iter()
        .filter_map(|s| s.duration())
        .map(|d| d.num_seconds())
        .collect::<Vec<_>>();
    let total_logged_secs = completed.iter().sum::<i64>();

    let stretches = continuous_stretches(sessions, now);

    SessionSummary {
        total_sessions: sessions.len(),
        completed_sessions: completed.len(),
        ongoing_sessions: sessions.iter().filter(|s| s.kind.is_ongoing()).count(),
        total_logged_secs,
        average_secs: if completed.is_empty() {
            0
        } else {
            total_logged_secs / completed.len() as i64
        },
        longest_secs: completed.iter().copied().max().unwrap_or(0),
        shortest_secs: completed.iter().copied().min().unwrap_or(0),
        chains: stretches.iter().filter(|s| s.parts > 0).count(),
        chained_sessions: sessions.iter().filter(|s| s.kind.part().is_some()).count(),
        longest_continuous_secs: stretches
            .iter()
            .map(|s| s.duration.num_seconds())
            .max()
            .unwrap_or(0),
    }
}

struct Stretch {
    parts: usize,
    duration: Duration,
}

/// Groups consecutive parts of one chain together. A `Part 1` always opens a new chain.
fn continuous_stretches(sessions: &[LoginSession], now: NaiveDateTime) -> Vec<Stretch> {
    let mut stretches: Vec<Stretch> = vec![];
    let mut in_chain = false;
    for session in sessions {
        let elapsed = session.elapsed(now);
        match session.kind.part() {
            Some(n) if in_chain && n > 1 => {
                if let Some(last) = stretches.last_mut() {
                    last.parts += 1;
                    last.duration += elapsed;
                }
            }
            Some(_) => {
                in_chain = true;
                stretches.push(Stretch {
                    parts: 1,
                    duration: elapsed,
                });
            }
            None => {
                in_chain = false;
                if session.kind != SessionKind::Orphaned {
                    stretches.push(Stretch {
                        parts: 0,
                        duration: elapsed,
                    });
                }
            }
        }
    }
    stretches
}
