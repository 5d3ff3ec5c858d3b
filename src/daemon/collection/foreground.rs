use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    daemon::categorize::{categorize, is_system_process, Category},
    utils::clock::Clock,
    window_api::ObservationSource,
};

use super::{
    activity::ActivityKind, collector::{observe, Sampler}, from_seconds, subject::Subject,
    whole_seconds,
};

struct Dwell {
    subject: Subject,
    since: DateTime<Utc>,
}

#[derive(Default)]
struct ForegroundState {
    current: Option<Dwell>,
    times: HashMap<Subject, Duration>,
    /// Side channel for the activity log, independent from `times`.
    unproductive: Option<Dwell>,
}

/// Time slicing state machine over the foreground subject. Time for a subject is only credited
/// when the subject changes (or on stop), and only if the dwell lasted at least `min_dwell`.
pub struct ForegroundAccumulator {
    state: Mutex<ForegroundState>,
    min_dwell: Duration,
}

impl ForegroundAccumulator {
    pub fn new(min_dwell: Duration) -> Self {
        Self {
            state: Mutex::new(ForegroundState::default()),
            min_dwell,
        }
    }

    fn credit(&self, times: &mut HashMap<Subject, Duration>, dwell: Dwell, now: DateTime<Utc>) {
        let elapsed = now - dwell.since;
        if elapsed < self.min_dwell {
            trace!("Dropping {elapsed} of {}", dwell.subject);
            return;
        }
        *times.entry(dwell.subject).or_insert_with(Duration::zero) += elapsed;
    }

    fn track_unproductive(
        state: &mut ForegroundState,
        subject: &Subject,
        category: Category,
        now: DateTime<Utc>,
    ) -> Vec<ActivityKind> {
        let is_unproductive = category == Category::Unproductive;
        let mut events = vec![];
        if matches!(&state.unproductive, Some(d) if is_unproductive && d.subject == *subject) {
            return events;
        }
        if let Some(previous) = state.unproductive.take() {
            events.push(ActivityKind::UnproductiveEnded {
                open_secs: (now - previous.since).num_seconds(),
                subject: previous.subject,
            });
        }
        if is_unproductive {
            events.push(ActivityKind::UnproductiveStarted {
                subject: subject.clone(),
            });
            state.unproductive = Some(Dwell {
                subject: subject.clone(),
                since: now,
            });
        }
        events
    }

    /// Folds one observation in. `None` means the observation failed; it and degenerate or
    /// system subjects leave the current dwell untouched.
    pub fn record_sample(&self, sample: Option<Subject>, now: DateTime<Utc>) -> Vec<ActivityKind> {
        let Some(subject) = sample else {
            return vec![];
        };
        if subject.is_degenerate() || is_system_process(subject.as_str()) {
            trace!("Ignoring sample {subject}");
            return vec![];
        }
        let category = categorize(subject.as_str());

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let events = Self::track_unproductive(state, &subject, category, now);

        if state.current.as_ref().is_some_and(|d| d.subject == subject) {
            return events;
        }
        if let Some(previous) = state.current.take() {
            self.credit(&mut state.times, previous, now);
        }
        debug!("Foreground switched to {subject}");
        state.current = Some(Dwell {
            subject,
            since: now,
        });
        events
    }

    /// Final flush of whatever is current. Also closes an open unproductive dwell.
    pub fn stop(&self, now: DateTime<Utc>) -> Vec<ActivityKind> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(current) = state.current.take() {
            self.credit(&mut state.times, current, now);
        }
        state
            .unproductive
            .take()
            .map(|previous| ActivityKind::UnproductiveEnded {
                open_secs: (now - previous.since).num_seconds(),
                subject: previous.subject,
            })
            .into_iter()
            .collect()
    }

    /// Credited totals, rounded to whole seconds.
    pub fn times(&self) -> BTreeMap<Subject, u64> {
        let state = self.state.lock();
        state
            .times
            .iter()
            .map(|(subject, duration)| (subject.clone(), whole_seconds(*duration)))
            .collect()
    }

    /// Like [ForegroundAccumulator::times] but also counts the running dwell up to `now`. Doesn't
    /// change any state.
    pub fn times_at(&self, now: DateTime<Utc>) -> BTreeMap<Subject, u64> {
        let state = self.state.lock();
        let mut times = state.times.clone();
        if let Some(current) = &state.current {
            let elapsed = now - current.since;
            if elapsed >= self.min_dwell {
                *times
                    .entry(current.subject.clone())
                    .or_insert_with(Duration::zero) += elapsed;
            }
        }
        times
            .into_iter()
            .map(|(subject, duration)| (subject, whole_seconds(duration)))
            .collect()
    }

    pub fn current_subject(&self) -> Option<Subject> {
        self.state.lock().current.as_ref().map(|d| d.subject.clone())
    }

    /// Replaces credited totals with restored ones.
    pub fn restore(&self, times: BTreeMap<Subject, f64>) {
        let mut state = self.state.lock();
        state.times = times
            .into_iter()
            .map(|(subject, seconds)| (subject, from_seconds(seconds)))
            .collect();
    }

    /// Starts a new day: forgets totals, the running dwell restarts at `now`.
    pub fn reset(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.times.clear();
        if let Some(current) = state.current.as_mut() {
            current.since = now;
        }
    }
}

pub struct ForegroundSampler {
    source: Arc<dyn ObservationSource>,
    accumulator: Arc<ForegroundAccumulator>,
    timeout: std::time::Duration,
}

impl ForegroundSampler {
    pub fn new(
        source: Arc<dyn ObservationSource>,
        accumulator: Arc<ForegroundAccumulator>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            source,
            accumulator,
            timeout,
        }
    }
}

#[async_trait]
impl Sampler for ForegroundSampler {
    fn name(&self) -> &'static str {
        "foreground"
    }

    async fn tick(&mut self, clock: &dyn Clock) -> Vec<ActivityKind> {
        let sample = observe(&self.source, self.timeout, "foreground window", |s| {
            s.active_window()
        })
        .await
        .map(|window| Subject::from_window(&window));
        self.accumulator.record_sample(sample, clock.time())
    }

    fn finish(&mut self, clock: &dyn Clock) -> Vec<ActivityKind> {
        self.accumulator.stop(clock.time())
    }
}
