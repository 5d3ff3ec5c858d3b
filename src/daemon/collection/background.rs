use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Display,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    daemon::categorize::is_browser_process,
    utils::clock::Clock,
    window_api::{ObservationSource, VisibleWindow, WindowId},
};

use super::{
    activity::ActivityKind,
    collector::{observe, Sampler},
    from_seconds, whole_seconds,
};

/// Checked in order, the first hit names the site.
const STREAMING_SITES: &[&str] = &[
    "youtube",
    "youtu.be",
    "netflix",
    "hulu",
    "disney",
    "twitch",
    "vimeo",
    "tiktok",
    "instagram",
    "facebook",
    "twitter",
    "dailymotion",
    "vevo",
    "crunchyroll",
    "funimation",
    "amazon prime",
    "paramount",
    "peacock",
    "hbo max",
    "apple tv",
    "spotify",
    "soundcloud",
    "pandora",
];

/// Display label of a streaming site, e.g. `YouTube`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Site(Arc<str>);

impl Site {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_pattern(pattern: &str) -> Self {
        let label = match pattern {
            "youtube" | "youtu.be" => "YouTube".to_string(),
            "netflix" => "Netflix".to_string(),
            "hulu" => "Hulu".to_string(),
            "disney" => "Disney+".to_string(),
            "twitch" => "Twitch".to_string(),
            "tiktok" => "TikTok".to_string(),
            "instagram" => "Instagram".to_string(),
            "facebook" => "Facebook".to_string(),
            "twitter" => "Twitter/X".to_string(),
            "spotify" => "Spotify".to_string(),
            "soundcloud" => "SoundCloud".to_string(),
            "amazon prime" => "Amazon Prime".to_string(),
            other => title_case(other),
        };
        Self(label.into())
    }
}

impl Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Site {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn detect_site(title: &str) -> Option<Site> {
    let title = title.to_lowercase();
    STREAMING_SITES
        .iter()
        .find(|site| title.contains(*site))
        .map(|site| Site::from_pattern(site))
}

/// Browser window in the background showing a streaming site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaWindow {
    pub window_id: WindowId,
    pub process_id: u32,
    pub browser: Arc<str>,
    pub site: Site,
}

pub fn media_windows(windows: &[VisibleWindow]) -> Vec<MediaWindow> {
    windows
        .iter()
        .filter(|w| !w.is_foreground && is_browser_process(&w.process_name))
        .filter_map(|w| {
            detect_site(&w.title).map(|site| MediaWindow {
                window_id: w.window_id,
                process_id: w.process_id,
                browser: w.process_name.clone(),
                site,
            })
        })
        .collect()
}

struct MediaSession {
    session_id: Arc<str>,
    process_id: u32,
    started: DateTime<Utc>,
    last_update: DateTime<Utc>,
    playing: bool,
    playing_time: Duration,
}

#[derive(Default)]
struct BackgroundState {
    sessions: HashMap<(WindowId, Site), MediaSession>,
    visible: HashMap<Site, Duration>,
    playing: HashMap<Site, Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundTotals {
    /// Time a media window was open in the background.
    pub visible: BTreeMap<Site, u64>,
    /// Subset of `visible` during which the owning process had an active audio session.
    pub playing: BTreeMap<Site, u64>,
}

fn add(map: &mut HashMap<Site, Duration>, site: &Site, elapsed: Duration) {
    *map.entry(site.clone()).or_insert_with(Duration::zero) += elapsed;
}

fn rounded(map: &HashMap<Site, Duration>) -> BTreeMap<Site, u64> {
    map.iter()
        .map(|(site, duration)| (site.clone(), whole_seconds(*duration)))
        .collect()
}

/// Tracks every background media window at once. Visible time always accrues, verified playing
/// time accrues only while the owning process produces audio.
#[derive(Default)]
pub struct BackgroundAccumulator {
    state: Mutex<BackgroundState>,
}

impl BackgroundAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one enumeration in. `audio` is `None` when audio sessions couldn't be queried, in
    /// which case every session keeps its previous playing state.
    pub fn record_tick(
        &self,
        windows: &[VisibleWindow],
        audio: Option<&HashSet<u32>>,
        now: DateTime<Utc>,
    ) -> Vec<ActivityKind> {
        let candidates = media_windows(windows);
        let mut events = vec![];

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut seen = HashSet::new();

        for candidate in candidates {
            let key = (candidate.window_id, candidate.site.clone());
            if !seen.insert(key.clone()) {
                continue;
            }
            match state.sessions.get_mut(&key) {
                None => {
                    let playing = audio.is_some_and(|a| a.contains(&candidate.process_id));
                    let session_id: Arc<str> = format!(
                        "{}_{}_{}",
                        candidate.browser,
                        candidate.process_id,
                        now.timestamp_millis()
                    )
                    .into();
                    info!(
                        "Background media detected {} in {} (playing: {playing})",
                        candidate.site, candidate.browser
                    );
                    events.push(ActivityKind::MediaDetected {
                        site: candidate.site.clone(),
                        browser: candidate.browser.clone(),
                        session_id: session_id.clone(),
                        playing,
                    });
                    state.sessions.insert(
                        key,
                        MediaSession {
                            session_id,
                            process_id: candidate.process_id,
                            started: now,
                            last_update: now,
                            playing,
                            playing_time: Duration::zero(),
                        },
                    );
                }
                Some(session) => {
                    let playing = audio
                        .map(|a| a.contains(&session.process_id))
                        .unwrap_or(session.playing);
                    let elapsed = (now - session.last_update).max(Duration::zero());
                    session.last_update = now;

                    add(&mut state.visible, &candidate.site, elapsed);
                    if playing {
                        add(&mut state.playing, &candidate.site, elapsed);
                        session.playing_time += elapsed;
                    }

                    if playing != session.playing {
                        let session_id = session.session_id.clone();
                        let site = candidate.site.clone();
                        events.push(if playing {
                            ActivityKind::MediaStartedPlaying { site, session_id }
                        } else {
                            ActivityKind::MediaStoppedPlaying { site, session_id }
                        });
                    }
                    session.playing = playing;
                }
            }
        }

        let gone = state
            .sessions
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect::<Vec<_>>();
        for key in gone {
            if let Some(session) = state.sessions.remove(&key) {
                let (_, site) = key;
                debug!("Background media {site} went away");
                events.push(ActivityKind::MediaStopped {
                    total_secs: (now - session.started).num_seconds(),
                    playing_secs: session.playing_time.num_seconds(),
                    session_id: session.session_id,
                    site,
                    shutdown: false,
                });
            }
        }

        events
    }

    /// Credits the time since each session's last update and closes every session.
    pub fn stop(&self, now: DateTime<Utc>) -> Vec<ActivityKind> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut events = vec![];
        for ((_, site), mut session) in state.sessions.drain() {
            let elapsed = (now - session.last_update).max(Duration::zero());
            add(&mut state.visible, &site, elapsed);
            if session.playing {
                add(&mut state.playing, &site, elapsed);
                session.playing_time += elapsed;
            }
            events.push(ActivityKind::MediaStopped {
                total_secs: (now - session.started).num_seconds(),
                playing_secs: session.playing_time.num_seconds(),
                session_id: session.session_id,
                site,
                shutdown: true,
            });
        }
        events
    }

    pub fn visible_times(&self) -> BTreeMap<Site, u64> {
        rounded(&self.state.lock().visible)
    }

    pub fn playing_times(&self) -> BTreeMap<Site, u64> {
        rounded(&self.state.lock().playing)
    }

    /// Both maps including time since the last tick of every open session. Doesn't change any
    /// state.
    pub fn totals_at(&self, now: DateTime<Utc>) -> BackgroundTotals {
        let state = self.state.lock();
        let mut visible = state.visible.clone();
        let mut playing = state.playing.clone();
        for ((_, site), session) in state.sessions.iter() {
            let elapsed = (now - session.last_update).max(Duration::zero());
            add(&mut visible, site, elapsed);
            if session.playing {
                add(&mut playing, site, elapsed);
            }
        }
        BackgroundTotals {
            visible: rounded(&visible),
            playing: rounded(&playing),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn restore(&self, visible: BTreeMap<Site, f64>, playing: BTreeMap<Site, f64>) {
        let mut state = self.state.lock();
        state.visible = visible
            .into_iter()
            .map(|(site, seconds)| (site, from_seconds(seconds)))
            .collect();
        state.playing = playing
            .into_iter()
            .map(|(site, seconds)| (site, from_seconds(seconds)))
            .collect();
    }

    /// Starts a new day. Open sessions stay open but only count from `now` on.
    pub fn reset(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.visible.clear();
        state.playing.clear();
        for session in state.sessions.values_mut() {
            session.last_update = now;
        }
    }
}

pub struct BackgroundSampler {
    source: Arc<dyn ObservationSource>,
    accumulator: Arc<BackgroundAccumulator>,
    timeout: std::time::Duration,
}

impl BackgroundSampler {
    pub fn new(
        source: Arc<dyn ObservationSource>,
        accumulator: Arc<BackgroundAccumulator>,
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
impl Sampler for BackgroundSampler {
    fn name(&self) -> &'static str {
        "background"
    }

    async fn tick(&mut self, clock: &dyn Clock) -> Vec<ActivityKind> {
        // Without a window list there is nothing to compare against, so the tick is skipped
        // rather than treating every session as closed.
        let Some(windows) = observe(&self.source, self.timeout, "visible windows", |s| {
            s.visible_windows()
        })
        .await
        else {
            return vec![];
        };
        let audio = observe(&self.source, self.timeout, "audio sessions", |s| {
            s.audio_active_processes()
        })
        .await;
        self.accumulator
            .record_tick(&windows, audio.as_ref(), clock.time())
    }

    fn finish(&mut self, clock: &dyn Clock) -> Vec<ActivityKind> {
        self.accumulator.stop(clock.time())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::{
        daemon::collection::activity::ActivityKind,
        window_api::{VisibleWindow, WindowId},
    };

    use super::{detect_site, media_windows, BackgroundAccumulator, Site};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 20, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn window(id: u64, pid: u32, process: &str, title: &str, foreground: bool) -> VisibleWindow {
        VisibleWindow {
            window_id: WindowId(id),
            process_id: pid,
            process_name: process.into(),
            title: title.into(),
            is_foreground: foreground,
        }
    }

    #[test]
    fn first_matching_site_wins() {
        assert_eq!(detect_site("Clip from Netflix - YouTube"), Some(Site::from("YouTube")));
        assert_eq!(detect_site("Late show - Peacock"), Some(Site::from("Peacock")));
        assert_eq!(detect_site("Apple TV+ Originals"), Some(Site::from("Apple Tv")));
        assert_eq!(detect_site("Inbox - Gmail"), None);
    }

    #[test]
    fn only_background_browser_windows_are_candidates() {
        let windows = vec![
            window(1, 10, "chrome.exe", "Song - YouTube - Google Chrome", false),
            window(2, 10, "chrome.exe", "Show - Netflix - Google Chrome", true),
            window(3, 11, "vlc.exe", "youtube-dl output.mkv", false),
            window(4, 12, "firefox", "Docs — Mozilla Firefox", false),
        ];
        let candidates = media_windows(&windows);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].window_id, WindowId(1));
        assert_eq!(candidates[0].site, Site::from("YouTube"));
    }

    #[test]
    fn visible_and_playing_time_accumulate() {
        let acc = BackgroundAccumulator::new();
        let windows = vec![window(1, 10, "chrome.exe", "Song - YouTube", false)];
        let silent = HashSet::new();
        let playing = HashSet::from([10]);

        let events = acc.record_tick(&windows, Some(&silent), t(0));
        assert!(matches!(
            events.as_slice(),
            [ActivityKind::MediaDetected { playing: false, .. }]
        ));

        assert!(acc.record_tick(&windows, Some(&silent), t(10)).is_empty());
        let events = acc.record_tick(&windows, Some(&playing), t(20));
        assert!(matches!(
            events.as_slice(),
            [ActivityKind::MediaStartedPlaying { .. }]
        ));
        // Audio query failed, playing state carries over.
        assert!(acc.record_tick(&windows, None, t(30)).is_empty());

        assert_eq!(acc.visible_times(), BTreeMap::from([(Site::from("YouTube"), 30)]));
        assert_eq!(acc.playing_times(), BTreeMap::from([(Site::from("YouTube"), 20)]));

        let events = acc.record_tick(&[], Some(&silent), t(40));
        match events.as_slice() {
            [ActivityKind::MediaStopped {
                total_secs,
                playing_secs,
                shutdown,
                ..
            }] => {
                assert_eq!(*total_secs, 40);
                assert_eq!(*playing_secs, 20);
                assert!(!shutdown);
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(acc.active_sessions(), 0);
    }

    #[test]
    fn totals_include_pending_time_and_stop_folds_it() {
        let acc = BackgroundAccumulator::new();
        let windows = vec![window(7, 3, "msedge.exe", "Live - Twitch", false)];
        let playing = HashSet::from([3]);
        acc.record_tick(&windows, Some(&playing), t(0));

        let totals = acc.totals_at(t(5));
        assert_eq!(totals.visible, BTreeMap::from([(Site::from("Twitch"), 5)]));
        assert_eq!(totals.playing, BTreeMap::from([(Site::from("Twitch"), 5)]));
        assert!(acc.visible_times().is_empty());

        let events = acc.stop(t(8));
        assert!(matches!(
            events.as_slice(),
            [ActivityKind::MediaStopped { shutdown: true, total_secs: 8, .. }]
        ));
        assert_eq!(acc.playing_times(), BTreeMap::from([(Site::from("Twitch"), 8)]));
    }

    #[test]
    fn reset_keeps_sessions_but_drops_totals() {
        let acc = BackgroundAccumulator::new();
        let windows = vec![window(7, 3, "msedge.exe", "Live - Twitch", false)];
        acc.record_tick(&windows, None, t(0));
        acc.record_tick(&windows, None, t(50));
        acc.reset(t(60));
        acc.record_tick(&windows, None, t(70));
        assert_eq!(acc.visible_times(), BTreeMap::from([(Site::from("Twitch"), 10)]));
        assert!(acc.playing_times().is_empty());
        assert_eq!(acc.active_sessions(), 1);
    }
}
