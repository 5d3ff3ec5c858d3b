//! Classifies subjects into productivity categories. Everything here is a pure function of the
//! static pattern tables below.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Productive,
    Unproductive,
    /// Browser content that was seen but matched nothing. Still reported.
    Uncategorized,
    /// Never reported.
    Ignored,
}

/// Shell and OS chrome. Compared against the normalized process name, see [normalize_process].
const SYSTEM_PROCESSES: &[&str] = &[
    "explorer",
    "notepad",
    "taskmgr",
    "dwm",
    "shellexperiencehost",
    "searchui",
    "startmenuexperiencehost",
    "cortana",
    "winlogon",
    "csrss",
    "smss",
    "lsass",
    "services",
    "svchost",
    "conhost",
    "audiodg",
    "spoolsv",
    "searchindexer",
    "applicationframehost",
    "runtimebroker",
    "backgroundtaskhost",
    "taskhostw",
    "sihost",
    "ctfmon",
    "fontdrvhost",
    "unsecapp",
    "searchprotocolhost",
    "searchfilterhost",
    "gnome-shell",
    "plasmashell",
    "xfdesktop",
];

const BROWSER_PROCESSES: &[&str] = &[
    "chrome",
    "google-chrome",
    "chromium",
    "firefox",
    "msedge",
    "opera",
    "brave",
    "vivaldi",
    "safari",
    "iexplore",
];

const BROWSER_MARKERS: &[&str] = &[
    "mozilla firefox",
    "google chrome",
    "microsoft edge",
    "safari",
    "opera",
    "brave",
];

const BROWSER_SUFFIXES: &[&str] = &[
    "— Mozilla Firefox",
    "- Mozilla Firefox",
    "- Google Chrome",
    "- Microsoft Edge",
    "- Safari",
    "- Opera",
    "- Brave",
];

const BROWSER_PREFIXES: &[&str] = &["Mozilla Firefox - ", "Google Chrome - ", "Microsoft Edge - "];

const EMPTY_TAB_PATTERNS: &[&str] = &[
    "new tab",
    "about:blank",
    "chrome://newtab",
    "edge://newtab",
    "about:newtab",
];

/// Checked first for browser content: shopping, gaming, social and streaming.
const UNPRODUCTIVE_CONTENT: &[&str] = &[
    "/dp/",
    "/gp/product",
    "amazon.com",
    "amazon shopping",
    "add to cart",
    "buy now",
    "prime delivery",
    "customer reviews",
    "product details",
    "runescape",
    "oldschool runescape",
    "osrs",
    "jagex",
    "world of warcraft",
    "league of legends",
    "valorant",
    "fortnite",
    "minecraft",
    "steam",
    "epic games",
    "gaming",
    "facebook",
    "instagram",
    "twitter",
    "tiktok",
    "snapchat",
    "reddit",
    "pinterest",
    "youtube",
    "netflix",
    "hulu",
    "disney+",
    "twitch",
    "ebay",
    "etsy",
    "walmart",
    "best buy",
    "celebrity",
    "gossip",
    "memes",
];

const PRODUCTIVE_CONTENT: &[&str] = &[
    "microsoft teams",
    "slack",
    "zoom",
    "google workspace",
    "office 365",
    "sharepoint",
    "onedrive",
    "github",
    "gitlab",
    "stack overflow",
    "stackoverflow",
    "visual studio",
    "documentation",
    "developer",
    "linkedin",
    "salesforce",
    "jira",
    "confluence",
    "gmail",
    "outlook",
    "calendar",
    "email",
];

const PRODUCTIVE_KEYWORDS: &[&str] = &[
    "word",
    "excel",
    "powerpoint",
    "onenote",
    "outlook",
    "teams",
    "onedrive",
    "sharepoint",
    "access",
    "publisher",
    "visio",
    "project",
    "visual studio",
    "github",
    "stackoverflow",
];

const UNPRODUCTIVE_KEYWORDS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "tiktok.com",
    "snapchat.com",
    "pinterest.com",
    "reddit.com",
    "youtube.com",
    "netflix.com",
    "hulu.com",
    "disney.com",
    "twitch.tv",
    "vimeo.com",
    "dailymotion.com",
    "steam.com",
    "epic games",
    "xbox.com",
    "playstation.com",
    "runescape",
    "osrs",
    "jagex",
    "amazon.com/dp/",
    "amazon.com/gp/product",
    "ebay.com/itm",
    "ebay.com/p/",
    "ebay.com/b/",
    "etsy.com/listing",
    "etsy.com/shop/",
    "walmart.com/ip/",
    "target.com/p/",
    "bestbuy.com/site/",
    "spotify.com",
    "soundcloud.com",
    "pandora.com",
];

const SEPARATOR: &str = " - ";

/// Lowercased file name without the `.exe` suffix, so `C:\x\Chrome.EXE` and `chrome` compare
/// equal.
pub fn normalize_process(name: &str) -> String {
    let name = name.trim();
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name).to_lowercase();
    match file.strip_suffix(".exe") {
        Some(stripped) => stripped.to_string(),
        None => file,
    }
}

fn leading_segment(subject: &str) -> &str {
    subject.split(SEPARATOR).next().unwrap_or(subject).trim()
}

pub fn is_browser_process(process: &str) -> bool {
    BROWSER_PROCESSES.contains(&normalize_process(process).as_str())
}

/// True when the leading process part of `subject` is OS chrome.
pub fn is_system_process(subject: &str) -> bool {
    SYSTEM_PROCESSES.contains(&normalize_process(leading_segment(subject)).as_str())
}

/// Strips the process prefix and the browser decorations from a browser subject, leaving the page
/// title.
fn page_content(subject: &str) -> &str {
    let mut content = match subject.split_once(SEPARATOR) {
        Some((process, rest)) if is_browser_process(process) => rest,
        _ => subject,
    }
    .trim();

    for suffix in BROWSER_SUFFIXES {
        if let Some(stripped) = content.strip_suffix(suffix) {
            content = stripped.trim_end();
        }
    }
    for prefix in BROWSER_PREFIXES {
        if let Some(stripped) = content.strip_prefix(prefix) {
            content = stripped.trim_start();
        }
    }
    content
}

/// Returns the page content if the subject is a browser window that carries a real page.
fn browser_content(subject: &str) -> Option<&str> {
    let lower = subject.to_lowercase();
    let has_browser = BROWSER_MARKERS.iter().any(|m| lower.contains(m))
        || is_browser_process(leading_segment(subject));
    if !has_browser || !subject.contains(SEPARATOR) {
        return None;
    }
    if EMPTY_TAB_PATTERNS.iter().any(|p| lower.contains(p)) {
        return None;
    }
    Some(page_content(subject)).filter(|content| !content.is_empty())
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// Maps a subject to its [Category]. First matching rule wins:
/// 1. OS process → [Category::Ignored]
/// 2. browser page → unproductive list, productive list, otherwise [Category::Uncategorized]
/// 3. anything else → productive keywords, unproductive keywords, otherwise [Category::Ignored]
pub fn categorize(subject: &str) -> Category {
    if subject.trim().is_empty() || is_system_process(subject) {
        return Category::Ignored;
    }

    if let Some(content) = browser_content(subject) {
        let content = content.to_lowercase();
        return if contains_any(&content, UNPRODUCTIVE_CONTENT) {
            Category::Unproductive
        } else if contains_any(&content, PRODUCTIVE_CONTENT) {
            Category::Productive
        } else {
            Category::Uncategorized
        };
    }

    let lower = subject.to_lowercase();
    if contains_any(&lower, PRODUCTIVE_KEYWORDS) {
        Category::Productive
    } else if contains_any(&lower, UNPRODUCTIVE_KEYWORDS) {
        Category::Unproductive
    } else {
        Category::Ignored
    }
}
