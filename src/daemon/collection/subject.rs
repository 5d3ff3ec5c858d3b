use std::{fmt::Display, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::window_api::ActiveWindowData;

const PLACEHOLDER: &str = "Unknown";
const MIN_SUBJECT_LEN: usize = 3;

/// Key of "what was being observed". For foreground windows it is `"<process file> - <title>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(Arc<str>);

impl Subject {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self(label.into())
    }

    pub fn from_window(data: &ActiveWindowData) -> Self {
        let process = data
            .process_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&data.process_name)
            .trim();
        let title = data.window_title.trim();
        if title.is_empty() {
            Self(process.into())
        } else {
            Self(format!("{process} - {title}").into())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty, too short to mean anything, or a placeholder value from the window system.
    pub fn is_degenerate(&self) -> bool {
        let trimmed = self.0.trim();
        trimmed.len() < MIN_SUBJECT_LEN || trimmed == PLACEHOLDER
    }
}

impl Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Subject {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::window_api::ActiveWindowData;

    use super::Subject;

    #[test]
    fn subject_uses_process_file_name() {
        let subject = Subject::from_window(&ActiveWindowData {
            window_title: "notes.md - nvim".into(),
            process_name: "/usr/bin/alacritty".into(),
        });
        assert_eq!(subject.as_str(), "alacritty - notes.md - nvim");

        let untitled = Subject::from_window(&ActiveWindowData {
            window_title: "  ".into(),
            process_name: "code.exe".into(),
        });
        assert_eq!(untitled.as_str(), "code.exe");
    }

    #[test]
    fn degenerate_subjects() {
        assert!(Subject::from("").is_degenerate());
        assert!(Subject::from("ab").is_degenerate());
        assert!(Subject::from("Unknown").is_degenerate());
        assert!(!Subject::from("vim").is_degenerate());
    }
}
