//! Contains logic for observing the desktop in different environments.
//! [GenericObservationSource] is the main artifact of this module that abstracts
//! the operations.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::{collections::HashSet, sync::Arc};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWindowData {
    /// Name of the window. For example 'bash in hello' or 'Document 1' or 'Vibing in YouTube -
    /// Chrome'
    pub window_title: Arc<str>,
    /// Executable of the owning process. Either a full path (/home/etc/nvim) or a bare file name.
    pub process_name: Arc<str>,
}

/// Opaque, platform specific window handle. Only compared for equality between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u64);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A visible top level window as reported by the window system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleWindow {
    pub window_id: WindowId,
    pub process_id: u32,
    pub process_name: Arc<str>,
    pub title: Arc<str>,
    pub is_foreground: bool,
}

/// Contract the platform backends implement. Every call is allowed to fail, callers treat a
/// failure as "nothing observed this tick".
#[cfg_attr(test, mockall::automock)]
pub trait ObservationSource: Send + Sync {
    fn active_window(&self) -> Result<ActiveWindowData>;

    /// Visible top level windows, the foreground one included and flagged.
    fn visible_windows(&self) -> Result<Vec<VisibleWindow>>;

    /// Ids of processes that currently own an active, unmuted audio output session.
    fn audio_active_processes(&self) -> Result<HashSet<u32>>;
}

/// Serves as a cross-compatible ObservationSource implementation.
pub struct GenericObservationSource {
    inner: Box<dyn ObservationSource>,
}

impl GenericObservationSource {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsObservationSource;
                Ok(Self {
                    inner: Box::new(WindowsObservationSource::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::LinuxObservationSource;
                Ok(Self {
                    inner: Box::new(LinuxObservationSource::new()?),
                })
            }
            else {
                Err(anyhow::anyhow!(
                    "No observation backend was compiled in, enable the `win` or `x11` feature"
                ))
            }
        }
    }
}

impl ObservationSource for GenericObservationSource {
    fn active_window(&self) -> Result<ActiveWindowData> {
        self.inner.active_window()
    }

    fn visible_windows(&self) -> Result<Vec<VisibleWindow>> {
        self.inner.visible_windows()
    }

    fn audio_active_processes(&self) -> Result<HashSet<u32>> {
        self.inner.audio_active_processes()
    }
}
