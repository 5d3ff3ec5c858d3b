use std::{collections::HashSet, path::Path};

use anyhow::{anyhow, Result};
use tracing::{debug, error};
use windows::{
    core::{Interface, PWSTR},
    Win32::{
        Foundation::{CloseHandle, GetLastError, BOOL, HANDLE, HWND, LPARAM},
        Media::Audio::{
            eMultimedia, eRender, AudioSessionStateActive, IAudioSessionControl2,
            IAudioSessionManager2, IMMDeviceEnumerator, ISimpleAudioVolume, MMDeviceEnumerator,
        },
        System::{
            Com::{CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED},
            Diagnostics::Debug::{
                FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
            },
            SystemServices::{LANG_ENGLISH, SUBLANG_ENGLISH_US},
            Threading::{
                OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
                PROCESS_QUERY_LIMITED_INFORMATION,
            },
        },
        UI::WindowsAndMessaging::{
            EnumWindows, GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId,
            IsWindowVisible,
        },
    },
};

use super::{ActiveWindowData, ObservationSource, VisibleWindow, WindowId};

fn last_error_message() -> String {
    let err = unsafe { GetLastError() };
    let mut message_buffer = [0u16; 2048];
    let size = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            err.0,
            LANG_ENGLISH | (SUBLANG_ENGLISH_US << 10),
            PWSTR::from_raw(message_buffer.as_mut_ptr()),
            2048,
            None,
        )
    };
    String::from_utf16_lossy(&message_buffer[0..size as usize])
}

fn window_process_id(window: HWND) -> Result<u32> {
    let mut id = 0u32;
    unsafe { GetWindowThreadProcessId(window, Some(&mut id)) };
    if id == 0 {
        return Err(anyhow!("Failed to get window process {}", last_error_message()));
    }
    Ok(id)
}

fn process_image_path(id: u32) -> Result<String> {
    let process_handle =
        unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, BOOL::from(false), id) }
            .inspect_err(|e| debug!("Failed to open process {id} {e:?}"))?;

    let mut text: [u16; 4096] = [0; 4096];
    let path = unsafe { get_window_process_path(process_handle, &mut text) };

    unsafe { CloseHandle(process_handle) }
        .inspect_err(|e| error!("Failed to close handle {e:?}"))?;
    path
}

unsafe fn get_window_process_path(process_handle: HANDLE, text: &mut [u16]) -> Result<String> {
    unsafe {
        let mut length = text.len() as u32;
        QueryFullProcessImageNameW(
            process_handle,
            PROCESS_NAME_WIN32,
            windows::core::PWSTR(text.as_mut_ptr()),
            &mut length,
        )?;
        Ok(String::from_utf16_lossy(&text[..length as usize]))
    }
}

unsafe fn get_window_title(window_handle: HWND, text: &mut [u16]) -> String {
    let len = unsafe { GetWindowTextW(window_handle, text) };
    String::from_utf16_lossy(&text[..len.max(0) as usize])
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|v| v.to_str())
        .unwrap_or(path)
        .to_string()
}

#[tracing::instrument]
pub fn get_active() -> Result<ActiveWindowData> {
    let window = unsafe { GetForegroundWindow() };

    if window.is_invalid() {
        return Err(anyhow!("Failed to get foreground window"));
    }

    let id = window_process_id(window)?;
    let process_name = process_image_path(id)
        .inspect_err(|e| error!("Failed to get window process path {e:?}"))?;
    let mut text: [u16; 4096] = [0; 4096];
    let title = unsafe { get_window_title(window, &mut text) };

    Ok(ActiveWindowData {
        process_name: process_name.into(),
        window_title: title.into(),
    })
}

struct EnumerationState {
    foreground: HWND,
    windows: Vec<VisibleWindow>,
}

unsafe extern "system" fn collect_window(window: HWND, state: LPARAM) -> BOOL {
    let state = unsafe { &mut *(state.0 as *mut EnumerationState) };
    if !unsafe { IsWindowVisible(window) }.as_bool() {
        return BOOL::from(true);
    }

    let mut text: [u16; 1024] = [0; 1024];
    let title = unsafe { get_window_title(window, &mut text) };
    if title.trim().is_empty() {
        return BOOL::from(true);
    }

    let Ok(process_id) = window_process_id(window) else {
        return BOOL::from(true);
    };
    match process_image_path(process_id) {
        Ok(path) => state.windows.push(VisibleWindow {
            window_id: WindowId(window.0 as usize as u64),
            process_id,
            process_name: file_name(&path).to_lowercase().into(),
            title: title.into(),
            is_foreground: window == state.foreground,
        }),
        Err(e) => debug!("Skipping window of process {process_id}: {e:?}"),
    }
    BOOL::from(true)
}

#[tracing::instrument]
pub fn get_visible_windows() -> Result<Vec<VisibleWindow>> {
    let mut state = EnumerationState {
        foreground: unsafe { GetForegroundWindow() },
        windows: vec![],
    };
    unsafe {
        EnumWindows(
            Some(collect_window),
            LPARAM(&mut state as *mut EnumerationState as isize),
        )
    }?;
    Ok(state.windows)
}

struct ComGuard;

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}

/// Walks the default render endpoint's audio sessions and keeps processes whose session is active
/// and not muted.
pub fn get_audio_active_processes() -> Result<HashSet<u32>> {
    unsafe { CoInitializeEx(None, COINIT_MULTITHREADED).ok()? };
    let _guard = ComGuard;

    let enumerator: IMMDeviceEnumerator =
        unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)? };
    let device = unsafe { enumerator.GetDefaultAudioEndpoint(eRender, eMultimedia)? };
    let manager: IAudioSessionManager2 = unsafe { device.Activate(CLSCTX_ALL, None)? };
    let sessions = unsafe { manager.GetSessionEnumerator()? };
    let count = unsafe { sessions.GetCount()? };

    let mut processes = HashSet::new();
    for i in 0..count {
        let control = unsafe { sessions.GetSession(i)? };
        if unsafe { control.GetState()? } != AudioSessionStateActive {
            continue;
        }
        let muted = control
            .cast::<ISimpleAudioVolume>()
            .and_then(|volume| unsafe { volume.GetMute() })
            .map(|v| v.as_bool())
            .unwrap_or(false);
        if muted {
            continue;
        }
        let Ok(control2) = control.cast::<IAudioSessionControl2>() else {
            continue;
        };
        let pid = unsafe { control2.GetProcessId()? };
        if pid != 0 {
            processes.insert(pid);
        }
    }
    Ok(processes)
}

pub struct WindowsObservationSource {}

impl WindowsObservationSource {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WindowsObservationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationSource for WindowsObservationSource {
    fn active_window(&self) -> Result<ActiveWindowData> {
        get_active().inspect_err(|e| debug!("Failed to get active window {e:?}"))
    }

    fn visible_windows(&self) -> Result<Vec<VisibleWindow>> {
        get_visible_windows().inspect_err(|e| error!("Failed to enumerate windows {e:?}"))
    }

    fn audio_active_processes(&self) -> Result<HashSet<u32>> {
        get_audio_active_processes().inspect_err(|e| debug!("Failed to query audio sessions {e:?}"))
    }
}
