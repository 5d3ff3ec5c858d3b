use std::{collections::HashSet, path::Path};

use anyhow::{anyhow, Result};
use sysinfo::Pid;
use tracing::{debug, instrument};
use xcb::{
    x::{self, Atom, GetProperty, GrabServer, InternAtom, UngrabServer, Window, ATOM_ANY},
    Connection, Xid,
};

use super::{ActiveWindowData, ObservationSource, VisibleWindow, WindowId};

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn get_pid(conn: &Connection, window: Window, pid_atom: Atom) -> Result<Option<u32>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property: pid_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result.value::<u32>().first().copied())
}

fn get_process_name(system: &sysinfo::System, id: u32) -> Option<String> {
    let process = system.process(Pid::from_u32(id))?;
    process
        .exe()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string())
        .or_else(|| process.name().to_str().map(|v| v.to_string()))
}

fn get_active_window(conn: &Connection, root: Window, active_window_atom: Atom) -> Result<Window> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window: root,
        property: active_window_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    result
        .value::<Window>()
        .first()
        .copied()
        .ok_or_else(|| anyhow!("No active window is set"))
}

fn get_client_list(conn: &Connection, root: Window, client_list_atom: Atom) -> Result<Vec<Window>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window: root,
        property: client_list_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 4096,
    }))?;
    Ok(result.value::<Window>().to_vec())
}

pub fn get_name(conn: &Connection, window: Window, wm_name_atom: Atom) -> Result<String> {
    let wm_name = conn.wait_for_reply(conn.send_request(&x::GetProperty {
        delete: false,
        window,
        property: wm_name_atom,
        r#type: x::ATOM_ANY,
        long_offset: 0,
        long_length: 1024,
    }))?;
    Ok(String::from_utf8_lossy(wm_name.value()).into_owned())
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|v| v.to_str())
        .unwrap_or(path)
        .to_string()
}

pub struct LinuxObservationSource {
    connection: Connection,
    preferred_screen: usize,
    active_window_atom: Atom,
    client_list_atom: Atom,
    window_name_atom: Atom,
    pid_atom: Atom,
}

impl LinuxObservationSource {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = xcb::Connection::connect(None)?;
        let active_window_atom = intern_atom(&connection, b"_NET_ACTIVE_WINDOW")?;
        let client_list_atom = intern_atom(&connection, b"_NET_CLIENT_LIST")?;
        let window_name_atom = intern_atom(&connection, b"_NET_WM_NAME")?;
        let pid_atom = intern_atom(&connection, b"_NET_WM_PID")?;
        Ok(Self {
            connection,
            preferred_screen: preferred_screen.max(0) as usize,
            active_window_atom,
            client_list_atom,
            window_name_atom,
            pid_atom,
        })
    }

    fn root(&self) -> Result<Window> {
        // Currently the application only supports 1 x11 screen.
        self.connection
            .get_setup()
            .roots()
            .nth(self.preferred_screen)
            .map(|screen| screen.root())
            .ok_or_else(|| anyhow!("Screen {} is not available", self.preferred_screen))
    }

    #[instrument(skip(self))]
    fn get_active_inner(&self) -> Result<ActiveWindowData> {
        let root = self.root()?;
        let active_window = get_active_window(&self.connection, root, self.active_window_atom)?;
        let window_name = get_name(&self.connection, active_window, self.window_name_atom)?;
        let process = get_pid(&self.connection, active_window, self.pid_atom)?
            .ok_or_else(|| anyhow!("Active window doesn't expose a pid"))?;
        let system = sysinfo::System::new_all();
        let process_name = get_process_name(&system, process)
            .ok_or_else(|| anyhow!("Process {process} is gone"))?;
        Ok(ActiveWindowData {
            window_title: window_name.into(),
            process_name: process_name.into(),
        })
    }
}

impl ObservationSource for LinuxObservationSource {
    #[instrument(skip(self))]
    fn active_window(&self) -> Result<ActiveWindowData> {
        let _ = self.connection.send_request(&GrabServer {});
        let result = self.get_active_inner();
        let _ = self.connection.send_request(&UngrabServer {});
        result
    }

    #[instrument(skip(self))]
    fn visible_windows(&self) -> Result<Vec<VisibleWindow>> {
        let root = self.root()?;
        let active = get_active_window(&self.connection, root, self.active_window_atom).ok();
        let clients = get_client_list(&self.connection, root, self.client_list_atom)?;
        let system = sysinfo::System::new_all();

        let mut windows = Vec::with_capacity(clients.len());
        for window in clients {
            let title = match get_name(&self.connection, window, self.window_name_atom) {
                Ok(title) if !title.trim().is_empty() => title,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Skipping window without a name {e:?}");
                    continue;
                }
            };
            let Some(process_id) = get_pid(&self.connection, window, self.pid_atom)? else {
                continue;
            };
            let Some(process_name) = get_process_name(&system, process_id) else {
                continue;
            };
            windows.push(VisibleWindow {
                window_id: WindowId(window.resource_id() as u64),
                process_id,
                process_name: file_name(&process_name).to_lowercase().into(),
                title: title.into(),
                is_foreground: Some(window) == active,
            });
        }
        Ok(windows)
    }

    /// X11 has no notion of audio sessions, so nothing is ever verified as playing here.
    fn audio_active_processes(&self) -> Result<HashSet<u32>> {
        Ok(HashSet::new())
    }
}
