use std::{
    env,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{anyhow, Result};
use sysinfo::{get_current_pid, Pid, Signal, System};
use tracing::info;

use super::daemon_path::to_daemon_path;

/// Executables that may be running a daemon: the daemon binary and `dwellwatch serve`.
pub fn server_paths() -> Result<Vec<PathBuf>> {
    let cli = env::current_exe()?;
    Ok(vec![to_daemon_path(cli.clone()), cli])
}

/// Other processes started from one of `names`. The current process and its children are left
/// out.
pub fn running_servers(system: &System, names: &[PathBuf]) -> Result<Vec<Pid>> {
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't get own pid {e}"))?;
    Ok(system
        .processes()
        .iter()
        .filter(|(pid, _)| **pid != current_id)
        .filter(|(_, process)| !matches!(process.parent(), Some(p) if p == current_id))
        .filter(|(_, process)| {
            process
                .exe()
                .filter(|v| v.exists())
                .is_some_and(|exe| names.iter().any(|name| name == exe))
        })
        .map(|(pid, _)| *pid)
        .collect())
}

/// Terminates every running daemon and waits for it to go away. Returns how many were stopped.
pub fn kill_previous_servers(names: &[PathBuf]) -> Result<usize> {
    let system = System::new_all();
    let servers = running_servers(&system, names)?;
    for pid in &servers {
        let Some(process) = system.process(*pid) else {
            continue;
        };
        info!("Stopping daemon {pid}");
        // This will forcefully terminate the process on Windows, so the last unsaved minute is
        // lost there.
        if process.kill_with(Signal::Term).is_none() {
            process.kill();
        }
        let _ = process.wait();
    }
    Ok(servers.len())
}

/// Stops whatever daemon is running and starts the daemon binary for `app_dir`. The daemon
/// detaches itself.
pub fn restart_server(app_dir: &Path) -> Result<()> {
    let paths = server_paths()?;
    kill_previous_servers(&paths)?;

    let daemon = to_daemon_path(env::current_exe()?);
    let mut command = std::process::Command::new(&daemon);
    command.arg("--dir").arg(app_dir);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    println!("Spawning {daemon:?}");
    let status = command.status()?;
    if !status.success() {
        return Err(anyhow!("Daemon failed to start ({status})"));
    }
    println!("Success");
    Ok(())
}
