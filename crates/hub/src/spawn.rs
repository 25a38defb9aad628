// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launcher spawning and lifetime tracking.
//!
//! The hub starts detached `relay-session` processes for `create_session`
//! and `start_folder_session`. Spawned pids are tracked so shutdown can send
//! a polite SIGTERM; a periodic sweep drops dead pids to bound memory.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use relay_proto::ws::ServerEvent;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::names::sanitize_project_name;
use crate::state::SharedHub;

/// Dead-pid sweep cadence.
const PID_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Pids of launchers this hub has spawned.
#[derive(Default)]
pub struct LauncherTracker {
    pids: Mutex<HashSet<u32>>,
}

impl LauncherTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn track(&self, pid: u32) {
        self.pids.lock().await.insert(pid);
    }

    pub async fn len(&self) -> usize {
        self.pids.lock().await.len()
    }

    /// Drop pids whose process is gone.
    pub async fn sweep(&self) {
        let mut pids = self.pids.lock().await;
        pids.retain(|&pid| process_alive(pid));
    }

    /// Politely terminate every tracked live launcher.
    pub async fn terminate_all(&self) {
        let pids = self.pids.lock().await;
        for &pid in pids.iter() {
            if process_alive(pid) {
                info!(pid, "terminating spawned launcher");
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }
    }

    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(PID_SWEEP_INTERVAL) => {}
            }
            self.sweep().await;
        }
    }
}

/// Signal-0 liveness probe.
fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Handle `create_session`: make the project directory if missing, then
/// start a detached launcher for it.
pub async fn create_session(hub: &SharedHub, project_name: &str) -> ServerEvent {
    let name = match sanitize_project_name(project_name) {
        Ok(name) => name.to_owned(),
        Err(error) => {
            return ServerEvent::CreateSessionResult { success: false, project_name: None, error: Some(error) };
        }
    };

    let path = hub.config.projects_dir().join(&name);
    if let Err(e) = tokio::fs::create_dir_all(&path).await {
        return ServerEvent::CreateSessionResult {
            success: false,
            project_name: Some(name),
            error: Some(format!("Failed to create project directory: {e}")),
        };
    }

    match spawn_launcher(hub, &name, &path, false).await {
        Ok(_pid) => {
            ServerEvent::CreateSessionResult { success: true, project_name: Some(name), error: None }
        }
        Err(e) => ServerEvent::CreateSessionResult {
            success: false,
            project_name: Some(name),
            error: Some(format!("Failed to start session: {e}")),
        },
    }
}

/// Handle `start_folder_session`: the folder must already exist; an already
/// live session is reported as such instead of spawning a duplicate.
pub async fn start_folder_session(
    hub: &SharedHub,
    folder_name: &str,
    skip_permissions: bool,
) -> ServerEvent {
    let name = match sanitize_project_name(folder_name) {
        Ok(name) => name.to_owned(),
        Err(error) => {
            return ServerEvent::StartFolderSessionResult {
                success: false,
                folder_name: None,
                already_running: false,
                error: Some(error),
            };
        }
    };

    let path = hub.config.projects_dir().join(&name);
    if !path.is_dir() {
        return ServerEvent::StartFolderSessionResult {
            success: false,
            folder_name: Some(name),
            already_running: false,
            error: Some("Folder does not exist".to_owned()),
        };
    }

    if relay_session::registry::find(&hub.config.registry_dir(), &name).is_some() {
        return ServerEvent::StartFolderSessionResult {
            success: true,
            folder_name: Some(name),
            already_running: true,
            error: None,
        };
    }

    match spawn_launcher(hub, &name, &path, skip_permissions).await {
        Ok(_pid) => ServerEvent::StartFolderSessionResult {
            success: true,
            folder_name: Some(name),
            already_running: false,
            error: None,
        },
        Err(e) => ServerEvent::StartFolderSessionResult {
            success: false,
            folder_name: Some(name),
            already_running: false,
            error: Some(format!("Failed to start session: {e}")),
        },
    }
}

/// Start a detached launcher process and track its pid.
async fn spawn_launcher(
    hub: &SharedHub,
    id: &str,
    cwd: &Path,
    skip_permissions: bool,
) -> anyhow::Result<u32> {
    let mut command = std::process::Command::new(&hub.config.launcher_bin);
    command
        .arg("--id")
        .arg(id)
        .arg("--cwd")
        .arg(cwd)
        .arg("--registry-dir")
        .arg(hub.config.registry_dir())
        .arg("--cols")
        .arg(hub.config.cols.to_string())
        .arg("--rows")
        .arg(hub.config.rows.to_string())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    if skip_permissions {
        command.arg("--skip-permissions");
    }
    // Own process group so hub signals don't cascade into sessions.
    std::os::unix::process::CommandExt::process_group(&mut command, 0);

    let child = tokio::process::Command::from(command).spawn()?;
    let pid = child.id().unwrap_or_default();
    hub.launchers.track(pid).await;
    info!(id, pid, "spawned launcher");
    Ok(pid)
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
