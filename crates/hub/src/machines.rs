// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine registry: the in-memory fleet catalog.
//!
//! The local machine record always exists (`id = "LOCAL"`, connected). Remote
//! records are created on agent registration and mutated only by agent
//! connection tasks and the sweeper; client-facing paths read snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_proto::record::{
    epoch_ms, MachineStatus, MachineSummary, ProjectInfo, SessionRecord, LOCAL_MACHINE_ID,
};
use relay_proto::{CLOSE_GOING_AWAY, CLOSE_REPLACED};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Missing heartbeats for this long flip a machine to disconnected.
const HEARTBEAT_STALE_MS: u64 = 45_000;

/// Disconnected records older than this are removed.
const REMOVE_AFTER_MS: u64 = 60 * 60 * 1000;

/// Handle to an agent's WebSocket task; sending a close code tears the
/// socket down.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    close_tx: mpsc::UnboundedSender<u16>,
}

impl AgentHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<u16>) {
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        (Self { close_tx }, close_rx)
    }

    /// Ask the owning task to close the socket with `code`.
    pub fn close(&self, code: u16) {
        let _ = self.close_tx.send(code);
    }
}

struct MachineEntry {
    hostname: String,
    address: String,
    is_local: bool,
    agent_version: String,
    last_seen: u64,
    status: MachineStatus,
    disconnected_at: Option<u64>,
    projects: Vec<ProjectInfo>,
    sessions: Vec<SessionRecord>,
    handle: Option<AgentHandle>,
}

/// Fleet catalog. The only mutators are agent tasks, the sweeper, and the
/// local refresh performed on `list_machines`.
pub struct MachineRegistry {
    machines: RwLock<HashMap<String, MachineEntry>>,
}

impl Default for MachineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineRegistry {
    pub fn new() -> Self {
        let mut machines = HashMap::new();
        machines.insert(
            LOCAL_MACHINE_ID.to_owned(),
            MachineEntry {
                hostname: crate::config::hostname(),
                address: String::new(),
                is_local: true,
                agent_version: env!("CARGO_PKG_VERSION").to_owned(),
                last_seen: epoch_ms(),
                status: MachineStatus::Connected,
                disconnected_at: None,
                projects: Vec::new(),
                sessions: Vec::new(),
                handle: None,
            },
        );
        Self { machines: RwLock::new(machines) }
    }

    /// Register (or re-register) a remote machine. A previous socket for the
    /// same id is force-closed with [`CLOSE_REPLACED`].
    pub async fn register(
        &self,
        machine_id: &str,
        hostname: String,
        address: String,
        agent_version: String,
        handle: AgentHandle,
    ) -> Result<(), String> {
        if machine_id.is_empty() {
            return Err("machine id must not be empty".to_owned());
        }
        if machine_id == LOCAL_MACHINE_ID {
            return Err(format!("{LOCAL_MACHINE_ID:?} is reserved"));
        }

        let mut machines = self.machines.write().await;
        if let Some(existing) = machines.get(machine_id) {
            if let Some(ref old) = existing.handle {
                info!(machine_id, "replacing existing agent connection");
                old.close(CLOSE_REPLACED);
            }
        }
        machines.insert(
            machine_id.to_owned(),
            MachineEntry {
                hostname,
                address,
                is_local: false,
                agent_version,
                last_seen: epoch_ms(),
                status: MachineStatus::Connected,
                disconnected_at: None,
                projects: Vec::new(),
                sessions: Vec::new(),
                handle: Some(handle),
            },
        );
        info!(machine_id, "agent registered");
        Ok(())
    }

    /// Merge a projects listing into a machine's record.
    pub async fn set_projects(&self, machine_id: &str, projects: Vec<ProjectInfo>) -> bool {
        let mut machines = self.machines.write().await;
        let Some(entry) = machines.get_mut(machine_id) else {
            return false;
        };
        if entry.projects.len() != projects.len() {
            debug!(machine_id, from = entry.projects.len(), to = projects.len(), "project count changed");
        }
        entry.projects = projects;
        entry.last_seen = epoch_ms();
        true
    }

    /// Merge a sessions listing into a machine's record.
    pub async fn set_sessions(&self, machine_id: &str, sessions: Vec<SessionRecord>) -> bool {
        let mut machines = self.machines.write().await;
        let Some(entry) = machines.get_mut(machine_id) else {
            return false;
        };
        if entry.sessions.len() != sessions.len() {
            debug!(machine_id, from = entry.sessions.len(), to = sessions.len(), "session count changed");
        }
        entry.sessions = sessions;
        entry.last_seen = epoch_ms();
        true
    }

    /// Record a heartbeat. Returns false for unknown machines.
    pub async fn heartbeat(&self, machine_id: &str) -> bool {
        let mut machines = self.machines.write().await;
        match machines.get_mut(machine_id) {
            Some(entry) => {
                entry.last_seen = epoch_ms();
                if entry.status == MachineStatus::Disconnected {
                    entry.status = MachineStatus::Connected;
                    entry.disconnected_at = None;
                }
                true
            }
            None => false,
        }
    }

    /// Refresh the local machine's projects and sessions before a listing.
    pub async fn refresh_local(&self, projects: Vec<ProjectInfo>, sessions: Vec<SessionRecord>) {
        let mut machines = self.machines.write().await;
        if let Some(entry) = machines.get_mut(LOCAL_MACHINE_ID) {
            entry.projects = projects;
            entry.sessions = sessions;
            entry.last_seen = epoch_ms();
        }
    }

    /// Mark a machine disconnected (socket closed or heartbeat expired).
    pub async fn mark_disconnected(&self, machine_id: &str) {
        if machine_id == LOCAL_MACHINE_ID {
            return;
        }
        let mut machines = self.machines.write().await;
        if let Some(entry) = machines.get_mut(machine_id) {
            if entry.status != MachineStatus::Disconnected {
                entry.status = MachineStatus::Disconnected;
                entry.disconnected_at = Some(epoch_ms());
                entry.handle = None;
                info!(machine_id, "machine disconnected");
            }
        }
    }

    /// Snapshot for the `machines` listing.
    pub async fn summaries(&self) -> Vec<MachineSummary> {
        let machines = self.machines.read().await;
        let mut out: Vec<MachineSummary> = machines
            .iter()
            .map(|(id, e)| MachineSummary {
                id: id.clone(),
                hostname: e.hostname.clone(),
                address: e.address.clone(),
                is_local: e.is_local,
                agent_version: e.agent_version.clone(),
                status: e.status,
                project_count: e.projects.len(),
                session_count: e.sessions.len(),
                last_seen: e.last_seen,
            })
            .collect();
        // LOCAL first, then by id.
        out.sort_by(|a, b| b.is_local.cmp(&a.is_local).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Sessions advertised by a remote machine.
    pub async fn sessions_of(&self, machine_id: &str) -> Vec<SessionRecord> {
        let machines = self.machines.read().await;
        machines.get(machine_id).map(|e| e.sessions.clone()).unwrap_or_default()
    }

    /// One sweep: flip heartbeat-stale machines to disconnected (closing any
    /// socket) and drop records disconnected for longer than the removal cap.
    pub async fn sweep(&self) {
        let now = epoch_ms();
        let mut machines = self.machines.write().await;
        let mut to_remove = Vec::new();

        for (id, entry) in machines.iter_mut() {
            if entry.is_local {
                continue;
            }
            match entry.status {
                MachineStatus::Connected
                    if now.saturating_sub(entry.last_seen) > HEARTBEAT_STALE_MS =>
                {
                    warn!(machine_id = %id, "agent heartbeat expired");
                    entry.status = MachineStatus::Disconnected;
                    entry.disconnected_at = Some(now);
                    if let Some(handle) = entry.handle.take() {
                        handle.close(CLOSE_GOING_AWAY);
                    }
                }
                MachineStatus::Disconnected => {
                    let since = entry.disconnected_at.unwrap_or(now);
                    if now.saturating_sub(since) > REMOVE_AFTER_MS {
                        to_remove.push(id.clone());
                    }
                }
                _ => {}
            }
        }

        for id in to_remove {
            info!(machine_id = %id, "removing long-disconnected machine");
            machines.remove(&id);
        }
    }

    /// Close every agent socket; used during hub shutdown.
    pub async fn shutdown(&self) {
        let mut machines = self.machines.write().await;
        for entry in machines.values_mut() {
            if let Some(handle) = entry.handle.take() {
                handle.close(CLOSE_GOING_AWAY);
            }
        }
    }

    /// Periodic sweep loop.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            }
            self.sweep().await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, machine_id: &str, last_seen: u64) {
        let mut machines = self.machines.write().await;
        if let Some(entry) = machines.get_mut(machine_id) {
            entry.last_seen = last_seen;
            if let Some(ref mut d) = entry.disconnected_at {
                *d = last_seen;
            }
        }
    }
}

#[cfg(test)]
#[path = "machines_tests.rs"]
mod tests;
