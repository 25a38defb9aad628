// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry record schemas: per-session JSON files on disk and the
//! machine/project summaries exchanged over the agent link.

use serde::{Deserialize, Serialize};

/// A reader treats a session record older than this as dead and may unlink it.
pub const SESSION_STALE_MS: u64 = 30_000;

/// Activity state derived by the launcher from its attached peer count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connected,
    Idle,
    Interactive,
    Running,
}

/// One live session, as published in `<registry>/<id>.json`.
///
/// Exactly one launcher writes any given record; `last_seen` is refreshed on
/// every heartbeat tick and is monotonically non-decreasing while the
/// launcher lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Opaque stable session id, unique within a registry.
    pub id: String,
    /// Absolute working directory of the PTY child.
    pub cwd: String,
    /// Process id of the launcher (not the child).
    pub pid: u32,
    /// Local endpoint address derived from `id`.
    pub pipe: String,
    /// Epoch millis at first publish.
    pub started: u64,
    /// Epoch millis of the most recent heartbeat.
    pub last_seen: u64,
    /// Number of currently attached channel peers.
    pub client_count: u32,
    /// Last lines of ANSI-stripped terminal output.
    pub preview: String,
    pub status: SessionStatus,
}

impl SessionRecord {
    /// True when the record has not been refreshed within the staleness
    /// window and readers are authorized to unlink it.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen) > SESSION_STALE_MS
    }
}

/// Connection state of a machine in the fleet catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Connected,
    Disconnected,
}

/// Reserved id of the hub's own machine record.
pub const LOCAL_MACHINE_ID: &str = "LOCAL";

/// One machine in the `machines` listing sent to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSummary {
    pub id: String,
    pub hostname: String,
    /// WebSocket URL at which this machine accepts direct client connections.
    pub address: String,
    pub is_local: bool,
    pub agent_version: String,
    pub status: MachineStatus,
    pub project_count: usize,
    pub session_count: usize,
    pub last_seen: u64,
}

/// A directory under the projects root, which may or may not have a live
/// session of the same name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub name: String,
    pub path: String,
    pub has_session: bool,
}

/// Agent-to-hub messages. Tag values keep the historical colon form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentRequest {
    #[serde(rename = "agent:register")]
    #[serde(rename_all = "camelCase")]
    Register {
        machine_id: String,
        hostname: String,
        /// Self-hosted P2P WebSocket address for direct clients.
        address: String,
        agent_version: String,
    },
    #[serde(rename = "agent:projects")]
    #[serde(rename_all = "camelCase")]
    Projects {
        machine_id: String,
        projects: Vec<ProjectInfo>,
    },
    #[serde(rename = "agent:sessions")]
    #[serde(rename_all = "camelCase")]
    Sessions {
        machine_id: String,
        sessions: Vec<SessionRecord>,
    },
    #[serde(rename = "agent:heartbeat")]
    #[serde(rename_all = "camelCase")]
    Heartbeat { machine_id: String },
}

/// Hub-to-agent messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    #[serde(rename = "hub:registered")]
    Registered {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "hub:pong")]
    Pong {},
}

/// Current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
