// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client WebSocket protocol.
//!
//! Requests and events are internally-tagged JSON unions. Unknown tags fail
//! deserialization; servers log and drop them, clients treat them as no-ops.
//! Every `output`/`scrollback`/`status` event produced by a hub or agent
//! carries `sessionId` so clients can demultiplex across sessions.

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelState, ControlKey};
use crate::record::{MachineSummary, ProjectInfo, SessionRecord};

/// Client-to-hub (or client-to-agent) requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Ping {},
    ListMachines {},
    ListProjects {},
    ListSessions {},
    ListFolders {},
    #[serde(rename_all = "camelCase")]
    ConnectSession { session_id: String },
    Input {
        data: String,
    },
    Control {
        key: ControlKey,
    },
    Resize {
        cols: u16,
        rows: u16,
    },
    #[serde(rename_all = "camelCase")]
    UploadFile {
        session_id: String,
        filename: String,
        /// Base64-encoded file contents.
        data: String,
        size: u64,
    },
    #[serde(rename_all = "camelCase")]
    CreateSession { project_name: String },
    #[serde(rename_all = "camelCase")]
    StartFolderSession {
        folder_name: String,
        #[serde(default)]
        skip_permissions: bool,
    },
}

/// Hub/agent-to-client events and responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Pong {},
    Machines {
        machines: Vec<MachineSummary>,
    },
    Projects {
        projects: Vec<ProjectInfo>,
    },
    Sessions {
        sessions: Vec<SessionRecord>,
    },
    Folders {
        folders: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Output { session_id: String, data: String },
    #[serde(rename_all = "camelCase")]
    Scrollback { session_id: String, data: String },
    #[serde(rename_all = "camelCase")]
    Status {
        session_id: String,
        state: ChannelState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    UploadResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CreateSessionResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        project_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StartFolderSessionResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        folder_name: Option<String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        already_running: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl ServerEvent {
    /// Session id carried by session-scoped events, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Output { session_id, .. }
            | Self::Scrollback { session_id, .. }
            | Self::Status { session_id, .. } => Some(session_id),
            Self::Error { session_id, .. } => session_id.as_deref(),
            _ => None,
        }
    }
}

/// Build an `error` event.
pub fn ws_error(message: impl Into<String>, session_id: Option<String>) -> ServerEvent {
    ServerEvent::Error { message: message.into(), session_id }
}

/// Build a `status` event for a session.
pub fn ws_status(session_id: &str, state: ChannelState, reason: Option<String>) -> ServerEvent {
    ServerEvent::Status { session_id: session_id.to_owned(), state, reason }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
