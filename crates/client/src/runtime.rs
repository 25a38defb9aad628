// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The client state machine.
//!
//! Pure with respect to I/O: frames come in as raw JSON text, keystrokes
//! and view changes come in as method calls, and every externally visible
//! consequence leaves as an [`Effect`] for the embedder (terminal writes,
//! requests to send, state transitions). This keeps the routing rules —
//! demux by session id, focus transitions, split fan-out, paced
//! scrollback — testable without sockets or a DOM.

use std::collections::HashMap;

use relay_proto::channel::ChannelState;
use relay_proto::record::{MachineStatus, MachineSummary, ProjectInfo, SessionRecord};
use relay_proto::ws::{ClientRequest, ServerEvent};
use serde_json::Value;
use tracing::{debug, warn};

use crate::buffers::{SessionBuffer, SplitPanels};
use crate::link::LinkSource;

/// Top-level view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Machines,
    Dashboard,
    Split,
    Focus,
}

/// Focus-view connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusState {
    Dashboard,
    Connecting,
    Connected,
    Disconnected,
}

/// Externally visible consequences of an input.
#[derive(Debug, PartialEq, Eq)]
pub enum Effect {
    /// Bytes for the focus terminal.
    FocusWrite(String),
    /// Bytes for a split panel's terminal.
    SplitWrite { session_id: String, data: String },
    /// A request to transmit on the session-I/O link.
    Send(ClientRequest),
    /// Dial a remote machine's advertised address.
    DialAgent { address: String },
    /// Drop the direct agent link and fall back to the hub.
    CloseAgent,
    /// Focus state changed (drives the focus-view chrome).
    State(FocusState),
}

/// Which link carries session I/O for the selected machine.
fn io_source(selected_is_local: bool) -> LinkSource {
    if selected_is_local {
        LinkSource::Hub
    } else {
        LinkSource::Agent
    }
}

/// Browser-side controller state.
pub struct Runtime {
    pub view: View,
    focus_state: FocusState,
    focused: Option<String>,
    /// The session whose terminal currently owns keystrokes. Re-assigned as
    /// a whole on focus switches so input never leaks across sessions.
    input_owner: Option<String>,
    last_focused: Option<String>,
    buffers: HashMap<String, SessionBuffer>,
    pub splits: SplitPanels,
    selected_machine: String,
    pub machines: Vec<MachineSummary>,
    pub projects: Vec<ProjectInfo>,
    pub sessions: Vec<SessionRecord>,
    /// Dashboard rendering is throttled while a chunked scrollback drains.
    pub render_throttled: bool,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            view: View::Dashboard,
            focus_state: FocusState::Dashboard,
            focused: None,
            input_owner: None,
            last_focused: None,
            buffers: HashMap::new(),
            splits: SplitPanels::new(),
            selected_machine: "LOCAL".to_owned(),
            machines: Vec::new(),
            projects: Vec::new(),
            sessions: Vec::new(),
            render_throttled: false,
        }
    }

    pub fn focus_state(&self) -> FocusState {
        self.focus_state
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn selected_machine(&self) -> &str {
        &self.selected_machine
    }

    /// Restore a persisted machine selection at boot: only honored when the
    /// machine is currently reported connected.
    pub fn restore_selection(&mut self, saved: Option<&str>) -> Vec<Effect> {
        let Some(saved) = saved else { return Vec::new() };
        let connected = self
            .machines
            .iter()
            .any(|m| m.id == saved && m.status == MachineStatus::Connected);
        if connected {
            self.select_machine(saved)
        } else {
            Vec::new()
        }
    }

    /// Select a machine for session I/O. Remote machines get a direct
    /// agent link; LOCAL rides the hub link.
    pub fn select_machine(&mut self, machine_id: &str) -> Vec<Effect> {
        if self.selected_machine == machine_id {
            return Vec::new();
        }
        self.selected_machine = machine_id.to_owned();

        if machine_id == "LOCAL" {
            return vec![Effect::CloseAgent];
        }
        match self.machines.iter().find(|m| m.id == machine_id) {
            Some(machine) if !machine.address.is_empty() => {
                vec![Effect::DialAgent { address: machine.address.clone() }]
            }
            _ => {
                warn!(machine_id, "selected machine has no advertised address");
                Vec::new()
            }
        }
    }

    /// Open the focus view on a session.
    ///
    /// Refocusing the current session is a no-op (no reconnect, no
    /// re-animation). Switching sessions re-homes keystroke ownership
    /// before anything else so input cannot leak to the old session.
    pub fn focus(&mut self, session_id: &str) -> Vec<Effect> {
        self.view = View::Focus;
        if self.focused.as_deref() == Some(session_id) {
            return Vec::new();
        }

        self.input_owner = Some(session_id.to_owned());
        self.focused = Some(session_id.to_owned());
        self.last_focused = Some(session_id.to_owned());
        self.buffers.entry(session_id.to_owned()).or_default();
        self.focus_state = FocusState::Connecting;
        vec![
            Effect::State(FocusState::Connecting),
            Effect::Send(ClientRequest::ConnectSession { session_id: session_id.to_owned() }),
        ]
    }

    /// Leave the focus view for the dashboard.
    pub fn back_to_dashboard(&mut self) {
        self.view = View::Dashboard;
        self.focus_state = FocusState::Dashboard;
        self.focused = None;
        self.input_owner = None;
    }

    /// A keystroke from the focus terminal. Routed only while the focused
    /// session owns input and is connected.
    pub fn input(&mut self, data: &str) -> Option<ClientRequest> {
        let owner = self.input_owner.as_deref()?;
        if self.focused.as_deref() != Some(owner) || self.focus_state != FocusState::Connected {
            return None;
        }
        Some(ClientRequest::Input { data: data.to_owned() })
    }

    /// One animation tick: drain at most one scrollback chunk per session
    /// with pending data, and recompute the dashboard throttle.
    pub fn tick(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        let focused = self.focused.clone();

        for (session_id, buffer) in self.buffers.iter_mut() {
            let Some(chunk) = buffer.next_chunk() else { continue };
            if focused.as_deref() == Some(session_id.as_str()) {
                effects.push(Effect::FocusWrite(chunk.clone()));
            }
            if self.splits.contains(session_id) {
                effects.push(Effect::SplitWrite { session_id: session_id.clone(), data: chunk });
            }
        }

        self.render_throttled = self.buffers.values().any(SessionBuffer::draining);
        effects
    }

    /// Handle one raw frame from either link.
    ///
    /// Frames are demultiplexed by `sessionId`. Session-scoped frames
    /// without one are tolerated with a warning and fall back to the last
    /// focused session.
    pub fn handle_frame(&mut self, source: LinkSource, text: &str) -> Vec<Effect> {
        let event = match self.parse_frame(text) {
            Some(event) => event,
            None => return Vec::new(),
        };

        // Session I/O from the non-selected link (e.g. hub echoes while a
        // direct agent link is active) is ignored; discovery frames are
        // merged from either link.
        let session_scoped = matches!(
            event,
            ServerEvent::Output { .. } | ServerEvent::Scrollback { .. } | ServerEvent::Status { .. }
        );
        let selected_local = self.selected_machine == "LOCAL";
        if session_scoped && source != io_source(selected_local) {
            return Vec::new();
        }
        self.handle_event(event)
    }

    fn parse_frame(&self, text: &str) -> Option<ServerEvent> {
        let mut value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!(err = %e, "unparseable frame dropped");
                return None;
            }
        };

        // Legacy peers may omit sessionId on session-scoped frames.
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default().to_owned();
        if matches!(kind.as_str(), "output" | "scrollback" | "status")
            && value.get("sessionId").is_none()
        {
            warn!(kind = %kind, "frame without sessionId, assuming last focused session");
            let fallback = self.last_focused.clone()?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("sessionId".to_owned(), Value::String(fallback));
            }
        }

        match serde_json::from_value(value) {
            Ok(event) => Some(event),
            Err(e) => {
                // Unknown tags are a no-op on the client side.
                debug!(err = %e, "unrecognized frame dropped");
                None
            }
        }
    }

    fn handle_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        match event {
            ServerEvent::Output { session_id, data } => self.on_output(&session_id, data),
            ServerEvent::Scrollback { session_id, data } => {
                self.buffers.entry(session_id.clone()).or_default().queue_scrollback(&data);
                self.mark_connected(&session_id)
            }
            ServerEvent::Status { session_id, state, reason } => {
                self.on_status(&session_id, state, reason)
            }
            ServerEvent::Sessions { sessions } => {
                self.sessions = sessions;
                Vec::new()
            }
            ServerEvent::Machines { machines } => {
                self.machines = machines;
                Vec::new()
            }
            ServerEvent::Projects { projects } => {
                self.projects = projects;
                Vec::new()
            }
            ServerEvent::Folders { .. }
            | ServerEvent::Pong {}
            | ServerEvent::UploadResult { .. }
            | ServerEvent::CreateSessionResult { .. }
            | ServerEvent::StartFolderSessionResult { .. } => Vec::new(),
            ServerEvent::Error { message, session_id } => {
                warn!(message = %message, ?session_id, "server error");
                Vec::new()
            }
        }
    }

    fn on_output(&mut self, session_id: &str, data: String) -> Vec<Effect> {
        let mut effects = self.mark_connected(session_id);

        if let Some(buffer) = self.buffers.get_mut(session_id) {
            buffer.activity = relay_proto::record::epoch_ms();
        }

        // Output goes to the focus terminal iff it matches the focused
        // session, and to a split panel if one exists.
        if self.focused.as_deref() == Some(session_id) {
            effects.push(Effect::FocusWrite(data.clone()));
        }
        if self.splits.contains(session_id) {
            effects.push(Effect::SplitWrite { session_id: session_id.to_owned(), data });
        }
        effects
    }

    fn on_status(
        &mut self,
        session_id: &str,
        state: ChannelState,
        _reason: Option<String>,
    ) -> Vec<Effect> {
        match state {
            ChannelState::Connected => self.mark_connected(session_id),
            ChannelState::Disconnected => {
                if let Some(buffer) = self.buffers.get_mut(session_id) {
                    buffer.connected = false;
                }
                if self.focused.as_deref() == Some(session_id) {
                    self.focus_state = FocusState::Disconnected;
                    // The dashboard keeps rendering; the session may
                    // reappear in a later registry scan.
                    return vec![Effect::State(FocusState::Disconnected)];
                }
                Vec::new()
            }
        }
    }

    /// First `output`/`scrollback`/`status:connected` for the focused
    /// session completes the connecting transition.
    fn mark_connected(&mut self, session_id: &str) -> Vec<Effect> {
        if let Some(buffer) = self.buffers.get_mut(session_id) {
            buffer.connected = true;
        }
        if self.focused.as_deref() == Some(session_id)
            && self.focus_state == FocusState::Connecting
        {
            self.focus_state = FocusState::Connected;
            return vec![Effect::State(FocusState::Connected)];
        }
        Vec::new()
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
