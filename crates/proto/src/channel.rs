// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local session channel frames.
//!
//! The channel between a launcher and its in-host subscribers carries
//! newline-delimited JSON objects. Frames mirror the session-I/O subset of
//! the client WebSocket protocol but carry no session id — the channel is
//! per-session by construction.

use serde::{Deserialize, Serialize};

/// Control keys a client may send to the PTY by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlKey {
    CtrlC,
    CtrlD,
    Esc,
}

impl ControlKey {
    /// Canonical byte written into the PTY for this key.
    pub fn byte(&self) -> u8 {
        match self {
            Self::CtrlC => 0x03,
            Self::CtrlD => 0x04,
            Self::Esc => 0x1b,
        }
    }
}

/// Connection state reported in `status` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Connected,
    Disconnected,
}

/// One newline-delimited JSON frame on the local session channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Bounded history sent once to each peer on attach.
    Scrollback { data: String },
    /// Verbatim PTY output chunk.
    Output { data: String },
    Status {
        state: ChannelState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Raw bytes for the PTY.
    Input { data: String },
    Control { key: ControlKey },
    Resize { cols: u16, rows: u16 },
    Ping {},
    Pong {},
}

impl Frame {
    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"));
        line.push('\n');
        line
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
