// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Pattern a session id must match. Ids name a registry file and a local
/// socket, so the alphabet is deliberately narrow.
pub fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 50
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Session launcher: owns one PTY child and serves it to local subscribers.
#[derive(Debug, Parser)]
#[command(name = "relay-session", version, about)]
pub struct Config {
    /// Session id; names the registry record and the channel socket.
    #[arg(long, env = "RELAY_SESSION_ID")]
    pub id: String,

    /// Working directory for the PTY child (default: current directory).
    #[arg(long, env = "RELAY_SESSION_CWD")]
    pub cwd: Option<PathBuf>,

    /// Session registry directory (default: ~/.claude-relay/sessions).
    #[arg(long, env = "RELAY_REGISTRY_DIR")]
    pub registry_dir: Option<PathBuf>,

    /// Terminal columns.
    #[arg(long, env = "RELAY_COLS", default_value = "120")]
    pub cols: u16,

    /// Terminal rows.
    #[arg(long, env = "RELAY_ROWS", default_value = "30")]
    pub rows: u16,

    /// Agent binary launched when no explicit command is given.
    #[arg(long, env = "RELAY_SESSION_COMMAND", default_value = "claude")]
    pub agent_command: String,

    /// Pass the agent's permission-skip flag through to the child.
    #[arg(long, env = "RELAY_SKIP_PERMISSIONS")]
    pub skip_permissions: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "RELAY_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Command to run (after --). Defaults to the agent command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !valid_session_id(&self.id) {
            anyhow::bail!(
                "invalid session id {:?}: expected 1-50 chars of [A-Za-z0-9_-]",
                self.id
            );
        }
        if self.cols == 0 || self.rows == 0 {
            anyhow::bail!("cols and rows must be positive");
        }
        Ok(())
    }

    /// Resolve the child argv: the explicit command when given, otherwise the
    /// configured agent command plus its permission-skip flag.
    pub fn child_command(&self) -> Vec<String> {
        let mut argv = if self.command.is_empty() {
            vec![self.agent_command.clone()]
        } else {
            self.command.clone()
        };
        if self.skip_permissions {
            argv.push("--dangerously-skip-permissions".to_owned());
        }
        argv
    }

    /// Resolve the registry directory, falling back to the per-user default.
    pub fn registry_dir(&self) -> PathBuf {
        match &self.registry_dir {
            Some(dir) => dir.clone(),
            None => crate::registry::default_dir(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
