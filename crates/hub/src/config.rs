// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Hub server: bridges browser clients to local sessions and peer agents.
#[derive(Debug, Clone, Parser)]
#[command(name = "relay-hub", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on (HTTP and WebSocket upgrades share it).
    #[arg(long, env = "RELAY_PORT", default_value = "8443")]
    pub port: u16,

    /// Bearer token for client endpoints.
    #[arg(long, env = "RELAY_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Bearer token for the agent endpoint (and agent mode's outbound link).
    #[arg(long, env = "RELAY_AGENT_TOKEN")]
    pub agent_token: Option<String>,

    /// PEM-encoded TLS private key.
    #[arg(long, env = "RELAY_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// PEM-encoded TLS certificate.
    #[arg(long, env = "RELAY_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Serve plain HTTP instead of TLS (tests and trusted LANs only).
    #[arg(long, env = "RELAY_INSECURE")]
    pub insecure: bool,

    /// Session registry directory (default: ~/.claude-relay/sessions).
    #[arg(long, env = "RELAY_REGISTRY_DIR")]
    pub registry_dir: Option<PathBuf>,

    /// Base directory scanned for projects (default: ~/claude-projects).
    #[arg(long, env = "RELAY_PROJECTS_DIR")]
    pub projects_dir: Option<PathBuf>,

    /// Directory of static client assets.
    #[arg(long, env = "RELAY_ASSETS_DIR")]
    pub assets_dir: Option<PathBuf>,

    /// Reverse-proxy path prefix (e.g. "/cnm") stripped before routing.
    #[arg(long, env = "RELAY_PATH_PREFIX")]
    pub path_prefix: Option<String>,

    /// Disable file uploads.
    #[arg(long, env = "RELAY_DISABLE_UPLOADS")]
    pub disable_uploads: bool,

    /// Maximum decoded upload size in bytes.
    #[arg(long, env = "RELAY_MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,

    /// Webhook HMAC secret; signatures are not checked when unset.
    #[arg(long, env = "RELAY_WEBHOOK_SECRET")]
    pub webhook_secret: Option<String>,

    /// Shell command run for a verified webhook delivery.
    #[arg(long, env = "RELAY_WEBHOOK_COMMAND")]
    pub webhook_command: Option<String>,

    /// Launcher binary spawned for new sessions.
    #[arg(long, env = "RELAY_LAUNCHER_BIN", default_value = "relay-session")]
    pub launcher_bin: String,

    /// Default PTY geometry for new sessions and initial attach resize.
    #[arg(long, env = "RELAY_COLS", default_value = "120")]
    pub cols: u16,
    #[arg(long, env = "RELAY_ROWS", default_value = "30")]
    pub rows: u16,

    /// Hub URL to federate with; presence switches this process to agent mode.
    #[arg(long, env = "RELAY_HUB_URL")]
    pub hub_url: Option<String>,

    /// Machine id announced to the hub (agent mode; default: hostname).
    #[arg(long, env = "RELAY_MACHINE_ID")]
    pub machine_id: Option<String>,

    /// WebSocket URL at which clients can reach this process directly
    /// (agent mode; sent in the registration).
    #[arg(long, env = "RELAY_ADVERTISE_URL")]
    pub advertise_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "RELAY_LOG_FORMAT", default_value = "json")]
    pub log_format: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth_token.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("--auth-token is required");
        }
        if !self.insecure && (self.tls_key.is_none() || self.tls_cert.is_none()) {
            anyhow::bail!("--tls-key and --tls-cert are required unless --insecure is set");
        }
        if self.hub_url.is_some() {
            if self.agent_token.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("agent mode requires --agent-token");
            }
            if self.advertise_url.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("agent mode requires --advertise-url");
            }
        }
        if let Some(ref prefix) = self.path_prefix {
            if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
                anyhow::bail!("--path-prefix must look like \"/name\"");
            }
        }
        Ok(())
    }

    /// Resolve the registry directory.
    pub fn registry_dir(&self) -> PathBuf {
        match &self.registry_dir {
            Some(dir) => dir.clone(),
            None => relay_session::registry::default_dir(),
        }
    }

    /// Resolve the projects root.
    pub fn projects_dir(&self) -> PathBuf {
        match &self.projects_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("claude-projects"),
        }
    }

    /// Machine id announced in agent mode.
    pub fn machine_id(&self) -> String {
        match &self.machine_id {
            Some(id) => id.clone(),
            None => hostname(),
        }
    }
}

/// Best-effort local hostname.
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
