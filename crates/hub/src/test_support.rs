// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Helpers for unit and integration tests: hub state builders and an
//! in-process plain-HTTP server.

use std::net::SocketAddr;
use std::path::Path;

use clap::Parser;

use crate::config::Config;
use crate::state::{HubState, SharedHub};

/// Build a hub `Config` for tests: insecure transport, temp directories.
pub fn test_config(registry_dir: &Path, projects_dir: &Path) -> anyhow::Result<Config> {
    let args = [
        "relay-hub",
        "--insecure",
        "--auth-token",
        "test-token",
        "--agent-token",
        "agent-token",
        "--launcher-bin",
        "/bin/false",
    ];
    let mut config = Config::try_parse_from(args)?;
    config.registry_dir = Some(registry_dir.to_path_buf());
    config.projects_dir = Some(projects_dir.to_path_buf());
    Ok(config)
}

/// Build hub state around a test config.
pub fn test_hub(registry_dir: &Path, projects_dir: &Path) -> anyhow::Result<SharedHub> {
    Ok(HubState::new(test_config(registry_dir, projects_dir)?))
}

/// Serve the full hub router on an ephemeral local port.
///
/// Returns the bound address; the server task runs until the hub's shutdown
/// token fires or the test ends.
pub async fn spawn_http_server(hub: SharedHub) -> anyhow::Result<SocketAddr> {
    let router = crate::run::build_router(SharedHub::clone(&hub));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let shutdown = hub.shutdown.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
    });
    Ok(addr)
}
