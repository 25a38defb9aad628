// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level launcher runner: spawn the PTY child, serve the channel,
//! advertise through the registry, clean up on the way out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use relay_proto::record::{epoch_ms, SessionRecord, SessionStatus};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::channel::{self, LauncherShared};
use crate::config::Config;
use crate::pty::{ExitStatus, PtyChild, PtyEvent};
use crate::{preview, registry};

/// Registry heartbeat cadence. Readers treat 30 s of silence as death, so
/// this must stay well under that.
const HEARTBEAT: Duration = Duration::from_secs(5);

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = if std::env::var("RELAY_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run a launcher to completion: returns the child's exit status.
pub async fn run(config: Config) -> anyhow::Result<ExitStatus> {
    init_tracing(&config);

    let registry_dir = config.registry_dir();
    std::fs::create_dir_all(&registry_dir)
        .with_context(|| format!("create registry dir {}", registry_dir.display()))?;

    // Exactly one launcher per id: a live record means the caller must abort.
    if registry::find(&registry_dir, &config.id).is_some() {
        anyhow::bail!("session id {:?} is already live", config.id);
    }
    let socket_path = registry::socket_path(&registry_dir, &config.id);
    if socket_path.exists() {
        // No live record, so this is debris from a dead launcher.
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("remove stale socket {}", socket_path.display()))?;
    }

    let cwd = resolve_cwd(&config)?;
    let command = config.child_command();
    info!(id = %config.id, cwd = %cwd.display(), ?command, "starting session");

    let pty = PtyChild::spawn(&command, &cwd, config.cols, config.rows)?;
    let child_pid = pty.child_pid();

    let (pty_out_tx, mut pty_out_rx) = mpsc::channel::<Bytes>(256);
    let (pty_in_tx, pty_in_rx) = mpsc::channel::<PtyEvent>(256);
    let shared = Arc::new(LauncherShared::new(pty_in_tx));
    let shutdown = CancellationToken::new();

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("bind channel socket {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), "channel listening");

    let started = epoch_ms();
    let record = build_record(&config, &shared, &cwd, &socket_path, started);
    registry::write_record(&registry_dir, &record)?;

    // Channel server.
    tokio::spawn(channel::serve(listener, Arc::clone(&shared), shutdown.clone()));

    // Output pump: ring append and fan-out are atomic with respect to
    // attaching peers (see LauncherShared::output_tx).
    {
        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(chunk) = pty_out_rx.recv().await {
                let text = String::from_utf8_lossy(&chunk).into_owned();
                let mut ring = shared.scrollback.write().await;
                ring.append(&text);
                let _ = shared.output_tx.send(text);
            }
        });
    }

    // Heartbeat: rewrite the registry record with fresh liveness.
    {
        let shared = Arc::clone(&shared);
        let config_id = config.id.clone();
        let dir = registry_dir.clone();
        let cwd = cwd.clone();
        let socket = socket_path.clone();
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(HEARTBEAT);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = sd.cancelled() => return,
                    _ = tick.tick() => {}
                }
                let preview = preview::from_ring(&*shared.scrollback.read().await);
                let clients = shared.peer_count();
                let record = SessionRecord {
                    id: config_id.clone(),
                    cwd: cwd.display().to_string(),
                    pid: std::process::id(),
                    pipe: socket.display().to_string(),
                    started,
                    last_seen: epoch_ms(),
                    client_count: clients,
                    preview,
                    status: derive_status(clients),
                };
                if let Err(e) = registry::write_record(&dir, &record) {
                    warn!(err = %e, "heartbeat write failed");
                }
            }
        });
    }

    // Signal handling: first signal begins shutdown, second forces exit.
    spawn_signal_task(shutdown.clone());

    // Run the child; on external shutdown, nudge it with SIGTERM first.
    let child_handle = tokio::spawn(pty.run(pty_out_tx, pty_in_rx));
    let status = tokio::select! {
        joined = child_handle => flatten_join(joined),
        _ = shutdown.cancelled() => {
            info!("shutdown requested, terminating child");
            let _ = kill(Pid::from_raw(child_pid as i32), Signal::SIGTERM);
            ExitStatus { code: None, signal: Some(Signal::SIGTERM as i32) }
        }
    };

    // Tell every peer why the stream is ending, then tear down.
    let reason = status.describe();
    info!(reason = %reason, "session ending");
    let _ = shared.exit_tx.send(reason);
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    registry::remove_record(&registry_dir, &config.id);
    let _ = std::fs::remove_file(&socket_path);

    Ok(status)
}

fn flatten_join(joined: Result<anyhow::Result<ExitStatus>, tokio::task::JoinError>) -> ExitStatus {
    match joined {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            warn!(err = %e, "pty pump failed");
            ExitStatus { code: Some(1), signal: None }
        }
        Err(e) => {
            warn!(err = %e, "pty task panicked");
            ExitStatus { code: Some(1), signal: None }
        }
    }
}

fn resolve_cwd(config: &Config) -> anyhow::Result<PathBuf> {
    let cwd = match &config.cwd {
        Some(dir) => {
            if dir.is_absolute() {
                dir.clone()
            } else {
                std::env::current_dir()?.join(dir)
            }
        }
        None => std::env::current_dir()?,
    };
    if !cwd.is_dir() {
        anyhow::bail!("working directory {} does not exist", cwd.display());
    }
    Ok(cwd)
}

fn build_record(
    config: &Config,
    shared: &LauncherShared,
    cwd: &std::path::Path,
    socket: &std::path::Path,
    started: u64,
) -> SessionRecord {
    let clients = shared.peer_count();
    SessionRecord {
        id: config.id.clone(),
        cwd: cwd.display().to_string(),
        pid: std::process::id(),
        pipe: socket.display().to_string(),
        started,
        last_seen: started,
        client_count: clients,
        preview: String::new(),
        status: derive_status(clients),
    }
}

fn derive_status(clients: u32) -> SessionStatus {
    if clients > 0 {
        SessionStatus::Connected
    } else {
        SessionStatus::Running
    }
}

fn spawn_signal_task(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        // First signal: graceful shutdown.
        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        // Second signal: force exit.
        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
