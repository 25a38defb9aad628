// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hub assembly: router, listener, background sweepers, shutdown sequence.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::state::{HubState, SharedHub};
use crate::{agent, agent_ws, assets, auth, webhook};

/// Grace period between shutdown start and hard exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Initialize tracing/logging from config.
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

/// Build the full hub router: root (page + client WS), agent WS, webhook,
/// static assets, auth middleware, and path-prefix rewriting outermost.
pub fn build_router(hub: SharedHub) -> Router {
    let mut router = Router::new()
        .route("/", get(assets::root_handler))
        .route("/agent", get(agent_ws::agent_ws_handler))
        .route("/webhook/github", post(webhook::webhook_handler));

    if let Some(ref dir) = hub.config.assets_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(middleware::from_fn_with_state(SharedHub::clone(&hub), auth::auth_layer))
        .layer(middleware::map_request_with_state(SharedHub::clone(&hub), assets::rewrite_prefix))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(hub)
}

/// Run the hub (or agent) until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);
    let hub = HubState::new(config);

    // Background sweepers.
    tokio::spawn(Arc::clone(&hub.machines).run_sweeper(hub.shutdown.clone()));
    tokio::spawn(Arc::clone(&hub.auth).run_sweeper(hub.shutdown.clone()));
    tokio::spawn(Arc::clone(&hub.launchers).run_sweeper(hub.shutdown.clone()));

    // Agent mode: outbound hub link.
    if hub.config.hub_url.is_some() {
        tokio::spawn(agent::run_agent_link(SharedHub::clone(&hub)));
    }

    spawn_signal_task(SharedHub::clone(&hub));

    // Shutdown sequence: close agent sockets, nudge launchers, then give the
    // listener a bounded window before a hard exit.
    {
        let hub = SharedHub::clone(&hub);
        tokio::spawn(async move {
            hub.shutdown.cancelled().await;
            hub.machines.shutdown().await;
            hub.launchers.terminate_all().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            info!("shutdown grace elapsed, exiting");
            std::process::exit(0);
        });
    }

    let addr: SocketAddr = format!("{}:{}", hub.config.host, hub.config.port)
        .parse()
        .context("invalid listen address")?;
    let router = build_router(SharedHub::clone(&hub));

    if hub.config.insecure {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("listen on {addr}"))?;
        info!(%addr, "listening (plain HTTP)");
        axum::serve(listener, router)
            .with_graceful_shutdown(hub.shutdown.clone().cancelled_owned())
            .await
            .context("serve failed")?;
    } else {
        let (cert, key) = match (&hub.config.tls_cert, &hub.config.tls_key) {
            (Some(cert), Some(key)) => (cert.clone(), key.clone()),
            _ => anyhow::bail!("TLS requires --tls-cert and --tls-key"),
        };
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
            .await
            .with_context(|| {
                format!("load TLS assets ({} / {})", cert.display(), key.display())
            })?;

        let handle = axum_server::Handle::new();
        {
            let handle = handle.clone();
            let shutdown = hub.shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });
        }

        info!(%addr, "listening (TLS)");
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(router.into_make_service())
            .await
            .with_context(|| format!("listen on {addr}"))?;
    }

    info!("listener closed");
    Ok(())
}

fn spawn_signal_task(hub: SharedHub) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

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
        hub.shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                error!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                error!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
