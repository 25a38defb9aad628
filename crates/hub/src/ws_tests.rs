// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use relay_proto::record::{epoch_ms, SessionRecord, SessionStatus};

use crate::test_support::test_hub;

use super::*;

struct Fixture {
    hub: SharedHub,
    ctx: ClientContext,
    events_tx: mpsc::Sender<PipeEvent>,
    _events_rx: mpsc::Receiver<PipeEvent>,
    registry: tempfile::TempDir,
    _projects: tempfile::TempDir,
}

fn fixture() -> anyhow::Result<Fixture> {
    let registry = tempfile::tempdir()?;
    let projects = tempfile::tempdir()?;
    let hub = test_hub(registry.path(), projects.path())?;
    let (events_tx, events_rx) = mpsc::channel(64);
    Ok(Fixture {
        hub,
        ctx: ClientContext::new(),
        events_tx,
        _events_rx: events_rx,
        registry,
        _projects: projects,
    })
}

fn live_record(dir: &std::path::Path, id: &str, pipe: &str) -> anyhow::Result<()> {
    let record = SessionRecord {
        id: id.to_owned(),
        cwd: "/tmp".to_owned(),
        pid: std::process::id(),
        pipe: pipe.to_owned(),
        started: epoch_ms(),
        last_seen: epoch_ms(),
        client_count: 0,
        preview: String::new(),
        status: SessionStatus::Running,
    };
    relay_session::registry::write_record(dir, &record)?;
    Ok(())
}

#[tokio::test]
async fn ping_answers_pong() -> anyhow::Result<()> {
    let mut fx = fixture()?;
    let replies =
        handle_request(&fx.hub, &mut fx.ctx, &fx.events_tx, ClientRequest::Ping {}).await;
    assert!(matches!(replies.as_slice(), [ServerEvent::Pong {}]));
    Ok(())
}

#[tokio::test]
async fn list_sessions_reflects_registry() -> anyhow::Result<()> {
    let mut fx = fixture()?;
    live_record(fx.registry.path(), "proj", "/tmp/proj.sock")?;

    let replies =
        handle_request(&fx.hub, &mut fx.ctx, &fx.events_tx, ClientRequest::ListSessions {}).await;
    match replies.as_slice() {
        [ServerEvent::Sessions { sessions }] => {
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].id, "proj");
        }
        other => anyhow::bail!("unexpected replies: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn connect_unknown_session_reports_error_then_disconnect() -> anyhow::Result<()> {
    let mut fx = fixture()?;
    let replies = handle_request(
        &fx.hub,
        &mut fx.ctx,
        &fx.events_tx,
        ClientRequest::ConnectSession { session_id: "ghost".to_owned() },
    )
    .await;
    match replies.as_slice() {
        [ServerEvent::Error { message, session_id }, ServerEvent::Status { state, .. }] => {
            assert_eq!(message, "Session not found");
            assert_eq!(session_id.as_deref(), Some("ghost"));
            assert_eq!(*state, ChannelState::Disconnected);
        }
        other => anyhow::bail!("unexpected replies: {other:?}"),
    }
    assert!(fx.ctx.pipes.is_empty());
    Ok(())
}

#[tokio::test]
async fn connect_session_creates_one_pipe_and_sets_active() -> anyhow::Result<()> {
    let mut fx = fixture()?;
    let socket = fx.registry.path().join("proj.sock");
    let _listener = tokio::net::UnixListener::bind(&socket)?;
    live_record(fx.registry.path(), "proj", &socket.display().to_string())?;

    let request = ClientRequest::ConnectSession { session_id: "proj".to_owned() };
    let replies = handle_request(&fx.hub, &mut fx.ctx, &fx.events_tx, request.clone()).await;
    assert!(replies.is_empty());
    assert_eq!(fx.ctx.pipes.len(), 1);
    assert_eq!(fx.ctx.active.as_deref(), Some("proj"));

    // Wait for the dial to land, then re-connect: idempotent, one pipe,
    // a lone status:connected reply.
    for _ in 0..50 {
        if fx.ctx.pipes.values().next().map(|p| p.is_connected()).unwrap_or(false) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let replies = handle_request(&fx.hub, &mut fx.ctx, &fx.events_tx, request).await;
    match replies.as_slice() {
        [ServerEvent::Status { session_id, state, reason }] => {
            assert_eq!(session_id, "proj");
            assert_eq!(*state, ChannelState::Connected);
            assert_eq!(*reason, None);
        }
        other => anyhow::bail!("unexpected replies: {other:?}"),
    }
    assert_eq!(fx.ctx.pipes.len(), 1);
    Ok(())
}

#[tokio::test]
async fn input_without_active_session_is_dropped_silently() -> anyhow::Result<()> {
    let mut fx = fixture()?;
    let replies = handle_request(
        &fx.hub,
        &mut fx.ctx,
        &fx.events_tx,
        ClientRequest::Input { data: "x".to_owned() },
    )
    .await;
    assert!(replies.is_empty());
    Ok(())
}

#[tokio::test]
async fn list_machines_includes_local() -> anyhow::Result<()> {
    let mut fx = fixture()?;
    live_record(fx.registry.path(), "proj", "/tmp/proj.sock")?;

    let replies =
        handle_request(&fx.hub, &mut fx.ctx, &fx.events_tx, ClientRequest::ListMachines {}).await;
    match replies.as_slice() {
        [ServerEvent::Machines { machines }] => {
            assert_eq!(machines.len(), 1);
            assert_eq!(machines[0].id, "LOCAL");
            assert!(machines[0].is_local);
            assert_eq!(machines[0].session_count, 1);
        }
        other => anyhow::bail!("unexpected replies: {other:?}"),
    }
    Ok(())
}
