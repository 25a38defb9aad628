// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hub-side `/agent` endpoint: peer machines register here and keep their
//! fleet records fresh with heartbeats.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use relay_proto::record::{AgentRequest, HubEvent};
use relay_proto::CLOSE_GOING_AWAY;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::constant_time_eq;
use crate::machines::AgentHandle;
use crate::state::SharedHub;

#[derive(Debug, Deserialize)]
pub struct AgentQuery {
    pub agent_token: Option<String>,
}

/// `GET /agent` — WebSocket upgrade for peer agents. A bad token rejects
/// the upgrade itself with 401.
pub async fn agent_ws_handler(
    State(hub): State<SharedHub>,
    Query(query): Query<AgentQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let ok = match (hub.config.agent_token.as_deref(), query.agent_token.as_deref()) {
        (Some(expected), Some(provided)) => constant_time_eq(expected, provided),
        _ => false,
    };
    if !ok {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    ws.on_upgrade(move |socket| handle_agent(hub, socket)).into_response()
}

async fn handle_agent(hub: SharedHub, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut close_rx) = AgentHandle::new();
    let mut registered_id: Option<String> = None;
    // When the registry itself closes this socket (replacement, sweep,
    // shutdown) the machine record is already in its final state.
    let mut registry_closed = false;

    loop {
        tokio::select! {
            _ = hub.shutdown.cancelled() => {
                registry_closed = true;
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "shutting down".into(),
                    })))
                    .await;
                break;
            }
            code = close_rx.recv() => {
                let Some(code) = code else { break };
                registry_closed = true;
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame { code, reason: "".into() })))
                    .await;
                break;
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let request: AgentRequest = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        debug!(err = %e, "dropping unrecognized agent message");
                        continue;
                    }
                };
                if handle_agent_request(&hub, &handle, &mut registered_id, &mut ws_tx, request)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    if !registry_closed {
        if let Some(id) = registered_id {
            hub.machines.mark_disconnected(&id).await;
        }
    }
}

async fn handle_agent_request(
    hub: &SharedHub,
    handle: &AgentHandle,
    registered_id: &mut Option<String>,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    request: AgentRequest,
) -> Result<(), ()> {
    match request {
        AgentRequest::Register { machine_id, hostname, address, agent_version } => {
            let result = hub
                .machines
                .register(&machine_id, hostname, address, agent_version, handle.clone())
                .await;
            let reply = match result {
                Ok(()) => {
                    *registered_id = Some(machine_id);
                    HubEvent::Registered { success: true, error: None }
                }
                Err(error) => {
                    warn!(machine_id = %machine_id, error = %error, "agent registration rejected");
                    HubEvent::Registered { success: false, error: Some(error) }
                }
            };
            send_event(ws_tx, &reply).await
        }
        AgentRequest::Projects { machine_id, projects } => {
            if !hub.machines.set_projects(&machine_id, projects).await {
                debug!(machine_id = %machine_id, "projects for unknown machine dropped");
            }
            Ok(())
        }
        AgentRequest::Sessions { machine_id, sessions } => {
            if !hub.machines.set_sessions(&machine_id, sessions).await {
                debug!(machine_id = %machine_id, "sessions for unknown machine dropped");
            }
            Ok(())
        }
        AgentRequest::Heartbeat { machine_id } => {
            hub.machines.heartbeat(&machine_id).await;
            send_event(ws_tx, &HubEvent::Pong {}).await
        }
    }
}

async fn send_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: &HubEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|_| ())?;
    ws_tx.send(Message::Text(text.into())).await.map_err(|_| ())
}
