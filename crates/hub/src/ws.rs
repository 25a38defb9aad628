// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client WebSocket handler.
//!
//! One task per client multiplexes every attached session over a single
//! socket. Inbound requests are rate-limited and dispatched; pipe tasks
//! report back through an event channel owned by this task, which is the
//! only writer to the socket.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use relay_proto::channel::{ChannelState, Frame};
use relay_proto::ws::{ws_error, ws_status, ClientRequest, ServerEvent};
use relay_proto::{CLOSE_AUTH_FAILURE, CLOSE_GOING_AWAY};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::{authorize, Authorized};
use crate::pipe::{self, PipeEvent, PipeHandle};
use crate::ratelimit::RateLimiter;
use crate::state::SharedHub;
use crate::{projects, spawn, upload};

/// Application keepalive period; two missed liveness responses terminate.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Per-client hub state: attached pipes and the active session.
struct ClientContext {
    pipes: HashMap<String, PipeHandle>,
    active: Option<String>,
    limiter: RateLimiter,
}

impl ClientContext {
    fn new() -> Self {
        Self { pipes: HashMap::new(), active: None, limiter: RateLimiter::default() }
    }

    fn active_pipe(&self) -> Option<&PipeHandle> {
        self.pipes.get(self.active.as_deref()?)
    }
}

/// Check client credentials for a WebSocket upgrade: session cookie or
/// bearer token in the query string.
pub async fn client_authorized(hub: &SharedHub, headers: &HeaderMap, query: Option<&str>) -> bool {
    !matches!(authorize(hub, headers, query).await, Authorized::No)
}

/// Upgrade and run a client connection. `authed` was decided pre-upgrade;
/// failures still upgrade so the close code can carry the signal.
pub fn handle_upgrade(hub: SharedHub, ws: WebSocketUpgrade, authed: bool) -> Response {
    ws.on_upgrade(move |socket| handle_client(hub, socket, authed)).into_response()
}

async fn handle_client(hub: SharedHub, socket: WebSocket, authed: bool) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    if !authed {
        let _ = send_event(&mut ws_tx, &ws_error("Authentication failed", None)).await;
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_AUTH_FAILURE,
                reason: "unauthorized".into(),
            })))
            .await;
        return;
    }

    let (events_tx, mut events_rx) = mpsc::channel::<PipeEvent>(256);
    let mut ctx = ClientContext::new();

    // Initial snapshot so the dashboard renders without a round trip.
    let sessions = relay_session::registry::scan(&hub.config.registry_dir());
    if send_event(&mut ws_tx, &ServerEvent::Sessions { sessions }).await.is_err() {
        return;
    }

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await; // immediate first tick
    let mut alive = true;
    let mut missed: u8 = 0;

    'client: loop {
        tokio::select! {
            _ = hub.shutdown.cancelled() => {
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "shutting down".into(),
                    })))
                    .await;
                break;
            }
            _ = ping.tick() => {
                if alive {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= 2 {
                        debug!("client missed two keepalives, terminating");
                        break;
                    }
                }
                alive = false;
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                if handle_pipe_event(&mut ctx, &mut ws_tx, event).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                alive = true;
                match msg {
                    Message::Text(text) => {
                        if !ctx.limiter.allow() {
                            let reply = ws_error("Rate limit exceeded", None);
                            if send_event(&mut ws_tx, &reply).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        let request: ClientRequest = match serde_json::from_str(&text) {
                            Ok(request) => request,
                            Err(e) => {
                                debug!(err = %e, "dropping unrecognized client message");
                                continue;
                            }
                        };
                        let replies = handle_request(&hub, &mut ctx, &events_tx, request).await;
                        for reply in replies {
                            if send_event(&mut ws_tx, &reply).await.is_err() {
                                break 'client;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    // Protocol pongs (and pings, answered by the stack)
                    // only matter as liveness, already noted above.
                    _ => {}
                }
            }
        }
    }

    for handle in ctx.pipes.values() {
        handle.close();
    }
}

/// Route one pipe event to the socket, pruning ended pipes.
async fn handle_pipe_event(
    ctx: &mut ClientContext,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: PipeEvent,
) -> Result<(), ()> {
    match event {
        PipeEvent::Forward(text) => {
            ws_tx.send(Message::Text(text.into())).await.map_err(|_| ())
        }
        PipeEvent::Event(event) => send_event(ws_tx, &event).await,
        PipeEvent::Closed { session_id, reason, with_error } => {
            ctx.pipes.remove(&session_id);
            if with_error {
                send_event(ws_tx, &ws_error(reason.clone(), Some(session_id.clone()))).await?;
            }
            send_event(
                ws_tx,
                &ws_status(&session_id, ChannelState::Disconnected, Some(reason)),
            )
            .await
        }
    }
}

/// Dispatch one client request, returning immediate replies.
async fn handle_request(
    hub: &SharedHub,
    ctx: &mut ClientContext,
    events_tx: &mpsc::Sender<PipeEvent>,
    request: ClientRequest,
) -> Vec<ServerEvent> {
    match request {
        ClientRequest::Ping {} => vec![ServerEvent::Pong {}],

        ClientRequest::ListSessions {} => {
            let sessions = relay_session::registry::scan(&hub.config.registry_dir());
            vec![ServerEvent::Sessions { sessions }]
        }

        ClientRequest::ListProjects {} => {
            let sessions = relay_session::registry::scan(&hub.config.registry_dir());
            let projects = projects::scan(&hub.config.projects_dir(), &sessions);
            vec![ServerEvent::Projects { projects }]
        }

        ClientRequest::ListFolders {} => {
            let folders = projects::folders(&hub.config.projects_dir());
            vec![ServerEvent::Folders { folders }]
        }

        ClientRequest::ListMachines {} => {
            // Fold the local machine's current view in before answering.
            let sessions = relay_session::registry::scan(&hub.config.registry_dir());
            let local_projects = projects::scan(&hub.config.projects_dir(), &sessions);
            hub.machines.refresh_local(local_projects, sessions).await;
            let machines = hub.machines.summaries().await;
            vec![ServerEvent::Machines { machines }]
        }

        ClientRequest::ConnectSession { session_id } => {
            connect_session(hub, ctx, events_tx, session_id)
        }

        ClientRequest::Input { data } => {
            match ctx.active_pipe() {
                Some(handle) => handle.send(Frame::Input { data }),
                None => debug!("input with no active session dropped"),
            }
            vec![]
        }

        ClientRequest::Control { key } => {
            match ctx.active_pipe() {
                Some(handle) => handle.send(Frame::Control { key }),
                None => debug!("control with no active session dropped"),
            }
            vec![]
        }

        ClientRequest::Resize { cols, rows } => {
            match ctx.active_pipe() {
                Some(handle) => handle.send(Frame::Resize { cols, rows }),
                None => debug!("resize with no active session dropped"),
            }
            vec![]
        }

        ClientRequest::UploadFile { session_id, filename, data, size } => {
            vec![upload::handle_upload(hub, &session_id, &filename, &data, size).await]
        }

        ClientRequest::CreateSession { project_name } => {
            vec![spawn::create_session(hub, &project_name).await]
        }

        ClientRequest::StartFolderSession { folder_name, skip_permissions } => {
            vec![spawn::start_folder_session(hub, &folder_name, skip_permissions).await]
        }
    }
}

/// The attach algorithm. Idempotent for an already-connected session: it
/// becomes active again and only a `status:connected` goes out — no second
/// scrollback, no new pipe.
fn connect_session(
    hub: &SharedHub,
    ctx: &mut ClientContext,
    events_tx: &mpsc::Sender<PipeEvent>,
    session_id: String,
) -> Vec<ServerEvent> {
    if let Some(handle) = ctx.pipes.get(&session_id) {
        let connected = handle.is_connected();
        ctx.active = Some(session_id.clone());
        if connected {
            return vec![ws_status(&session_id, ChannelState::Connected, None)];
        }
        // Dial still in flight; its outcome will reach the client shortly.
        return vec![];
    }

    let record = match relay_session::registry::find(&hub.config.registry_dir(), &session_id) {
        Some(record) => record,
        None => {
            warn!(session_id = %session_id, "connect to unknown session");
            return vec![
                ws_error("Session not found", Some(session_id.clone())),
                ws_status(&session_id, ChannelState::Disconnected, Some("Session not found".to_owned())),
            ];
        }
    };

    let handle = pipe::spawn_pipe(
        session_id.clone(),
        PathBuf::from(record.pipe),
        events_tx.clone(),
        (hub.config.cols, hub.config.rows),
    );
    ctx.pipes.insert(session_id.clone(), handle);
    ctx.active = Some(session_id);
    vec![]
}

/// Serialize and send one event.
async fn send_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|_| ())?;
    ws_tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
