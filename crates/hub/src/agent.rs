// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent mode: the persistent outbound link to a hub.
//!
//! An agent process serves the same client surface as a hub and mirrors its
//! local registry and projects to the hub over this link. Reconnects are a
//! fixed five seconds apart; a replacement close from the hub (a newer
//! registration for the same machine id) ends the loop for good.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_proto::record::{AgentRequest, HubEvent};
use relay_proto::CLOSE_REPLACED;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::projects;
use crate::state::SharedHub;

/// Fixed reconnect delay.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Heartbeat period on the hub link.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Project/session mirror refresh period.
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

enum LinkEnd {
    /// Transport dropped; reconnect.
    Retry,
    /// The hub replaced us or registration is impossible; stop.
    Stop,
}

/// Run the agent link until shutdown (or replacement).
pub async fn run_agent_link(hub: SharedHub) {
    let Some(hub_url) = hub.config.hub_url.clone() else { return };
    let token = hub.config.agent_token.clone().unwrap_or_default();
    let url = format!("{}/agent?agent_token={token}", hub_url.trim_end_matches('/'));

    loop {
        if hub.shutdown.is_cancelled() {
            return;
        }
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                info!(hub = %hub_url, "hub link connected");
                match run_link(&hub, stream).await {
                    LinkEnd::Stop => return,
                    LinkEnd::Retry => {}
                }
            }
            Err(e) => {
                debug!(hub = %hub_url, err = %e, "hub link connect failed");
            }
        }

        tokio::select! {
            _ = hub.shutdown.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

async fn run_link(
    hub: &SharedHub,
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> LinkEnd {
    let (mut tx, mut rx) = stream.split();
    let machine_id = hub.config.machine_id();

    let register = AgentRequest::Register {
        machine_id: machine_id.clone(),
        hostname: crate::config::hostname(),
        address: hub.config.advertise_url.clone().unwrap_or_default(),
        agent_version: env!("CARGO_PKG_VERSION").to_owned(),
    };
    if send(&mut tx, &register).await.is_err() {
        return LinkEnd::Retry;
    }
    if send_snapshot(hub, &mut tx, &machine_id).await.is_err() {
        return LinkEnd::Retry;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
    heartbeat.tick().await;
    refresh.tick().await;

    loop {
        tokio::select! {
            _ = hub.shutdown.cancelled() => {
                let _ = tx.send(Message::Close(None)).await;
                return LinkEnd::Stop;
            }
            _ = heartbeat.tick() => {
                let beat = AgentRequest::Heartbeat { machine_id: machine_id.clone() };
                if send(&mut tx, &beat).await.is_err() {
                    return LinkEnd::Retry;
                }
            }
            _ = refresh.tick() => {
                if send_snapshot(hub, &mut tx, &machine_id).await.is_err() {
                    return LinkEnd::Retry;
                }
            }
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<HubEvent>(&text) {
                            Ok(HubEvent::Registered { success: false, error }) => {
                                warn!(?error, "hub rejected registration, stopping link");
                                return LinkEnd::Stop;
                            }
                            Ok(HubEvent::Registered { .. }) => {
                                debug!("hub acknowledged registration");
                            }
                            Ok(HubEvent::Pong {}) => {}
                            Err(e) => debug!(err = %e, "unrecognized hub message"),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            if u16::from(frame.code) == CLOSE_REPLACED {
                                info!("replaced by a newer agent connection, stopping link");
                                return LinkEnd::Stop;
                            }
                        }
                        return LinkEnd::Retry;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(err = %e, "hub link error");
                        return LinkEnd::Retry;
                    }
                    None => return LinkEnd::Retry,
                }
            }
        }
    }
}

/// Send the current local projects and sessions to the hub.
async fn send_snapshot<S>(hub: &SharedHub, tx: &mut S, machine_id: &str) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let sessions = relay_session::registry::scan(&hub.config.registry_dir());
    let project_list = projects::scan(&hub.config.projects_dir(), &sessions);

    let projects_msg =
        AgentRequest::Projects { machine_id: machine_id.to_owned(), projects: project_list };
    send(tx, &projects_msg).await?;

    let sessions_msg = AgentRequest::Sessions { machine_id: machine_id.to_owned(), sessions };
    send(tx, &sessions_msg).await
}

async fn send<S>(tx: &mut S, request: &AgentRequest) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = serde_json::to_string(request).map_err(|_| ())?;
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}
