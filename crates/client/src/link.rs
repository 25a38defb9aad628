// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket link with reconnect and application keepalive.
//!
//! One link per machine: the primary link targets the hub, a secondary one
//! may target a peer agent directly. Reconnects back off exponentially from
//! five seconds to a minute and reset on success.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_proto::ws::ClientRequest;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Application keepalive period.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Reconnect backoff bounds and growth.
pub const RECONNECT_MIN: Duration = Duration::from_secs(5);
pub const RECONNECT_MAX: Duration = Duration::from_secs(60);
const RECONNECT_FACTOR: f64 = 1.5;

/// Which connection a link event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSource {
    Hub,
    Agent,
}

/// Events surfaced to the runtime.
#[derive(Debug)]
pub enum LinkEvent {
    Connected,
    /// Raw JSON text of one server frame.
    Frame(String),
    Disconnected,
}

/// Exponential reconnect schedule: 5 s, 7.5 s, ... capped at 60 s.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self { current: RECONNECT_MIN }
    }

    /// Delay to wait before the next attempt, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = self.current.as_secs_f64() * RECONNECT_FACTOR;
        self.current = Duration::from_secs_f64(grown).min(RECONNECT_MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.current = RECONNECT_MIN;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for sending requests down a link.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    tx: mpsc::UnboundedSender<ClientRequest>,
    cancel: CancellationToken,
}

impl LinkHandle {
    pub fn send(&self, request: ClientRequest) {
        if self.tx.send(request).is_err() {
            debug!("request for closed link dropped");
        }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Append the auth token to a machine's advertised WebSocket address.
pub fn authed_url(address: &str, token: &str) -> String {
    let base = address.trim_end_matches('/');
    if base.contains('?') {
        format!("{base}&token={token}")
    } else {
        format!("{base}/?token={token}")
    }
}

/// Spawn a link task that keeps one connection alive until cancelled.
pub fn spawn_link(
    url: String,
    source: LinkSource,
    events_tx: mpsc::UnboundedSender<(LinkSource, LinkEvent)>,
    shutdown: CancellationToken,
) -> LinkHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = shutdown.child_token();
    let handle = LinkHandle { tx, cancel: cancel.clone() };
    tokio::spawn(run_link(url, source, events_tx, rx, cancel));
    handle
}

async fn run_link(
    url: String,
    source: LinkSource,
    events_tx: mpsc::UnboundedSender<(LinkSource, LinkEvent)>,
    mut requests_rx: mpsc::UnboundedReceiver<ClientRequest>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new();

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                info!(?source, "link connected");
                backoff.reset();
                if events_tx.send((source, LinkEvent::Connected)).is_err() {
                    return;
                }

                let (mut tx, mut rx) = stream.split();
                let mut ping = tokio::time::interval(PING_INTERVAL);
                ping.tick().await;

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = tx.send(Message::Close(None)).await;
                            return;
                        }
                        _ = ping.tick() => {
                            if send_request(&mut tx, &ClientRequest::Ping {}).await.is_err() {
                                break;
                            }
                        }
                        request = requests_rx.recv() => {
                            match request {
                                Some(request) => {
                                    if send_request(&mut tx, &request).await.is_err() {
                                        break;
                                    }
                                }
                                None => return,
                            }
                        }
                        msg = rx.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let event = LinkEvent::Frame(text.to_string());
                                    if events_tx.send((source, event)).is_err() {
                                        return;
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Err(e)) => {
                                    debug!(err = %e, "link error");
                                    break;
                                }
                                Some(Ok(_)) => {}
                            }
                        }
                    }
                }

                if events_tx.send((source, LinkEvent::Disconnected)).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(err = %e, "link connect failed");
            }
        }

        let delay = backoff.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn send_request<S>(tx: &mut S, request: &ClientRequest) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = serde_json::to_string(request).map_err(|_| ())?;
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "link_tests.rs"]
mod tests;
