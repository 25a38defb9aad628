// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-(client, session) bridge to a launcher's channel socket.
//!
//! Each attach dials the session's Unix socket and pumps newline-delimited
//! JSON both ways: frames from the client are written as lines; lines from
//! the launcher are stamped with the session id and handed back to the
//! owning client task. The bridge task owns the socket; the client task
//! holds a [`PipeHandle`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_proto::channel::Frame;
use relay_proto::ws::ServerEvent;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Channel dial timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel keepalive ping period. A missed reply does not cancel the pipe —
/// the channel itself may simply be idle.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Hard cap on the accumulation buffer; overflow destroys the pipe.
pub const READ_BUFFER_CAP: usize = 1024 * 1024;

/// Events a pipe task reports to the client task that owns it.
#[derive(Debug)]
pub enum PipeEvent {
    /// A launcher line with `sessionId` stamped, ready to send verbatim.
    Forward(String),
    /// A typed event (non-JSON output fallback).
    Event(ServerEvent),
    /// The pipe ended. `with_error` asks the client task to emit an `error`
    /// frame ahead of the `status:disconnected`.
    Closed { session_id: String, reason: String, with_error: bool },
}

/// Client-task-side handle to a live pipe.
#[derive(Debug)]
pub struct PipeHandle {
    pub session_id: String,
    frame_tx: mpsc::UnboundedSender<Frame>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl PipeHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue a frame for the launcher. Unbounded by design: inbound client
    /// traffic is rate-limited upstream, and channel writes must not be
    /// silently dropped.
    pub fn send(&self, frame: Frame) {
        if self.frame_tx.send(frame).is_err() {
            debug!(session_id = %self.session_id, "frame for closed pipe dropped");
        }
    }

    /// Tear the pipe down without emitting events.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Dial a session's channel socket and run the bridge until it ends.
pub fn spawn_pipe(
    session_id: String,
    socket_path: PathBuf,
    events_tx: mpsc::Sender<PipeEvent>,
    initial_geometry: (u16, u16),
) -> PipeHandle {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(false));
    let cancel = CancellationToken::new();

    let handle = PipeHandle {
        session_id: session_id.clone(),
        frame_tx,
        connected: Arc::clone(&connected),
        cancel: cancel.clone(),
    };

    tokio::spawn(run_pipe(
        session_id,
        socket_path,
        events_tx,
        frame_rx,
        connected,
        cancel,
        initial_geometry,
    ));

    handle
}

#[allow(clippy::too_many_arguments)]
async fn run_pipe(
    session_id: String,
    socket_path: PathBuf,
    events_tx: mpsc::Sender<PipeEvent>,
    mut frame_rx: mpsc::UnboundedReceiver<Frame>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    initial_geometry: (u16, u16),
) {
    let closed = |reason: String, with_error: bool| PipeEvent::Closed {
        session_id: session_id.clone(),
        reason,
        with_error,
    };

    // Dial with a bounded wait; both the timeout and error paths end here,
    // so the timer is cleared exactly once by construction.
    let stream = tokio::select! {
        _ = cancel.cancelled() => return,
        dialed = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&socket_path)) => {
            match dialed {
                Err(_) => {
                    let _ = events_tx.send(closed("Connection timed out".to_owned(), true)).await;
                    return;
                }
                Ok(Err(e)) => {
                    let _ = events_tx.send(closed(format!("Connection failed: {e}"), true)).await;
                    return;
                }
                Ok(Ok(stream)) => stream,
            }
        }
    };

    connected.store(true, Ordering::Release);
    let (mut reader, mut writer) = stream.into_split();

    // The launcher applies its own default, but an explicit initial geometry
    // keeps a freshly attached terminal consistent with the dashboard. The
    // client's own resize may follow at any time and simply wins.
    let (cols, rows) = initial_geometry;
    if write_frame(&mut writer, &Frame::Resize { cols, rows }).await.is_err() {
        connected.store(false, Ordering::Release);
        let _ = events_tx.send(closed("Pipe write failed".to_owned(), true)).await;
        return;
    }

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; the channel greeting already proves
    // liveness, so skip it.
    keepalive.tick().await;

    let mut acc: Vec<u8> = Vec::new();
    let mut read_buf = vec![0u8; 16 * 1024];

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            _ = keepalive.tick() => {
                if write_frame(&mut writer, &Frame::Ping {}).await.is_err() {
                    break Some(("Pipe write failed".to_owned(), true));
                }
            }
            frame = frame_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if write_frame(&mut writer, &frame).await.is_err() {
                            break Some(("Pipe write failed".to_owned(), true));
                        }
                    }
                    None => break None,
                }
            }
            read = reader.read(&mut read_buf) => {
                let n = match read {
                    Ok(0) => break Some(("Pipe closed".to_owned(), false)),
                    Ok(n) => n,
                    Err(e) => break Some((format!("Pipe error: {e}"), false)),
                };
                acc.extend_from_slice(&read_buf[..n]);
                if forward_lines(&session_id, &mut acc, &events_tx).await.is_err() {
                    break None; // client task is gone
                }
                if acc.len() > READ_BUFFER_CAP {
                    warn!(session_id = %session_id, len = acc.len(), "pipe buffer overflow");
                    break Some(("Buffer overflow".to_owned(), true));
                }
            }
        }
    };

    connected.store(false, Ordering::Release);
    if let Some((reason, with_error)) = end {
        let _ = events_tx.send(closed(reason, with_error)).await;
    }
}

/// Forward each complete line, stamping `sessionId`. Channel-level `pong`
/// replies are swallowed; non-JSON lines become `output` events.
async fn forward_lines(
    session_id: &str,
    acc: &mut Vec<u8>,
    events_tx: &mpsc::Sender<PipeEvent>,
) -> Result<(), ()> {
    while let Some(pos) = acc.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = acc.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(mut value) if value.is_object() => {
                if value.get("type").and_then(|t| t.as_str()) == Some("pong") {
                    continue;
                }
                if let Some(obj) = value.as_object_mut() {
                    obj.insert(
                        "sessionId".to_owned(),
                        serde_json::Value::String(session_id.to_owned()),
                    );
                }
                PipeEvent::Forward(value.to_string())
            }
            _ => PipeEvent::Event(ServerEvent::Output {
                session_id: session_id.to_owned(),
                data: line,
            }),
        };
        events_tx.send(event).await.map_err(|_| ())?;
    }
    Ok(())
}

async fn write_frame(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    frame: &Frame,
) -> std::io::Result<()> {
    writer.write_all(frame.to_line().as_bytes()).await
}

#[cfg(test)]
#[path = "pipe_tests.rs"]
mod tests;
