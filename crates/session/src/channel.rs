// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local session channel server.
//!
//! Serves newline-delimited JSON frames to any number of in-host peers over
//! a Unix socket. Each peer gets one greeting (`scrollback` then
//! `status:connected`), then a verbatim copy of every PTY output chunk.
//! Inbound frames drive the PTY; a slow or broken peer is dropped without
//! touching the child or the other peers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use relay_proto::channel::{ChannelState, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pty::PtyEvent;
use crate::scrollback::{ScrollbackRing, TAIL_BYTES, TAIL_LINES};

/// Per-peer inbound parse buffer cap. Overflow resets the buffer and logs a
/// warning; the peer stays connected.
pub const PARSE_BUFFER_CAP: usize = 64 * 1024;

/// State shared between the channel server, the output pump, and the
/// heartbeat task.
pub struct LauncherShared {
    pub scrollback: RwLock<ScrollbackRing>,
    /// PTY output fan-out. The pump appends to the ring and broadcasts while
    /// holding the ring's write lock, so a peer that snapshots under the
    /// read lock sees every chunk exactly once.
    pub output_tx: broadcast::Sender<String>,
    pub pty_tx: mpsc::Sender<PtyEvent>,
    pub peers: AtomicU32,
    /// Child-exit notice carrying the reason string.
    pub exit_tx: broadcast::Sender<String>,
}

impl LauncherShared {
    pub fn new(pty_tx: mpsc::Sender<PtyEvent>) -> Self {
        let (output_tx, _) = broadcast::channel(256);
        let (exit_tx, _) = broadcast::channel(4);
        Self {
            scrollback: RwLock::new(ScrollbackRing::default()),
            output_tx,
            pty_tx,
            peers: AtomicU32::new(0),
            exit_tx,
        }
    }

    pub fn peer_count(&self) -> u32 {
        self.peers.load(Ordering::Relaxed)
    }
}

/// Accept channel peers until shutdown.
pub async fn serve(
    listener: UnixListener,
    shared: Arc<LauncherShared>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let shared = Arc::clone(&shared);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_peer(stream, shared, shutdown).await;
                        });
                    }
                    Err(e) => {
                        debug!(err = %e, "channel accept error");
                    }
                }
            }
        }
    }
}

/// Per-peer event loop.
async fn handle_peer(stream: UnixStream, shared: Arc<LauncherShared>, shutdown: CancellationToken) {
    shared.peers.fetch_add(1, Ordering::Relaxed);
    let (mut reader, mut writer) = stream.into_split();

    // Snapshot and subscribe atomically with respect to the output pump:
    // the pump broadcasts while holding the ring's write lock.
    let (tail, mut output_rx) = {
        let ring = shared.scrollback.read().await;
        (ring.tail(TAIL_BYTES, TAIL_LINES), shared.output_tx.subscribe())
    };
    let mut exit_rx = shared.exit_tx.subscribe();

    let greeting_ok = send_frame(&mut writer, &Frame::Scrollback { data: tail }).await.is_ok()
        && send_frame(
            &mut writer,
            &Frame::Status { state: ChannelState::Connected, reason: None },
        )
        .await
        .is_ok();

    if greeting_ok {
        peer_loop(&shared, &mut reader, &mut writer, &mut output_rx, &mut exit_rx, &shutdown)
            .await;
    }

    shared.peers.fetch_sub(1, Ordering::Relaxed);
}

async fn peer_loop(
    shared: &LauncherShared,
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    output_rx: &mut broadcast::Receiver<String>,
    exit_rx: &mut broadcast::Receiver<String>,
    shutdown: &CancellationToken,
) {
    let mut parse_buf: Vec<u8> = Vec::new();
    let mut read_buf = vec![0u8; 8192];

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            chunk = output_rx.recv() => {
                match chunk {
                    Ok(data) => {
                        if send_frame(writer, &Frame::Output { data }).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "peer lagged behind pty output");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            reason = exit_rx.recv() => {
                let reason = reason.unwrap_or_else(|_| "Process exited".to_owned());
                let _ = send_frame(
                    writer,
                    &Frame::Status {
                        state: ChannelState::Disconnected,
                        reason: Some(reason),
                    },
                )
                .await;
                return;
            }
            read = reader.read(&mut read_buf) => {
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                parse_buf.extend_from_slice(&read_buf[..n]);
                if drain_frames(shared, writer, &mut parse_buf).await.is_err() {
                    return;
                }
                if parse_buf.len() > PARSE_BUFFER_CAP {
                    warn!(len = parse_buf.len(), "channel parse buffer overflow, resetting");
                    parse_buf.clear();
                }
            }
        }
    }
}

/// Parse and dispatch every complete line in the buffer. An `Err` means a
/// write to this peer failed and the peer should be dropped.
async fn drain_frames(
    shared: &LauncherShared,
    writer: &mut OwnedWriteHalf,
    parse_buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    while let Some(pos) = parse_buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = parse_buf.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
        if line.trim().is_empty() {
            continue;
        }

        let frame: Frame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(err = %e, "unparseable channel frame");
                continue;
            }
        };

        match frame {
            Frame::Input { data } => {
                let _ = shared.pty_tx.send(PtyEvent::Write(Bytes::from(data.into_bytes()))).await;
            }
            Frame::Control { key } => {
                let _ = shared.pty_tx.send(PtyEvent::Write(Bytes::from(vec![key.byte()]))).await;
            }
            Frame::Resize { cols, rows } => {
                let _ = shared.pty_tx.send(PtyEvent::Resize { cols, rows }).await;
            }
            Frame::Ping {} => {
                send_frame(writer, &Frame::Pong {}).await?;
            }
            other => {
                debug!(?other, "ignoring unexpected channel frame");
            }
        }
    }
    Ok(())
}

async fn send_frame(writer: &mut OwnedWriteHalf, frame: &Frame) -> std::io::Result<()> {
    writer.write_all(frame.to_line().as_bytes()).await
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
