// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::*;

type FrameLines = tokio::io::Lines<BufReader<OwnedReadHalf>>;

struct Fixture {
    shared: Arc<LauncherShared>,
    pty_rx: mpsc::Receiver<PtyEvent>,
    socket: std::path::PathBuf,
    shutdown: CancellationToken,
    _dir: tempfile::TempDir,
}

async fn start_server() -> anyhow::Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let socket = dir.path().join("test.sock");
    let (pty_tx, pty_rx) = mpsc::channel(16);
    let shared = Arc::new(LauncherShared::new(pty_tx));
    let listener = UnixListener::bind(&socket)?;
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(listener, Arc::clone(&shared), shutdown.clone()));
    Ok(Fixture { shared, pty_rx, socket, shutdown, _dir: dir })
}

async fn read_frame(lines: &mut FrameLines) -> anyhow::Result<Frame> {
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .map_err(|_| anyhow::anyhow!("frame timeout"))??
        .ok_or_else(|| anyhow::anyhow!("channel closed"))?;
    Ok(serde_json::from_str(&line)?)
}

async fn connect(socket: &std::path::Path) -> anyhow::Result<(FrameLines, OwnedWriteHalf)> {
    let stream = UnixStream::connect(socket).await?;
    let (read, write) = stream.into_split();
    Ok((BufReader::new(read).lines(), write))
}

/// Connect and consume the scrollback + status greeting.
async fn connect_past_greeting(
    socket: &std::path::Path,
) -> anyhow::Result<(FrameLines, OwnedWriteHalf)> {
    let (mut lines, write) = connect(socket).await?;
    let _ = read_frame(&mut lines).await?;
    let _ = read_frame(&mut lines).await?;
    Ok((lines, write))
}

#[tokio::test]
async fn greeting_is_scrollback_then_status() -> anyhow::Result<()> {
    let fx = start_server().await?;
    fx.shared.scrollback.write().await.append("hello\n");

    let (mut lines, _write) = connect(&fx.socket).await?;
    match read_frame(&mut lines).await? {
        Frame::Scrollback { data } => assert_eq!(data, "hello\n"),
        other => anyhow::bail!("expected scrollback, got {other:?}"),
    }
    match read_frame(&mut lines).await? {
        Frame::Status { state, reason } => {
            assert_eq!(state, ChannelState::Connected);
            assert_eq!(reason, None);
        }
        other => anyhow::bail!("expected status, got {other:?}"),
    }
    assert_eq!(fx.shared.peer_count(), 1);
    fx.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn output_chunks_follow_greeting() -> anyhow::Result<()> {
    let fx = start_server().await?;
    let (mut lines, _write) = connect_past_greeting(&fx.socket).await?;

    // Pump a chunk the way run.rs does: append under the write lock, then
    // broadcast before releasing it.
    {
        let mut ring = fx.shared.scrollback.write().await;
        ring.append("chunk\n");
        let _ = fx.shared.output_tx.send("chunk\n".to_owned());
    }

    match read_frame(&mut lines).await? {
        Frame::Output { data } => assert_eq!(data, "chunk\n"),
        other => anyhow::bail!("expected output, got {other:?}"),
    }
    fx.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn input_control_resize_reach_the_pty() -> anyhow::Result<()> {
    let mut fx = start_server().await?;
    let (_lines, mut write) = connect_past_greeting(&fx.socket).await?;

    let frames = [
        Frame::Input { data: "x".to_owned() },
        Frame::Control { key: relay_proto::channel::ControlKey::CtrlC },
        Frame::Resize { cols: 80, rows: 24 },
    ];
    for frame in &frames {
        write.write_all(frame.to_line().as_bytes()).await?;
    }

    match tokio::time::timeout(Duration::from_secs(5), fx.pty_rx.recv()).await? {
        Some(PtyEvent::Write(data)) => assert_eq!(&data[..], b"x"),
        other => anyhow::bail!("expected write event, got {other:?}"),
    }
    match tokio::time::timeout(Duration::from_secs(5), fx.pty_rx.recv()).await? {
        Some(PtyEvent::Write(data)) => assert_eq!(&data[..], &[0x03]),
        other => anyhow::bail!("expected ctrl-c byte, got {other:?}"),
    }
    match tokio::time::timeout(Duration::from_secs(5), fx.pty_rx.recv()).await? {
        Some(PtyEvent::Resize { cols, rows }) => assert_eq!((cols, rows), (80, 24)),
        other => anyhow::bail!("expected resize event, got {other:?}"),
    }
    fx.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn ping_answers_pong() -> anyhow::Result<()> {
    let fx = start_server().await?;
    let (mut lines, mut write) = connect_past_greeting(&fx.socket).await?;

    write.write_all(Frame::Ping {}.to_line().as_bytes()).await?;
    match read_frame(&mut lines).await? {
        Frame::Pong {} => {}
        other => anyhow::bail!("expected pong, got {other:?}"),
    }
    fx.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn garbage_line_does_not_disconnect() -> anyhow::Result<()> {
    let fx = start_server().await?;
    let (mut lines, mut write) = connect_past_greeting(&fx.socket).await?;

    write.write_all(b"not json at all\n").await?;
    write.write_all(Frame::Ping {}.to_line().as_bytes()).await?;
    match read_frame(&mut lines).await? {
        Frame::Pong {} => {}
        other => anyhow::bail!("expected pong after garbage, got {other:?}"),
    }
    fx.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn child_exit_broadcasts_disconnected() -> anyhow::Result<()> {
    let fx = start_server().await?;
    let (mut lines, _write) = connect_past_greeting(&fx.socket).await?;

    let _ = fx.shared.exit_tx.send("Process exited (0)".to_owned());
    match read_frame(&mut lines).await? {
        Frame::Status { state, reason } => {
            assert_eq!(state, ChannelState::Disconnected);
            assert_eq!(reason.as_deref(), Some("Process exited (0)"));
        }
        other => anyhow::bail!("expected disconnect status, got {other:?}"),
    }
    fx.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn two_peers_see_the_same_output() -> anyhow::Result<()> {
    let fx = start_server().await?;
    let (mut lines_a, _wa) = connect_past_greeting(&fx.socket).await?;
    let (mut lines_b, _wb) = connect_past_greeting(&fx.socket).await?;

    {
        let mut ring = fx.shared.scrollback.write().await;
        ring.append("fanout\n");
        let _ = fx.shared.output_tx.send("fanout\n".to_owned());
    }

    for lines in [&mut lines_a, &mut lines_b] {
        match read_frame(lines).await? {
            Frame::Output { data } => assert_eq!(data, "fanout\n"),
            other => anyhow::bail!("expected output, got {other:?}"),
        }
    }
    assert_eq!(fx.shared.peer_count(), 2);
    fx.shutdown.cancel();
    Ok(())
}
