// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn control_bytes() {
    assert_eq!(ControlKey::CtrlC.byte(), 0x03);
    assert_eq!(ControlKey::CtrlD.byte(), 0x04);
    assert_eq!(ControlKey::Esc.byte(), 0x1b);
}

#[test]
fn frame_line_is_newline_terminated() {
    let line = Frame::Ping {}.to_line();
    assert_eq!(line, "{\"type\":\"ping\"}\n");
}

#[test]
fn status_frame_round_trips() -> anyhow::Result<()> {
    let frame = Frame::Status {
        state: ChannelState::Disconnected,
        reason: Some("Process exited (0)".to_owned()),
    };
    let line = frame.to_line();
    let parsed: Frame = serde_json::from_str(line.trim_end())?;
    match parsed {
        Frame::Status { state, reason } => {
            assert_eq!(state, ChannelState::Disconnected);
            assert_eq!(reason.as_deref(), Some("Process exited (0)"));
        }
        other => anyhow::bail!("unexpected frame: {other:?}"),
    }
    Ok(())
}

#[test]
fn resize_frame_parses() -> anyhow::Result<()> {
    let parsed: Frame = serde_json::from_str(r#"{"type":"resize","cols":120,"rows":30}"#)?;
    match parsed {
        Frame::Resize { cols, rows } => {
            assert_eq!((cols, rows), (120, 30));
        }
        other => anyhow::bail!("unexpected frame: {other:?}"),
    }
    Ok(())
}
