// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn record(last_seen: u64) -> SessionRecord {
    SessionRecord {
        id: "proj".to_owned(),
        cwd: "/home/u/p".to_owned(),
        pid: 42,
        pipe: "/tmp/proj.sock".to_owned(),
        started: 1_000,
        last_seen,
        client_count: 0,
        preview: String::new(),
        status: SessionStatus::Running,
    }
}

#[test]
fn staleness_boundary() {
    let rec = record(10_000);
    // Exactly at the window: still fresh.
    assert!(!rec.is_stale(10_000 + SESSION_STALE_MS));
    // One past the window: stale.
    assert!(rec.is_stale(10_000 + SESSION_STALE_MS + 1));
}

#[test]
fn record_serializes_camel_case() -> anyhow::Result<()> {
    let json = serde_json::to_string(&record(5))?;
    assert!(json.contains(r#""lastSeen":5"#), "bad json: {json}");
    assert!(json.contains(r#""clientCount":0"#), "bad json: {json}");
    assert!(json.contains(r#""status":"running""#), "bad json: {json}");
    Ok(())
}

#[test]
fn agent_register_tag_keeps_colon_form() -> anyhow::Result<()> {
    let req = AgentRequest::Register {
        machine_id: "A".to_owned(),
        hostname: "devbox".to_owned(),
        address: "wss://devbox:8443".to_owned(),
        agent_version: "0.3.0".to_owned(),
    };
    let json = serde_json::to_string(&req)?;
    assert!(json.contains(r#""type":"agent:register""#), "bad json: {json}");
    assert!(json.contains(r#""machineId":"A""#), "bad json: {json}");
    Ok(())
}

#[test]
fn hub_registered_round_trips() -> anyhow::Result<()> {
    let evt: HubEvent = serde_json::from_str(r#"{"type":"hub:registered","success":true}"#)?;
    match evt {
        HubEvent::Registered { success, error } => {
            assert!(success);
            assert_eq!(error, None);
        }
        other => anyhow::bail!("unexpected event: {other:?}"),
    }
    Ok(())
}

#[test]
fn epoch_ms_is_monotonic_enough() {
    let a = epoch_ms();
    let b = epoch_ms();
    assert!(b >= a);
}
