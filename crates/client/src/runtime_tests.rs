// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use relay_proto::record::epoch_ms;

use super::*;

fn output_frame(session_id: &str, data: &str) -> String {
    format!(r#"{{"type":"output","sessionId":"{session_id}","data":"{data}"}}"#)
}

fn status_frame(session_id: &str, state: &str) -> String {
    format!(r#"{{"type":"status","sessionId":"{session_id}","state":"{state}"}}"#)
}

fn machine(id: &str, status: MachineStatus) -> MachineSummary {
    MachineSummary {
        id: id.to_owned(),
        hostname: "box".to_owned(),
        address: format!("wss://{id}:8443"),
        is_local: false,
        agent_version: "0.3.0".to_owned(),
        status,
        project_count: 0,
        session_count: 0,
        last_seen: epoch_ms(),
    }
}

#[test]
fn focus_emits_connecting_then_connect_request() {
    let mut rt = Runtime::new();
    let effects = rt.focus("proj");
    assert_eq!(
        effects,
        vec![
            Effect::State(FocusState::Connecting),
            Effect::Send(ClientRequest::ConnectSession { session_id: "proj".to_owned() }),
        ]
    );
    assert_eq!(rt.focus_state(), FocusState::Connecting);
    assert_eq!(rt.view, View::Focus);
}

#[test]
fn refocusing_the_same_session_is_a_no_op() {
    let mut rt = Runtime::new();
    let _ = rt.focus("proj");
    let effects = rt.focus("proj");
    assert!(effects.is_empty());
}

#[test]
fn first_output_completes_the_connecting_transition() {
    let mut rt = Runtime::new();
    let _ = rt.focus("proj");
    let effects = rt.handle_frame(LinkSource::Hub, &output_frame("proj", "hi"));
    assert_eq!(
        effects,
        vec![Effect::State(FocusState::Connected), Effect::FocusWrite("hi".to_owned())]
    );
    assert_eq!(rt.focus_state(), FocusState::Connected);
}

#[test]
fn output_for_other_sessions_never_reaches_the_focus_terminal() {
    let mut rt = Runtime::new();
    let _ = rt.focus("proj");
    let _ = rt.handle_frame(LinkSource::Hub, &output_frame("proj", "mine"));

    let effects = rt.handle_frame(LinkSource::Hub, &output_frame("other", "not mine"));
    assert!(
        !effects.iter().any(|e| matches!(e, Effect::FocusWrite(_))),
        "leaked: {effects:?}"
    );
}

#[test]
fn output_fans_out_to_split_panels() {
    let mut rt = Runtime::new();
    let _ = rt.focus("proj");
    let _ = rt.handle_frame(LinkSource::Hub, &status_frame("proj", "connected"));
    let _ = rt.splits.open("other");

    let effects = rt.handle_frame(LinkSource::Hub, &output_frame("other", "x"));
    assert_eq!(
        effects,
        vec![Effect::SplitWrite { session_id: "other".to_owned(), data: "x".to_owned() }]
    );
}

#[test]
fn disconnect_status_flips_focus_state() {
    let mut rt = Runtime::new();
    let _ = rt.focus("proj");
    let _ = rt.handle_frame(LinkSource::Hub, &status_frame("proj", "connected"));
    let effects = rt.handle_frame(LinkSource::Hub, &status_frame("proj", "disconnected"));
    assert_eq!(effects, vec![Effect::State(FocusState::Disconnected)]);
    assert_eq!(rt.focus_state(), FocusState::Disconnected);
}

#[test]
fn missing_session_id_falls_back_to_last_focused() {
    let mut rt = Runtime::new();
    let _ = rt.focus("proj");
    let effects = rt.handle_frame(LinkSource::Hub, r#"{"type":"output","data":"legacy"}"#);
    assert!(effects.contains(&Effect::FocusWrite("legacy".to_owned())), "effects: {effects:?}");
}

#[test]
fn missing_session_id_with_no_focus_history_is_dropped() {
    let mut rt = Runtime::new();
    let effects = rt.handle_frame(LinkSource::Hub, r#"{"type":"output","data":"legacy"}"#);
    assert!(effects.is_empty());
}

#[test]
fn unknown_frame_types_are_no_ops() {
    let mut rt = Runtime::new();
    let effects = rt.handle_frame(LinkSource::Hub, r#"{"type":"quantum_entangle"}"#);
    assert!(effects.is_empty());
}

#[test]
fn scrollback_is_paced_through_ticks() {
    let mut rt = Runtime::new();
    let _ = rt.focus("proj");
    let big = "x".repeat(crate::buffers::SCROLLBACK_CHUNK + 10);
    let frame = format!(r#"{{"type":"scrollback","sessionId":"proj","data":"{big}"}}"#);
    let effects = rt.handle_frame(LinkSource::Hub, &frame);
    // The scrollback itself only transitions state; bytes flow on ticks.
    assert_eq!(effects, vec![Effect::State(FocusState::Connected)]);

    let first = rt.tick();
    assert_eq!(first.len(), 1);
    assert!(rt.render_throttled, "dashboard should throttle mid-drain");

    let second = rt.tick();
    assert_eq!(second.len(), 1);
    assert!(!rt.render_throttled);
    assert!(rt.tick().is_empty());
}

#[test]
fn keystrokes_only_route_while_connected_and_focused() {
    let mut rt = Runtime::new();
    assert_eq!(rt.input("x"), None);

    let _ = rt.focus("proj");
    // Still connecting: dropped.
    assert_eq!(rt.input("x"), None);

    let _ = rt.handle_frame(LinkSource::Hub, &status_frame("proj", "connected"));
    assert_eq!(rt.input("x"), Some(ClientRequest::Input { data: "x".to_owned() }));
}

#[test]
fn focus_switch_re_homes_keystrokes() {
    let mut rt = Runtime::new();
    let _ = rt.focus("one");
    let _ = rt.handle_frame(LinkSource::Hub, &status_frame("one", "connected"));
    assert!(rt.input("a").is_some());

    let _ = rt.focus("two");
    // The old registration is gone; nothing routes until "two" connects.
    assert_eq!(rt.input("b"), None);
    let _ = rt.handle_frame(LinkSource::Hub, &status_frame("two", "connected"));
    assert_eq!(rt.input("b"), Some(ClientRequest::Input { data: "b".to_owned() }));
}

#[test]
fn selecting_a_remote_machine_dials_its_address() {
    let mut rt = Runtime::new();
    rt.machines = vec![machine("A", MachineStatus::Connected)];
    let effects = rt.select_machine("A");
    assert_eq!(effects, vec![Effect::DialAgent { address: "wss://A:8443".to_owned() }]);
    assert_eq!(rt.selected_machine(), "A");

    let effects = rt.select_machine("LOCAL");
    assert_eq!(effects, vec![Effect::CloseAgent]);
}

#[test]
fn session_io_from_the_inactive_link_is_ignored() {
    let mut rt = Runtime::new();
    rt.machines = vec![machine("A", MachineStatus::Connected)];
    let _ = rt.select_machine("A");
    let _ = rt.focus("proj");

    // Hub-side session traffic is ignored while the agent link is active...
    let effects = rt.handle_frame(LinkSource::Hub, &output_frame("proj", "stale"));
    assert!(effects.is_empty());
    // ...but agent-side traffic flows.
    let effects = rt.handle_frame(LinkSource::Agent, &output_frame("proj", "live"));
    assert!(effects.contains(&Effect::FocusWrite("live".to_owned())));
    // Discovery frames from the hub still merge.
    let _ = rt.handle_frame(LinkSource::Hub, r#"{"type":"machines","machines":[]}"#);
    assert!(rt.machines.is_empty());
}

#[test]
fn restore_selection_requires_connected_machine() {
    let mut rt = Runtime::new();
    rt.machines = vec![machine("A", MachineStatus::Disconnected)];
    assert!(rt.restore_selection(Some("A")).is_empty());
    assert_eq!(rt.selected_machine(), "LOCAL");

    rt.machines = vec![machine("A", MachineStatus::Connected)];
    let effects = rt.restore_selection(Some("A"));
    assert_eq!(effects.len(), 1);
    assert_eq!(rt.selected_machine(), "A");
}
