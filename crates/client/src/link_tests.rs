// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn backoff_grows_by_half_and_caps_at_a_minute() {
    let mut backoff = Backoff::new();
    assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    assert_eq!(backoff.next_delay(), Duration::from_secs_f64(7.5));
    assert_eq!(backoff.next_delay(), Duration::from_secs_f64(11.25));

    for _ in 0..20 {
        let _ = backoff.next_delay();
    }
    assert_eq!(backoff.next_delay(), RECONNECT_MAX);
}

#[test]
fn backoff_resets_on_success() {
    let mut backoff = Backoff::new();
    let _ = backoff.next_delay();
    let _ = backoff.next_delay();
    backoff.reset();
    assert_eq!(backoff.next_delay(), RECONNECT_MIN);
}

#[test]
fn authed_url_forms() {
    assert_eq!(authed_url("wss://box:8443", "t"), "wss://box:8443/?token=t");
    assert_eq!(authed_url("wss://box:8443/", "t"), "wss://box:8443/?token=t");
    assert_eq!(authed_url("wss://box:8443/?x=1", "t"), "wss://box:8443/?x=1&token=t");
}
