// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn accepts_simple_names() {
    assert_eq!(sanitize_project_name("my-project_2"), Ok("my-project_2"));
}

#[test]
fn rejects_bad_characters() {
    assert!(sanitize_project_name("has space").is_err());
    assert!(sanitize_project_name("../escape").is_err());
    assert!(sanitize_project_name("semi;colon").is_err());
    assert!(sanitize_project_name("").is_err());
    assert!(sanitize_project_name(&"x".repeat(51)).is_err());
}

#[test]
fn rejects_reserved_device_names() {
    assert!(sanitize_project_name("CON").is_err());
    assert!(sanitize_project_name("con").is_err());
    assert!(sanitize_project_name("LPT1").is_err());
    // Extension does not launder a reserved stem.
    assert!(is_reserved_device_name("nul.txt"));
    assert!(!is_reserved_device_name("console"));
}
