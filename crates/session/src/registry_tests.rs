// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use relay_proto::record::{epoch_ms, SessionRecord, SessionStatus};

use super::*;

fn record(id: &str, last_seen: u64) -> SessionRecord {
    SessionRecord {
        id: id.to_owned(),
        cwd: "/tmp".to_owned(),
        pid: std::process::id(),
        pipe: format!("/tmp/{id}.sock"),
        started: last_seen,
        last_seen,
        client_count: 0,
        preview: String::new(),
        status: SessionStatus::Running,
    }
}

#[test]
fn write_then_scan_round_trips() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_record(dir.path(), &record("proj", epoch_ms()))?;

    let listed = scan(dir.path());
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "proj");
    assert_eq!(listed[0].cwd, "/tmp");
    Ok(())
}

#[test]
fn stale_records_are_reaped_during_scan() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_record(dir.path(), &record("fresh", epoch_ms()))?;
    write_record(dir.path(), &record("old", epoch_ms().saturating_sub(45_000)))?;

    let listed = scan(dir.path());
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "fresh");
    // The stale file itself was unlinked.
    assert!(!record_path(dir.path(), "old").exists());
    assert!(record_path(dir.path(), "fresh").exists());
    Ok(())
}

#[test]
fn malformed_files_are_skipped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(record_path(dir.path(), "broken"), b"{not json")?;
    write_record(dir.path(), &record("good", epoch_ms()))?;

    let listed = scan(dir.path());
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "good");
    // Malformed files are left alone (another writer may be mid-write).
    assert!(record_path(dir.path(), "broken").exists());
    Ok(())
}

#[test]
fn non_json_files_are_ignored() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("proj.sock"), b"")?;
    assert!(scan(dir.path()).is_empty());
    Ok(())
}

#[test]
fn find_excludes_stale() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_record(dir.path(), &record("old", epoch_ms().saturating_sub(60_000)))?;
    assert!(find(dir.path(), "old").is_none());
    Ok(())
}

#[test]
fn scan_of_missing_dir_is_empty() {
    assert!(scan(std::path::Path::new("/nonexistent/claude-relay-test")).is_empty());
}

#[test]
fn remove_record_tolerates_missing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    remove_record(dir.path(), "never-existed");
    Ok(())
}

#[test]
fn endpoint_naming_rule_is_deterministic() {
    let dir = std::path::Path::new("/reg");
    assert_eq!(socket_path(dir, "proj"), std::path::PathBuf::from("/reg/proj.sock"));
    assert_eq!(record_path(dir, "proj"), std::path::PathBuf::from("/reg/proj.json"));
}
