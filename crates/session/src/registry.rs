// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: one JSON heartbeat record per live session.
//!
//! Only the owning launcher writes a given record; readers are tolerant.
//! Malformed files are skipped silently and stale records (no heartbeat for
//! 30 s) may be unlinked by any reader during a scan.

use std::path::{Path, PathBuf};

use relay_proto::record::{epoch_ms, SessionRecord};
use tracing::{debug, warn};

/// Per-user default registry location.
pub fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude-relay")
        .join("sessions")
}

/// Path of a session's registry record.
pub fn record_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Path of a session's channel endpoint, derived from its id by a fixed rule.
pub fn socket_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.sock"))
}

/// Atomically (re)write a session record: temp file in the same directory,
/// then rename over the destination.
pub fn write_record(dir: &Path, record: &SessionRecord) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let dest = record_path(dir, &record.id);
    let tmp = dir.join(format!(".{}.json.tmp", record.id));
    let body = serde_json::to_vec(record)?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, &dest)?;
    Ok(())
}

/// Remove a session's registry record, ignoring a missing file.
pub fn remove_record(dir: &Path, id: &str) {
    if let Err(e) = std::fs::remove_file(record_path(dir, id)) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(id, err = %e, "failed to remove session record");
        }
    }
}

/// Scan the registry for live sessions.
///
/// Stale records are unlinked opportunistically and excluded from the
/// result; malformed files are skipped. Each scan reflects current state —
/// nothing is cached.
pub fn scan(dir: &Path) -> Vec<SessionRecord> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let now = epoch_ms();
    let mut records = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(body) = std::fs::read_to_string(&path) else {
            continue;
        };
        let record: SessionRecord = match serde_json::from_str(&body) {
            Ok(record) => record,
            Err(_) => continue,
        };
        if record.is_stale(now) {
            debug!(id = %record.id, "reaping stale session record");
            let _ = std::fs::remove_file(&path);
            // A dead launcher leaves its socket behind too.
            let _ = std::fs::remove_file(socket_path(dir, &record.id));
            continue;
        }
        records.push(record);
    }
    records.sort_by(|a, b| a.id.cmp(&b.id));
    records
}

/// Look up one live session by id. Stale records are excluded (and reaped).
pub fn find(dir: &Path, id: &str) -> Option<SessionRecord> {
    scan(dir).into_iter().find(|r| r.id == id)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
