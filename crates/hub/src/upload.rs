// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Small file uploads into a session's working directory.
//!
//! Filenames arrive from untrusted clients. Anything that smells of path
//! traversal is rejected outright (the sanitized form is echoed back so the
//! client can retry under that name); accepted names still go through a
//! prefix check on the resolved destination before a byte is written.

use std::path::{Path, PathBuf};

use base64::Engine;
use relay_proto::ws::ServerEvent;
use tracing::info;

use crate::names::is_reserved_device_name;
use crate::state::SharedHub;

/// Characters replaced during cleanup: path separators plus the usual
/// filesystem-reserved set.
fn is_reserved_char(c: char) -> bool {
    matches!(c, '/' | '\\' | '\0' | '<' | '>' | ':' | '"' | '|' | '?' | '*')
}

/// Pure cleanup of a client-supplied filename. Idempotent:
/// `sanitize_filename(sanitize_filename(x)) == sanitize_filename(x)`.
pub fn sanitize_filename(raw: &str) -> String {
    let replaced: String =
        raw.chars().map(|c| if is_reserved_char(c) || c.is_control() { '_' } else { c }).collect();
    let trimmed = replaced.trim_matches(|c: char| c == '.' || c == ' ');

    let mut clean = trimmed.to_owned();
    if clean.len() > 255 {
        let mut end = 255;
        while end > 0 && !clean.is_char_boundary(end) {
            end -= 1;
        }
        clean.truncate(end);
        // Truncation may expose a trailing dot or space again.
        clean = clean.trim_matches(|c: char| c == '.' || c == ' ').to_owned();
    }
    clean
}

/// Validate a raw filename, returning the name to write under.
///
/// Separators, traversal forms, and reserved device names are rejected
/// rather than repaired; the error carries the sanitized echo.
pub fn validate_filename(raw: &str) -> Result<String, String> {
    if raw.contains('/') || raw.contains('\\') {
        return Err("filename must not contain path separators".to_owned());
    }
    let clean = sanitize_filename(raw);
    if clean.is_empty() || clean == "." || clean == ".." {
        return Err("filename is empty after sanitization".to_owned());
    }
    if is_reserved_device_name(&clean) {
        return Err(format!("{clean:?} is a reserved name"));
    }
    Ok(clean)
}

fn failure(filename: Option<String>, error: impl Into<String>) -> ServerEvent {
    ServerEvent::UploadResult { success: false, filename, error: Some(error.into()) }
}

/// Handle an `upload_file` request. Always answers with `upload_result`.
pub async fn handle_upload(
    hub: &SharedHub,
    session_id: &str,
    filename: &str,
    data: &str,
    declared_size: u64,
) -> ServerEvent {
    if hub.config.disable_uploads {
        return failure(None, "Uploads are disabled");
    }

    let max = hub.config.max_upload_bytes;
    if declared_size as usize > max {
        return failure(None, format!("File exceeds {max} bytes"));
    }

    let Some(session) = relay_session::registry::find(&hub.config.registry_dir(), session_id)
    else {
        return failure(None, "Session not found");
    };

    let name = match validate_filename(filename) {
        Ok(name) => name,
        Err(error) => return failure(Some(sanitize_filename(filename)), error),
    };

    let decoded = match base64::engine::general_purpose::STANDARD.decode(data) {
        Ok(decoded) => decoded,
        Err(e) => return failure(Some(name), format!("Invalid base64 data: {e}")),
    };
    if decoded.len() > max {
        return failure(Some(name), format!("File exceeds {max} bytes"));
    }

    let root = match tokio::fs::canonicalize(&session.cwd).await {
        Ok(root) => root,
        Err(_) => return failure(Some(name), "Session directory is gone"),
    };
    let dest = root.join(&name);
    if !path_is_contained(&dest, &root) {
        return failure(Some(name), "Destination escapes the session directory");
    }

    if let Err(e) = tokio::fs::write(&dest, &decoded).await {
        return failure(Some(name), format!("Write failed: {e}"));
    }

    info!(session_id, filename = %name, bytes = decoded.len(), "file uploaded");
    ServerEvent::UploadResult { success: true, filename: Some(name), error: None }
}

/// The resolved destination must stay under the session root.
fn path_is_contained(dest: &Path, root: &PathBuf) -> bool {
    dest.starts_with(root)
        && dest
            .components()
            .all(|c| !matches!(c, std::path::Component::ParentDir))
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;
