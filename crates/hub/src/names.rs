// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Name validation for projects, folders, and session ids.

/// Windows reserved device names, rejected regardless of platform so a
/// registry synced across machines never carries one.
const RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// True if `name` (case-insensitive, extension ignored) is a reserved
/// device name.
pub fn is_reserved_device_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name);
    RESERVED.iter().any(|r| stem.eq_ignore_ascii_case(r))
}

/// Validate a project or folder name: 1-50 chars of `[A-Za-z0-9_-]`,
/// not a reserved device name. Returns the name unchanged on success.
pub fn sanitize_project_name(name: &str) -> Result<&str, String> {
    if name.is_empty() || name.len() > 50 {
        return Err("project name must be 1-50 characters".to_owned());
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return Err("project name may only contain letters, digits, '_' and '-'".to_owned());
    }
    if is_reserved_device_name(name) {
        return Err(format!("{name:?} is a reserved name"));
    }
    Ok(name)
}

#[cfg(test)]
#[path = "names_tests.rs"]
mod tests;
