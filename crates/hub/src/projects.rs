// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project discovery: directories under the configured projects root.

use std::path::Path;

use relay_proto::record::{ProjectInfo, SessionRecord};

/// Scan the projects root. Each directory is a project; `has_session` marks
/// those with a live session of the same name.
pub fn scan(projects_dir: &Path, live_sessions: &[SessionRecord]) -> Vec<ProjectInfo> {
    let entries = match std::fs::read_dir(projects_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut projects: Vec<ProjectInfo> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().into_string().ok()?;
            if name.starts_with('.') {
                return None;
            }
            Some(ProjectInfo {
                path: e.path().display().to_string(),
                has_session: live_sessions.iter().any(|s| s.id == name),
                name,
            })
        })
        .collect();
    projects.sort_by(|a, b| a.name.cmp(&b.name));
    projects
}

/// Folder names under the projects root (the `list_folders` payload).
pub fn folders(projects_dir: &Path) -> Vec<String> {
    scan(projects_dir, &[]).into_iter().map(|p| p.name).collect()
}

#[cfg(test)]
#[path = "projects_tests.rs"]
mod tests;
