// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry preview text: ANSI-stripped trailing output.

use std::sync::OnceLock;

use regex::Regex;

use crate::scrollback::ScrollbackRing;

/// Preview caps: last 8 lines, at most 2 KiB.
const PREVIEW_LINES: usize = 8;
const PREVIEW_BYTES: usize = 2 * 1024;

/// CSI sequences, OSC strings, and single-character escapes.
#[allow(clippy::unwrap_used)] // pattern is a compile-time constant
fn ansi_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:\x1b\[[0-9;?]*[ -/]*[@-~])|(?:\x1b\][^\x07\x1b]*(?:\x07|\x1b\\))|(?:\x1b[@-Z\\-_])")
            .unwrap()
    })
}

/// Remove ANSI escape sequences and other control bytes (except newlines).
pub fn strip_ansi(input: &str) -> String {
    let stripped = ansi_pattern().replace_all(input, "");
    stripped.chars().filter(|&c| c == '\n' || c == '\t' || !c.is_control()).collect()
}

/// Compute the registry preview from the scrollback ring.
pub fn from_ring(ring: &ScrollbackRing) -> String {
    let mut text: String = ring
        .last_lines(PREVIEW_LINES)
        .into_iter()
        .map(strip_ansi)
        .collect();
    if text.len() > PREVIEW_BYTES {
        let cut = text.len() - PREVIEW_BYTES;
        let mut boundary = cut;
        while boundary < text.len() && !text.is_char_boundary(boundary) {
            boundary += 1;
        }
        text = text.split_off(boundary);
    }
    text
}

#[cfg(test)]
#[path = "preview_tests.rs"]
mod tests;
