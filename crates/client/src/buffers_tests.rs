// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn scrollback_is_chunked_at_8k() {
    let mut buffer = SessionBuffer::new();
    buffer.queue_scrollback(&"a".repeat(SCROLLBACK_CHUNK * 2 + 100));

    let mut chunks = Vec::new();
    while let Some(chunk) = buffer.next_chunk() {
        chunks.push(chunk);
    }
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].len(), SCROLLBACK_CHUNK);
    assert_eq!(chunks[1].len(), SCROLLBACK_CHUNK);
    assert_eq!(chunks[2].len(), 100);
}

#[test]
fn chunk_boundaries_respect_utf8() {
    let mut buffer = SessionBuffer::new();
    // Multibyte chars straddle the 8 KiB boundary.
    buffer.queue_scrollback(&"é".repeat(SCROLLBACK_CHUNK));
    let mut total = 0;
    while let Some(chunk) = buffer.next_chunk() {
        assert!(std::str::from_utf8(chunk.as_bytes()).is_ok());
        total += chunk.len();
    }
    assert_eq!(total, SCROLLBACK_CHUNK * 2);
}

#[test]
fn draining_reflects_pending_chunks() {
    let mut buffer = SessionBuffer::new();
    assert!(!buffer.draining());
    buffer.queue_scrollback("hello");
    assert!(buffer.draining());
    let _ = buffer.next_chunk();
    assert!(!buffer.draining());
}

#[test]
fn split_panels_cap_at_four_with_lru_eviction() {
    let mut splits = SplitPanels::new();
    for id in ["a", "b", "c", "d"] {
        assert_eq!(splits.open(id), None);
    }
    // Touch "a" so "b" is now the least recently used.
    splits.touch("a");
    assert_eq!(splits.open("e"), Some("b".to_owned()));
    assert_eq!(splits.len(), 4);
    assert!(splits.contains("a"));
    assert!(!splits.contains("b"));
}

#[test]
fn reopening_a_panel_does_not_evict() {
    let mut splits = SplitPanels::new();
    for id in ["a", "b", "c", "d"] {
        let _ = splits.open(id);
    }
    assert_eq!(splits.open("d"), None);
    assert_eq!(splits.len(), 4);
}

#[test]
fn close_removes_panel() {
    let mut splits = SplitPanels::new();
    let _ = splits.open("a");
    assert!(splits.close("a"));
    assert!(!splits.close("a"));
    assert!(splits.is_empty());
}
