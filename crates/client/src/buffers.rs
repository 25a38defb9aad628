// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session terminal buffers and split-panel bookkeeping.
//!
//! Scrollback arrives as one large frame; writing it to a terminal in one go
//! stalls the render loop, so it is queued in chunks and drained one chunk
//! per animation tick. Split panels are a small LRU set.

use std::collections::VecDeque;

use indexmap::IndexMap;

/// Paced scrollback chunk size.
pub const SCROLLBACK_CHUNK: usize = 8 * 1024;

/// Maximum simultaneous split panels.
pub const SPLIT_CAP: usize = 4;

/// Buffered state for one session the client knows about.
#[derive(Debug, Default)]
pub struct SessionBuffer {
    /// Scrollback chunks not yet written to the terminal.
    pending: VecDeque<String>,
    pub connected: bool,
    pub activity: u64,
}

impl SessionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scrollback payload, split into chunks at char boundaries.
    pub fn queue_scrollback(&mut self, data: &str) {
        let mut rest = data;
        while !rest.is_empty() {
            let mut end = rest.len().min(SCROLLBACK_CHUNK);
            while end < rest.len() && !rest.is_char_boundary(end) {
                end += 1;
            }
            let (chunk, tail) = rest.split_at(end);
            self.pending.push_back(chunk.to_owned());
            rest = tail;
        }
    }

    /// Take the next chunk to render, if any.
    pub fn next_chunk(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    /// Whether a chunked write is still in progress.
    pub fn draining(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Split panels: at most [`SPLIT_CAP`] sessions, least-recently-used first.
#[derive(Debug, Default)]
pub struct SplitPanels {
    panels: IndexMap<String, ()>,
}

impl SplitPanels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or refresh) a panel. Returns the evicted session id when the
    /// cap forces one out.
    pub fn open(&mut self, session_id: &str) -> Option<String> {
        if self.panels.shift_remove(session_id).is_some() {
            self.panels.insert(session_id.to_owned(), ());
            return None;
        }
        self.panels.insert(session_id.to_owned(), ());
        if self.panels.len() > SPLIT_CAP {
            return self.panels.shift_remove_index(0).map(|(id, ())| id);
        }
        None
    }

    /// Mark a panel as recently used.
    pub fn touch(&mut self, session_id: &str) {
        if self.panels.shift_remove(session_id).is_some() {
            self.panels.insert(session_id.to_owned(), ());
        }
    }

    pub fn close(&mut self, session_id: &str) -> bool {
        self.panels.shift_remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.panels.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.panels.keys().map(String::as_str)
    }
}

#[cfg(test)]
#[path = "buffers_tests.rs"]
mod tests;
