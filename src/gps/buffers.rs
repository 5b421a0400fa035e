// src/gps/buffers.rs
//! Line buffers owned by the link task

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_RECEIVE_CAPACITY: usize = 1000;

/// A line received from the device, terminator stripped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawLine {
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl RawLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// A command written to the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentCommand {
    /// Position in the send log, starting at 0.
    pub index: usize,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Bounded FIFO of everything the device sent. The oldest line goes first
/// when the buffer is full.
#[derive(Debug)]
pub struct ReceiveBuffer {
    lines: VecDeque<RawLine>,
    capacity: usize,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(DEFAULT_RECEIVE_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, line: RawLine) {
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Take everything buffered so far, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<RawLine> {
        self.lines.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Append-only log of sent commands with a read cursor for incremental fetches.
#[derive(Debug, Default)]
pub struct SentLog {
    entries: Vec<SentCommand>,
    cursor: usize,
}

impl SentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, text: &str) -> usize {
        let index = self.entries.len();
        self.entries.push(SentCommand {
            index,
            text: text.to_string(),
            sent_at: Utc::now(),
        });
        index
    }

    /// Either the whole log or only the entries not fetched yet. Fetching the
    /// unacquired part moves the cursor to the end.
    pub fn fetch(&mut self, unacquired_only: bool) -> Vec<SentCommand> {
        let start = if unacquired_only { self.cursor } else { 0 };
        let entries = self.entries[start..].to_vec();
        if unacquired_only {
            self.cursor = self.entries.len();
        }
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Vendor responses in arrival order, addressed by absolute index.
///
/// Indices never shift: when a history limit is set, the oldest entries are
/// dropped and `first_index` advances instead.
#[derive(Debug, Default)]
pub struct ResultLog {
    entries: VecDeque<String>,
    first_index: usize,
    limit: Option<usize>,
}

impl ResultLog {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            first_index: 0,
            limit: limit.map(|l| l.max(1)),
        }
    }

    pub fn push(&mut self, text: String) {
        self.entries.push_back(text);
        if let Some(limit) = self.limit {
            while self.entries.len() > limit {
                self.entries.pop_front();
                self.first_index += 1;
            }
        }
    }

    /// One past the newest index.
    pub fn end(&self) -> usize {
        self.first_index + self.entries.len()
    }

    pub fn first_index(&self) -> usize {
        self.first_index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Where a search starts. Without an explicit index that is the newest
    /// entry (or 0 when nothing arrived yet); explicit indices are clamped to
    /// the retained range.
    pub fn resolve_start(&self, from: Option<usize>) -> usize {
        match from {
            None if self.entries.is_empty() => self.first_index,
            None => self.end() - 1,
            Some(index) => index.clamp(self.first_index, self.end()),
        }
    }

    /// First entry at or after `from` that starts with `prefix`.
    pub fn find(&self, prefix: &str, from: usize) -> Option<&str> {
        let skip = from.saturating_sub(self.first_index);
        self.entries
            .iter()
            .skip(skip)
            .find(|entry| entry.starts_with(prefix))
            .map(String::as_str)
    }
}
