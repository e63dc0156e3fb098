//! Command History Ledger
//!
//! Bounded, in-memory record of executed commands, local and remote.
//! Entries are never mutated after append; the oldest are evicted first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Number of entries returned when a query gives no limit
pub const DEFAULT_QUERY_LIMIT: usize = 10;

/// Maximum characters of output returned per entry by [`CommandHistory::query`]
pub const QUERY_OUTPUT_CAP: usize = 1000;

/// A single executed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Command text as submitted
    pub command: String,

    /// Rendered output
    pub output: String,

    /// When the command finished (UTC)
    pub timestamp: DateTime<Utc>,

    /// Exit code, -1 when the process reported none
    pub exit_code: i32,

    /// Remote connection id, absent for local commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl HistoryEntry {
    /// Entry for a local command, stamped now
    pub fn local(command: impl Into<String>, output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            command: command.into(),
            output: output.into(),
            timestamp: Utc::now(),
            exit_code,
            connection_id: None,
        }
    }

    /// Entry for a remote command, stamped now
    pub fn remote(
        connection_id: impl Into<String>,
        command: impl Into<String>,
        output: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            ..Self::local(command, output, exit_code)
        }
    }

    fn truncated(&self, cap: usize) -> Self {
        let mut entry = self.clone();
        if let Some((idx, _)) = entry.output.char_indices().nth(cap) {
            entry.output.truncate(idx);
        }
        entry
    }
}

/// Storage for command history
///
/// Append and evict happen under one lock, so concurrent appends never
/// under- or over-trim.
#[derive(Debug)]
pub struct CommandHistory {
    enabled: bool,
    max_size: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl CommandHistory {
    /// Create an empty ledger
    ///
    /// A `max_size` of zero is treated as one.
    pub fn new(enabled: bool, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            enabled,
            max_size,
            entries: Mutex::new(VecDeque::with_capacity(max_size.min(1024))),
        }
    }

    /// Whether appends are recorded
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Record an entry, evicting the oldest beyond capacity
    ///
    /// No-op when history is disabled.
    pub fn append(&self, entry: HistoryEntry) {
        if !self.enabled {
            return;
        }
        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.max_size {
            entries.pop_front();
        }
    }

    /// The most recent `limit` entries, oldest first
    ///
    /// `limit` defaults to [`DEFAULT_QUERY_LIMIT`] and is clamped to
    /// `[1, max_size]`. Output is cut to [`QUERY_OUTPUT_CAP`] characters in
    /// the returned copies only.
    pub fn query(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let limit = limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, self.max_size);
        let entries = self.lock();
        let skip = entries.len().saturating_sub(limit);
        entries
            .iter()
            .skip(skip)
            .map(|e| e.truncated(QUERY_OUTPUT_CAP))
            .collect()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<HistoryEntry>> {
        // A panicking appender cannot leave the deque half-updated.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
