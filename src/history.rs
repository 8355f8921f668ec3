//! Recent-query window for the console session.

use std::collections::VecDeque;

use chrono::Utc;

use crate::config::QUERY_HISTORY_CAP;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub query: String,
    pub mode: String,
    pub result: String,
    pub timestamp: String,
}

/// The last [`QUERY_HISTORY_CAP`] queries, oldest evicted first.
#[derive(Debug, Default)]
pub struct QueryHistory {
    entries: VecDeque<HistoryEntry>,
}

impl QueryHistory {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(QUERY_HISTORY_CAP),
        }
    }

    pub fn push(&mut self, query: &str, mode: &str, result: &str) {
        if self.entries.len() >= QUERY_HISTORY_CAP {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            query: query.to_string(),
            mode: mode.to_string(),
            result: result.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    /// Newest first, for display.
    pub fn iter_recent(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
