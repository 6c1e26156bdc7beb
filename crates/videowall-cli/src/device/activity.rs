//! Bounded, append-only record of device command attempts.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use videowall_core::protocol::ActivityEntry;

/// Default number of entries kept.
pub const DEFAULT_CAPACITY: usize = 200;

/// Longest response text kept per entry, in characters.
const RESPONSE_LIMIT: usize = 200;

/// Longest command text kept per entry, in characters.
const COMMAND_LIMIT: usize = 160;

/// Append-only ring of recent attempts. Oldest entries are evicted first.
///
/// Appends may come from many concurrent dispatch tasks; the lock is only
/// held to push or copy.
#[derive(Debug)]
pub struct ActivityLog {
    entries: Mutex<VecDeque<ActivityEntry>>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ActivityEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one attempt.
    pub fn record(&self, target: impl Into<String>, command: &str, success: bool, response: Option<&str>) {
        let entry = ActivityEntry {
            timestamp: Utc::now(),
            target: target.into(),
            command: truncate(command, COMMAND_LIMIT),
            success,
            response: response
                .map(|r| truncate(r.trim(), RESPONSE_LIMIT))
                .filter(|r| !r.is_empty()),
        };

        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The most recent `limit` entries (all if `None`), oldest first.
    pub fn entries(&self, limit: Option<usize>) -> Vec<ActivityEntry> {
        let entries = self.lock();
        let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry. Returns how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }
}

/// Cut `text` to at most `limit` characters on a char boundary.
fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
