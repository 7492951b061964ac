//! Bounded, most-recent-first log of local activity.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Entries kept when no capacity is configured
pub const DEFAULT_CAPACITY: usize = 20;

/// One logged line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityEntry {
    /// When it happened
    pub at: DateTime<Utc>,
    /// What happened
    pub message: String,
}

/// Ring buffer of recent activity, newest first
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl ActivityLog {
    /// Create an empty log holding at most `capacity` entries (at least one)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an entry, evicting the oldest when full
    pub fn record(&mut self, at: DateTime<Utc>, message: impl Into<String>) {
        self.entries.push_front(ActivityEntry {
            at,
            message: message.into(),
        });
        self.entries.truncate(self.capacity);
    }

    /// Entries, newest first
    pub fn iter(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    /// Most recent entry
    #[must_use]
    pub fn latest(&self) -> Option<&ActivityEntry> {
        self.entries.front()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was logged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries kept
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_newest_first() {
        let mut log = ActivityLog::default();
        let now = Utc::now();
        log.record(now, "first");
        log.record(now, "second");

        let messages: Vec<_> = log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["second", "first"]);
        assert_eq!(log.latest().unwrap().message, "second");
    }

    #[test]
    fn test_capped_at_capacity() {
        let mut log = ActivityLog::default();
        let now = Utc::now();
        for i in 0..25 {
            log.record(now, format!("entry {i}"));
        }

        assert_eq!(log.len(), DEFAULT_CAPACITY);
        assert_eq!(log.latest().unwrap().message, "entry 24");
        assert_eq!(log.iter().last().unwrap().message, "entry 5");
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut log = ActivityLog::with_capacity(0);
        log.record(Utc::now(), "a");
        log.record(Utc::now(), "b");
        assert_eq!(log.len(), 1);
    }
}
