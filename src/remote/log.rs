//! Rolling diagnostic log of the remote executor.
//!
//! Mirrors the on-page message list: newest entries last, oldest dropped
//! once the capacity is reached. Every entry is also emitted through
//! `tracing`.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::info;

// ============================================================================
// Constants
// ============================================================================

/// Default number of retained entries.
pub const DEFAULT_LOG_CAPACITY: usize = 200;

// ============================================================================
// LogEntry
// ============================================================================

/// One timestamped diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Time the entry was recorded.
    pub at: SystemTime,
    /// Message text.
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self
            .at
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis());
        write!(f, "[{millis}] {}", self.message)
    }
}

// ============================================================================
// DiagnosticLog
// ============================================================================

/// Bounded, thread-safe diagnostic log.
#[derive(Debug)]
pub struct DiagnosticLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl DiagnosticLog {
    /// Creates a log holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends an entry, dropping the oldest one when full.
    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "browser_wallet_relay::remote", "{message}");

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            at: SystemTime::now(),
            message,
        });
    }

    /// Returns a snapshot of the retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Returns the most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<LogEntry> {
        self.entries.lock().back().cloned()
    }

    /// Number of retained entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing has been logged yet.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of entries kept before the oldest is dropped.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_last() {
        let log = DiagnosticLog::default();
        assert!(log.is_empty());
        log.push("first");
        log.push(String::from("second"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.last().map(|entry| entry.message), Some("second".into()));
    }

    #[test]
    fn test_oldest_entries_roll_off() {
        let log = DiagnosticLog::with_capacity(3);
        for i in 0..5 {
            log.push(format!("line {i}"));
        }
        let messages: Vec<_> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, ["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let log = DiagnosticLog::with_capacity(0);
        log.push("a");
        log.push("b");
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_entry_display() {
        let entry = LogEntry {
            at: UNIX_EPOCH,
            message: "hello".into(),
        };
        assert_eq!(entry.to_string(), "[0] hello");
    }
}
