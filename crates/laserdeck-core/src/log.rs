//! Bounded traffic log for the debug console
//!
//! Every frame sent or received, and every link failure, lands here as an
//! immutable [`LogEntry`]. The buffer holds at most `capacity` entries and
//! evicts the oldest first.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Default number of retained entries
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Origin of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogKind {
    /// Frame received from the controller
    Rx,
    /// Frame sent to the controller
    Tx,
    /// Link failure
    Error,
    /// Diagnostic (e.g. dropped frames)
    Debug,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Rx => write!(f, "RX"),
            LogKind::Tx => write!(f, "TX"),
            LogKind::Error => write!(f, "Error"),
            LogKind::Debug => write!(f, "Debug"),
        }
    }
}

/// A single log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.kind,
            self.text
        )
    }
}

/// Append-only ring buffer of log entries
#[derive(Debug)]
pub struct LogBuffer {
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogBuffer {
    /// Create a buffer retaining at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest beyond capacity
    pub fn push(&self, kind: LogKind, text: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            kind,
            text: text.into(),
        };
        let mut entries = self.entries.write();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// All retained entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Retained entries of one kind, oldest first
    pub fn entries_of(&self, kind: LogKind) -> Vec<LogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Timestamp of the newest entry
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.read().back().map(|e| e.timestamp)
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Maximum number of retained entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_keeps_most_recent() {
        let log = LogBuffer::new(100);
        for i in 0..150 {
            log.push(LogKind::Rx, format!("line {}", i));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 100);
        assert_eq!(entries.first().map(|e| e.text.as_str()), Some("line 50"));
        assert_eq!(entries.last().map(|e| e.text.as_str()), Some("line 149"));
    }

    #[test]
    fn test_filter_by_kind() {
        let log = LogBuffer::default();
        log.push(LogKind::Tx, r#"{"a":2,"p":{}}"#);
        log.push(LogKind::Rx, r#"{"t":4,"p":{}}"#);
        log.push(LogKind::Error, "Write failed");

        assert_eq!(log.entries_of(LogKind::Tx).len(), 1);
        assert_eq!(log.entries_of(LogKind::Error)[0].text, "Write failed");
        assert!(log.entries_of(LogKind::Debug).is_empty());
    }

    #[test]
    fn test_clear_and_last_timestamp() {
        let log = LogBuffer::new(0);
        assert_eq!(log.capacity(), 1);
        assert!(log.last_timestamp().is_none());

        log.push(LogKind::Debug, "a");
        log.push(LogKind::Debug, "b");
        assert_eq!(log.len(), 1);
        assert!(log.last_timestamp().is_some());

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_entry_display() {
        let log = LogBuffer::default();
        log.push(LogKind::Tx, "hello");
        let line = log.entries()[0].to_string();
        assert!(line.ends_with("TX: hello"));
    }
}
