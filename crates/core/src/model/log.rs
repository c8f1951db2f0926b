//! Per-deployment log entries and the bounded ring buffer that holds them.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default ring buffer capacity, in entries, per deployment.
pub const DEFAULT_RING_CAPACITY: usize = 3_000;

/// Which stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    /// Child stdout.
    Stdout,
    /// Child stderr.
    Stderr,
    /// Supervisor-generated status line (state transitions, spawn failures).
    System,
    /// Supervisor health-check-generated status line, kept distinct from
    /// `System` so subscribers can filter routine health polls out of the
    /// default view.
    SystemHealthCheck,
}

/// A single tagged log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix millis when the line was captured.
    pub timestamp_unix_ms: i64,
    /// Source stream.
    pub stream: LogStream,
    /// Line contents, without trailing newline.
    pub line: String,
}

/// A fixed-capacity FIFO of log entries for one deployment. Pushing past
/// capacity evicts the oldest entry, matching the node supervisor's
/// per-deployment ring described in the design (§4.7, default 3000 entries).
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    entries: VecDeque<LogEntry>,
    /// Monotonic sequence number of the oldest entry still held, used by
    /// subscribers to detect they've fallen behind the ring (their last-seen
    /// sequence is below `first_sequence`, meaning a gap exists).
    first_sequence: u64,
    next_sequence: u64,
}

impl LogRing {
    /// Create a ring with the given capacity (entries, not bytes).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.min(4096)),
            first_sequence: 0,
            next_sequence: 0,
        }
    }

    /// Append an entry, evicting the oldest if at capacity.
    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.first_sequence += 1;
        }
        self.entries.push_back(entry);
        self.next_sequence += 1;
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// All entries currently held, oldest first.
    pub fn all(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(line: &str) -> LogEntry {
        LogEntry {
            timestamp_unix_ms: 0,
            stream: LogStream::Stdout,
            line: line.to_string(),
        }
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let mut ring = LogRing::new(3);
        for i in 0..5 {
            ring.push(entry(&i.to_string()));
        }
        assert_eq!(ring.len(), 3);
        let lines: Vec<_> = ring.all().into_iter().map(|e| e.line).collect();
        assert_eq!(lines, vec!["2", "3", "4"]);
    }

    #[test]
    fn ring_holds_exactly_default_capacity_under_heavy_write() {
        let mut ring = LogRing::new(DEFAULT_RING_CAPACITY);
        for i in 0..10_000 {
            ring.push(entry(&i.to_string()));
        }
        assert_eq!(ring.len(), DEFAULT_RING_CAPACITY);
        let lines: Vec<_> = ring.all().into_iter().map(|e| e.line).collect();
        assert_eq!(lines.first().unwrap(), "7000");
        assert_eq!(lines.last().unwrap(), "9999");
    }

    #[test]
    fn tail_returns_most_recent_n() {
        let mut ring = LogRing::new(10);
        for i in 0..10 {
            ring.push(entry(&i.to_string()));
        }
        let tail = ring.tail(3);
        let lines: Vec<_> = tail.into_iter().map(|e| e.line).collect();
        assert_eq!(lines, vec!["7", "8", "9"]);
    }

    #[test]
    fn tail_larger_than_ring_returns_everything() {
        let mut ring = LogRing::new(5);
        ring.push(entry("a"));
        ring.push(entry("b"));
        assert_eq!(ring.tail(50).len(), 2);
    }
}
