//! Recent managed-process output: bounded ring buffer with a drop counter
//!
//! Output lines are also logged through `tracing` as they arrive; the ring
//! only keeps the tail that goes into diagnostic dumps.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A ring shared between the output drains and the dump writer.
///
/// Guarded by a `std::sync::Mutex`; the lock is never held across I/O.
pub type SharedLogRing = Arc<Mutex<LogRing>>;

/// Create an empty shared ring
pub fn shared_ring(capacity: usize) -> SharedLogRing {
    Arc::new(Mutex::new(LogRing::new(capacity)))
}

/// A single line captured from the managed process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Monotonic sequence number for the entry
    pub seq: u64,
    /// Stream kind (stdout or stderr)
    pub stream: schema::LogStream,
    /// Decoded content of the line, without trailing newline
    pub content: String,
    /// Timestamp in RFC3339 format
    pub timestamp: String,
}

impl LogEntry {
    pub fn new(stream: schema::LogStream, content: String) -> Self {
        Self {
            seq: 0,
            stream,
            content,
            timestamp: schema::current_timestamp(),
        }
    }
}

/// A bounded-capacity ring buffer to store recent log entries.
///
/// - When capacity is exceeded, oldest entries are dropped and `total_dropped` is incremented.
/// - Sequence numbers increase monotonically and are attached to each entry when pushed.
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    total_dropped: u64,
    next_seq: u64,
    entries: VecDeque<LogEntry>,
}

impl LogRing {
    /// Create a new `LogRing`; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            total_dropped: 0,
            next_seq: 0,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Push a new entry into the ring, assigning the next sequence number.
    /// If the ring is full, evicts the oldest entry and increments the drop counter.
    pub fn push(&mut self, mut entry: LogEntry) {
        entry.seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.total_dropped = self.total_dropped.saturating_add(1);
        }
        self.entries.push_back(entry);
    }

    /// Current number of entries retained
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of entries ever dropped due to capacity
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }

    /// Clone the retained entries, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Snapshot a shared ring, tolerating a poisoned lock
pub fn snapshot_shared(ring: &SharedLogRing) -> Vec<LogEntry> {
    match ring.lock() {
        Ok(guard) => guard.snapshot(),
        Err(poisoned) => poisoned.into_inner().snapshot(),
    }
}
