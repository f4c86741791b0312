//! Logical clock used to order field writes across replicas.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Lamport-style clock of one replica.
///
/// Ordering: the higher counter wins; equal counters fall back to the higher
/// node id, giving a total order over writes from all replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalClock {
    pub node_id: u64,
    pub counter: u64,
}

impl LogicalClock {
    pub fn new(node_id: u64) -> Self {
        Self {
            node_id,
            counter: 0,
        }
    }

    pub fn with_counter(node_id: u64, counter: u64) -> Self {
        Self { node_id, counter }
    }

    /// Advance the clock and return the new reading
    pub fn tick(&mut self) -> LogicalClock {
        self.counter += 1;
        *self
    }

    /// Move forward to at least `other`'s counter; the node id is kept
    pub fn merge(&mut self, other: &LogicalClock) {
        self.counter = self.counter.max(other.counter);
    }

    pub fn happened_before(&self, other: &LogicalClock) -> bool {
        self.counter < other.counter
    }

    /// Same counter on different replicas
    pub fn is_concurrent_with(&self, other: &LogicalClock) -> bool {
        self.counter == other.counter && self.node_id != other.node_id
    }
}

impl Ord for LogicalClock {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.counter.cmp(&other.counter) {
            Ordering::Equal => self.node_id.cmp(&other.node_id),
            other => other,
        }
    }
}

impl PartialOrd for LogicalClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
