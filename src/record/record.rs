use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::Value;

/// Stable identifier of a row within its table.
///
/// Keys are handed out in increasing order per table and never reused, even
/// after the row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey(pub u64);

impl RowKey {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A materialized row: its key plus one value per column
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    key: RowKey,
    values: Vec<Value>,
}

impl Record {
    /// Create a new record
    pub fn new(key: RowKey, values: Vec<Value>) -> Self {
        Self { key, values }
    }

    pub fn key(&self) -> RowKey {
        self.key
    }

    /// Get the number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if record is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get all values
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
