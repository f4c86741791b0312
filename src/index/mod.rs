//! Search indexes over a single column.
//!
//! An index is a B+ tree of `(value, row key)` pairs, so equal values are
//! kept in row-key order and a value lookup is a range scan. Indexes live in
//! memory and are rebuilt from column data when a version is loaded.

mod error;

pub use error::{IndexError, IndexResult};

use std::ops::Bound;

use crate::btree::BPlusTree;
use crate::record::{RowKey, Timestamp, Value};

/// Value as stored in an index. NULL sorts before every other value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    Timestamp(Timestamp),
    String(String),
}

impl IndexKey {
    /// Convert a column value; `None` for types that cannot be indexed
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Null => IndexKey::Null,
            Value::Bool(b) => IndexKey::Bool(*b),
            Value::Int(i) => IndexKey::Int(*i),
            Value::Timestamp(t) => IndexKey::Timestamp(*t),
            Value::String(s) => IndexKey::String(s.clone()),
            _ => return None,
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            IndexKey::Null => Value::Null,
            IndexKey::Bool(b) => Value::Bool(*b),
            IndexKey::Int(i) => Value::Int(*i),
            IndexKey::Timestamp(t) => Value::Timestamp(*t),
            IndexKey::String(s) => Value::String(s.clone()),
        }
    }
}

const MIN_ROW: RowKey = RowKey(0);
const MAX_ROW: RowKey = RowKey(u64::MAX);

#[derive(Debug, Clone)]
pub struct SearchIndex {
    tree: BPlusTree<(IndexKey, RowKey)>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self {
            tree: BPlusTree::with_default_order(),
        }
    }

    /// Build an index from `(row key, value)` pairs
    pub fn build<I>(entries: I) -> IndexResult<Self>
    where
        I: IntoIterator<Item = (RowKey, Value)>,
    {
        let mut index = Self::new();
        for (key, value) in entries {
            index.insert(&value, key)?;
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn insert(&mut self, value: &Value, key: RowKey) -> IndexResult<()> {
        let index_key = to_key(value)?;
        self.tree.insert((index_key, key))?;
        Ok(())
    }

    /// Remove one entry. Returns whether it was present.
    pub fn remove(&mut self, value: &Value, key: RowKey) -> IndexResult<bool> {
        let index_key = to_key(value)?;
        Ok(self.tree.delete(&(index_key, key))?)
    }

    /// Row keys holding exactly `value`, in row-key order
    pub fn find(&self, value: &Value) -> Vec<RowKey> {
        let Some(k) = IndexKey::from_value(value) else {
            return Vec::new();
        };
        let lo = (k.clone(), MIN_ROW);
        let hi = (k, MAX_ROW);
        self.tree
            .range(Bound::Included(&lo), Bound::Included(&hi))
            .map(|(_, row)| *row)
            .collect()
    }

    /// Row keys whose value lies between the bounds, in value order.
    ///
    /// NULL never matches a range: an unbounded lower end starts after the
    /// NULL entries.
    pub fn range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Vec<RowKey> {
        let lo = match lower {
            Bound::Included(v) => IndexKey::from_value(v).map(|k| Bound::Included((k, MIN_ROW))),
            Bound::Excluded(v) => IndexKey::from_value(v).map(|k| Bound::Excluded((k, MAX_ROW))),
            Bound::Unbounded => Some(Bound::Excluded((IndexKey::Null, MAX_ROW))),
        };
        let hi = match upper {
            Bound::Included(v) => IndexKey::from_value(v).map(|k| Bound::Included((k, MAX_ROW))),
            Bound::Excluded(v) => IndexKey::from_value(v).map(|k| Bound::Excluded((k, MIN_ROW))),
            Bound::Unbounded => Some(Bound::Unbounded),
        };
        let (Some(lo), Some(hi)) = (lo, hi) else {
            return Vec::new();
        };
        if let (Bound::Included((a, _)) | Bound::Excluded((a, _)), Bound::Included((b, _)) | Bound::Excluded((b, _))) =
            (&lo, &hi)
            && a > b
        {
            return Vec::new();
        }
        self.tree
            .range(lo.as_ref(), hi.as_ref())
            .map(|(_, row)| *row)
            .collect()
    }

    /// Distinct values in ascending order
    pub fn values(&self) -> Vec<Value> {
        let mut out: Vec<Value> = Vec::new();
        let mut last: Option<&IndexKey> = None;
        for (k, _) in self.tree.iter() {
            if last != Some(k) {
                out.push(k.to_value());
                last = Some(k);
            }
        }
        out
    }
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn to_key(value: &Value) -> IndexResult<IndexKey> {
    IndexKey::from_value(value).ok_or_else(|| IndexError::NotIndexable(value.type_name()))
}
