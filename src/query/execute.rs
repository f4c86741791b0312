//! Running a compiled query against one snapshot.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::ops::Bound;

use ahash::AHashSet;
use tracing::trace;

use super::compile::{ColumnPath, CompiledQuery, Node};
use super::error::{QueryError, QueryResult};
use super::predicate::{Case, CompareOp, SortOrder, StringOp};
use crate::database::Snapshot;
use crate::record::{DataType, Record, RowKey, TableSchema, Value};
use crate::table::Table;

struct Executor<'a> {
    snapshot: &'a Snapshot,
    base: &'a Table,
}

/// Matching row keys after sort, distinct and limit
pub(crate) fn run(compiled: &CompiledQuery, snapshot: &Snapshot) -> QueryResult<Vec<RowKey>> {
    if !compiled.is_valid_for(snapshot.schema()) {
        return Err(QueryError::InvalidQuery(format!(
            "schema of version {} no longer matches the compiled query on {}",
            snapshot.version(),
            compiled.table_name
        )));
    }
    let base = snapshot.table_data(compiled.table).ok_or_else(|| {
        QueryError::InvalidQuery(format!("table {} is missing", compiled.table_name))
    })?;
    let exec = Executor {
        snapshot,
        base,
    };

    let mut positions = match exec.seek(&compiled.root) {
        Some(candidates) => {
            let mut positions: Vec<usize> = candidates
                .into_iter()
                .filter_map(|k| base.position(k))
                .collect();
            positions.sort_unstable();
            positions.dedup();
            trace!(table = %compiled.table_name, candidates = positions.len(), "index seek");
            positions
                .into_iter()
                .filter(|&pos| exec.eval(&compiled.root, pos))
                .collect::<Vec<_>>()
        }
        None => (0..base.physical_len())
            .filter(|&pos| base.key_at(pos).is_some_and(|k| !base.is_deleted(k)))
            .filter(|&pos| exec.eval(&compiled.root, pos))
            .collect(),
    };

    if !compiled.sort.is_empty() {
        let mut rows: Vec<(usize, Vec<Value>)> = positions
            .into_iter()
            .map(|pos| {
                let values = compiled
                    .sort
                    .iter()
                    .map(|(col, _)| base.get_at(*col, pos))
                    .collect();
                (pos, values)
            })
            .collect();
        rows.sort_by(|(_, a), (_, b)| {
            for ((x, y), (_, order)) in a.iter().zip(b).zip(&compiled.sort) {
                let ord = match order {
                    SortOrder::Ascending => x.sort_cmp(y),
                    SortOrder::Descending => y.sort_cmp(x),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        positions = rows.into_iter().map(|(pos, _)| pos).collect();
    }

    if !compiled.distinct.is_empty() {
        let mut seen = AHashSet::new();
        positions.retain(|&pos| {
            let values: Vec<DistinctKey> = compiled
                .distinct
                .iter()
                .map(|col| DistinctKey(base.get_at(*col, pos)))
                .collect();
            seen.insert(values)
        });
    }

    if let Some(limit) = compiled.limit {
        positions.truncate(limit);
    }

    Ok(positions
        .into_iter()
        .filter_map(|pos| base.key_at(pos))
        .collect())
}

/// Value wrapper for duplicate detection. Floats compare by value, so
/// `-0.0` equals `0.0` and every NaN equals every other NaN.
struct DistinctKey(Value);

fn float_bits(x: f64) -> u64 {
    if x.is_nan() {
        f64::NAN.to_bits()
    } else if x == 0.0 {
        0
    } else {
        x.to_bits()
    }
}

impl PartialEq for DistinctKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Value::Float(a), Value::Float(b)) => float_bits(*a as f64) == float_bits(*b as f64),
            (Value::Double(a), Value::Double(b)) => float_bits(*a) == float_bits(*b),
            (a, b) => a == b,
        }
    }
}

impl Eq for DistinctKey {}

impl Hash for DistinctKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Null => {}
            Value::Int(i) => i.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Float(x) => float_bits(*x as f64).hash(state),
            Value::Double(x) => float_bits(*x).hash(state),
            Value::String(s) => s.hash(state),
            Value::Binary(b) => b.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Link(k) => k.hash(state),
            Value::LinkList(keys) => keys.hash(state),
        }
    }
}

impl Executor<'_> {
    /// Candidate keys from an index when the leading condition can use one
    fn seek(&self, root: &Node) -> Option<Vec<RowKey>> {
        let lead = match root {
            Node::And(children) => children.first()?,
            other => other,
        };
        let exact = |path: &ColumnPath, value: &Value| {
            path.is_direct() && value.data_type() == Some(path.data_type)
        };
        match lead {
            Node::Compare {
                path,
                op,
                value,
                case: Case::Sensitive,
            } if exact(path, value) => {
                let index = self.base.index(path.column)?;
                Some(match op {
                    CompareOp::Equal => index.find(value),
                    CompareOp::NotEqual => return None,
                    CompareOp::Greater => index.range(Bound::Excluded(value), Bound::Unbounded),
                    CompareOp::GreaterEqual => index.range(Bound::Included(value), Bound::Unbounded),
                    CompareOp::Less => index.range(Bound::Unbounded, Bound::Excluded(value)),
                    CompareOp::LessEqual => index.range(Bound::Unbounded, Bound::Included(value)),
                })
            }
            Node::Between { path, low, high } if exact(path, low) && exact(path, high) => {
                let index = self.base.index(path.column)?;
                Some(index.range(Bound::Included(low), Bound::Included(high)))
            }
            _ => None,
        }
    }

    /// Whether `f` holds for any value `path` reaches from the row at `pos`.
    ///
    /// A null to-one link along the way reaches a single NULL.
    fn any_value(&self, path: &ColumnPath, pos: usize, mut f: impl FnMut(&Value) -> bool) -> bool {
        if path.is_direct() {
            return f(&self.base.get_at(path.column, pos));
        }

        let mut positions = vec![pos];
        let mut reached_null = false;
        for (i, &(table, column)) in path.hops.iter().enumerate() {
            let Some(source) = self.snapshot.table_data(table) else {
                return false;
            };
            let mut keys = Vec::new();
            for p in positions {
                match source.get_at(column, p) {
                    Value::Link(k) => keys.push(k),
                    Value::LinkList(list) => keys.extend(list),
                    _ => reached_null = true,
                }
            }
            let next = path.hops.get(i + 1).map_or(path.table, |hop| hop.0);
            let Some(target) = self.snapshot.table_data(next) else {
                return false;
            };
            positions = keys.into_iter().filter_map(|k| target.position(k)).collect();
        }

        let Some(target) = self.snapshot.table_data(path.table) else {
            return false;
        };
        positions
            .into_iter()
            .any(|p| f(&target.get_at(path.column, p)))
            || (reached_null && f(&Value::Null))
    }

    fn eval(&self, node: &Node, pos: usize) -> bool {
        match node {
            Node::True => true,
            Node::Compare {
                path,
                op,
                value,
                case,
            } => self.any_value(path, pos, |v| compare(v, *op, value, *case)),
            Node::Between { path, low, high } => self.any_value(path, pos, |v| {
                !v.is_null()
                    && matches!(v.compare(low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(v.compare(high), Some(Ordering::Less | Ordering::Equal))
            }),
            Node::StringMatch {
                path,
                op,
                pattern,
                case,
                like,
            } => self.any_value(path, pos, |v| {
                let Some(s) = v.as_str() else {
                    return false;
                };
                if let (StringOp::Like, Some(re)) = (op, like) {
                    return re.is_match(s);
                }
                let lowered;
                let s = match case {
                    Case::Insensitive => {
                        lowered = s.to_lowercase();
                        lowered.as_str()
                    }
                    Case::Sensitive => s,
                };
                match op {
                    StringOp::Contains => s.contains(pattern.as_str()),
                    StringOp::BeginsWith => s.starts_with(pattern.as_str()),
                    StringOp::EndsWith => s.ends_with(pattern.as_str()),
                    StringOp::Like => false,
                }
            }),
            Node::IsNull(path) => self.any_value(path, pos, Value::is_null),
            Node::IsNotNull(path) => self.any_value(path, pos, |v| !v.is_null()),
            Node::IsEmpty(path) => self.any_value(path, pos, is_empty),
            Node::IsNotEmpty(path) => self.any_value(path, pos, |v| !v.is_null() && !is_empty(v)),
            Node::In { path, values } => self.any_value(path, pos, |v| {
                values
                    .iter()
                    .any(|lit| compare(v, CompareOp::Equal, lit, Case::Sensitive))
            }),
            Node::And(children) => children.iter().all(|c| self.eval(c, pos)),
            Node::Or(children) => children.iter().any(|c| self.eval(c, pos)),
            Node::Not(inner) => !self.eval(inner, pos),
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Binary(b) => b.is_empty(),
        Value::LinkList(list) => list.is_empty(),
        _ => false,
    }
}

/// `value op literal`. Ordering against NULL is false; values of
/// incomparable types are unequal.
fn compare(value: &Value, op: CompareOp, literal: &Value, case: Case) -> bool {
    let lowered;
    let value = match (case, value) {
        (Case::Insensitive, Value::String(s)) => {
            lowered = Value::String(s.to_lowercase());
            &lowered
        }
        _ => value,
    };
    let ord = value.compare(literal);
    match op {
        CompareOp::Equal => ord == Some(Ordering::Equal),
        CompareOp::NotEqual => ord != Some(Ordering::Equal),
        _ if value.is_null() || literal.is_null() => false,
        CompareOp::Greater => ord == Some(Ordering::Greater),
        CompareOp::GreaterEqual => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Less => ord == Some(Ordering::Less),
        CompareOp::LessEqual => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
    }
}

/// Row keys matched by a query, bound to the snapshot they came from.
///
/// Aggregates read column values for the matched keys directly; rows are
/// only materialised by [`Results::records`].
#[derive(Debug, Clone)]
pub struct Results<'a> {
    snapshot: &'a Snapshot,
    table: usize,
    keys: Vec<RowKey>,
}

impl<'a> Results<'a> {
    pub(crate) fn new(snapshot: &'a Snapshot, table: usize, keys: Vec<RowKey>) -> Self {
        Self {
            snapshot,
            table,
            keys,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[RowKey] {
        &self.keys
    }

    pub fn into_keys(self) -> Vec<RowKey> {
        self.keys
    }

    pub fn first(&self) -> Option<RowKey> {
        self.keys.first().copied()
    }

    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }

    fn parts(&self) -> QueryResult<(&'a TableSchema, &'a Table)> {
        let snapshot = self.snapshot;
        match (snapshot.schema().table_at(self.table), snapshot.table_data(self.table)) {
            (Some(schema), Some(table)) => Ok((schema, table)),
            _ => Err(QueryError::InvalidQuery("result table is missing".to_string())),
        }
    }

    pub fn records(&self) -> QueryResult<Vec<Record>> {
        let (schema, table) = self.parts()?;
        self.keys
            .iter()
            .map(|k| table.row(schema, *k).map_err(QueryError::from))
            .collect()
    }

    /// Non-null values of `column` across the results
    fn column_values(&self, column: &str, ordered: bool) -> QueryResult<(DataType, Vec<Value>)> {
        let (schema, table) = self.parts()?;
        let col = schema.column_index(column)?;
        let data_type = schema.columns()[col].data_type;
        let allowed = data_type.is_numeric() || (ordered && data_type == DataType::Timestamp);
        if !allowed {
            return Err(QueryError::InvalidQuery(format!(
                "cannot aggregate {} column {}",
                data_type, column
            )));
        }
        let values = self
            .keys
            .iter()
            .filter_map(|k| table.position(*k))
            .map(|pos| table.get_at(col, pos))
            .filter(|v| !v.is_null())
            .collect();
        Ok((data_type, values))
    }

    /// Int columns sum to `Int`, floating columns to `Double`
    pub fn sum(&self, column: &str) -> QueryResult<Value> {
        let (data_type, values) = self.column_values(column, false)?;
        if data_type == DataType::Int {
            let total: i128 = values.iter().filter_map(Value::as_i64).map(i128::from).sum();
            return i64::try_from(total).map(Value::Int).map_err(|_| {
                QueryError::InvalidQuery(format!("sum of {} overflows", column))
            });
        }
        Ok(Value::Double(values.iter().filter_map(Value::as_f64).sum()))
    }

    pub fn min(&self, column: &str) -> QueryResult<Option<Value>> {
        let (_, values) = self.column_values(column, true)?;
        Ok(values.into_iter().min_by(|a, b| a.sort_cmp(b)))
    }

    pub fn max(&self, column: &str) -> QueryResult<Option<Value>> {
        let (_, values) = self.column_values(column, true)?;
        Ok(values.into_iter().max_by(|a, b| a.sort_cmp(b)))
    }

    /// `None` when no row has a value
    pub fn average(&self, column: &str) -> QueryResult<Option<f64>> {
        let (_, values) = self.column_values(column, false)?;
        if values.is_empty() {
            return Ok(None);
        }
        let total: f64 = values.iter().filter_map(Value::as_f64).sum();
        Ok(Some(total / values.len() as f64))
    }
}

impl<'a> IntoIterator for &'a Results<'_> {
    type Item = &'a RowKey;
    type IntoIter = std::slice::Iter<'a, RowKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}
