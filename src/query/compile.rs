//! Resolving a predicate tree against a schema.

use regex::Regex;

use super::error::{QueryError, QueryResult};
use super::predicate::{Case, CompareOp, Predicate, SortOrder, StringOp};
use crate::record::{DataType, Schema, Value};

/// One resolved `(table, column)` pair, re-checked before every run
#[derive(Debug, Clone)]
struct Check {
    table: usize,
    table_name: String,
    column: usize,
    column_name: String,
    data_type: DataType,
}

/// A column reached from the query table, possibly through links
#[derive(Debug, Clone)]
pub(crate) struct ColumnPath {
    pub(crate) name: String,
    /// `(table, column)` of every link column crossed
    pub(crate) hops: Vec<(usize, usize)>,
    pub(crate) table: usize,
    pub(crate) column: usize,
    pub(crate) data_type: DataType,
}

impl ColumnPath {
    pub(crate) fn is_direct(&self) -> bool {
        self.hops.is_empty()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    True,
    Compare {
        path: ColumnPath,
        op: CompareOp,
        value: Value,
        case: Case,
    },
    Between {
        path: ColumnPath,
        low: Value,
        high: Value,
    },
    StringMatch {
        path: ColumnPath,
        op: StringOp,
        /// Lowercased when matching without case
        pattern: String,
        case: Case,
        like: Option<Regex>,
    },
    IsNull(ColumnPath),
    IsNotNull(ColumnPath),
    IsEmpty(ColumnPath),
    IsNotEmpty(ColumnPath),
    In {
        path: ColumnPath,
        values: Vec<Value>,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

/// A query bound to table and column positions of one schema
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub(crate) table: usize,
    pub(crate) table_name: String,
    pub(crate) root: Node,
    pub(crate) sort: Vec<(usize, SortOrder)>,
    pub(crate) distinct: Vec<usize>,
    pub(crate) limit: Option<usize>,
    checks: Vec<Check>,
}

impl CompiledQuery {
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Whether the positions resolved at compile time still mean the same
    /// columns in `schema`
    pub fn is_valid_for(&self, schema: &Schema) -> bool {
        self.checks.iter().all(|check| {
            schema.table_at(check.table).is_some_and(|t| {
                t.name() == check.table_name
                    && t.column(check.column).is_some_and(|c| {
                        c.name == check.column_name && c.data_type == check.data_type
                    })
            })
        })
    }
}

fn invalid(msg: String) -> QueryError {
    QueryError::InvalidQuery(msg)
}

pub(crate) struct Compiler<'a> {
    schema: &'a Schema,
    table: usize,
    checks: Vec<Check>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(schema: &'a Schema, table: &str) -> QueryResult<Self> {
        let idx = schema
            .find_table(table)
            .ok_or_else(|| invalid(format!("no table named {}", table)))?;
        Ok(Self {
            schema,
            table: idx,
            checks: Vec::new(),
        })
    }

    pub(crate) fn finish(
        mut self,
        predicate: &Predicate,
        sort: &[(String, SortOrder)],
        distinct: &[String],
        limit: Option<usize>,
    ) -> QueryResult<CompiledQuery> {
        let root = self.node(predicate)?;
        let sort = sort
            .iter()
            .map(|(path, order)| Ok((self.direct_column(path, "sort")?, *order)))
            .collect::<QueryResult<Vec<_>>>()?;
        let distinct = distinct
            .iter()
            .map(|path| self.direct_column(path, "distinct"))
            .collect::<QueryResult<Vec<_>>>()?;
        let table_name = self
            .schema
            .table_at(self.table)
            .map(|t| t.name().to_string())
            .unwrap_or_default();
        Ok(CompiledQuery {
            table: self.table,
            table_name,
            root,
            sort,
            distinct,
            limit,
            checks: self.checks,
        })
    }

    fn direct_column(&mut self, name: &str, what: &str) -> QueryResult<usize> {
        let path = self.path(name)?;
        if !path.is_direct() {
            return Err(invalid(format!("cannot {} on linked column {}", what, name)));
        }
        if path.data_type == DataType::LinkList {
            return Err(invalid(format!("cannot {} on link list {}", what, name)));
        }
        Ok(path.column)
    }

    /// Resolve a dotted path; every segment but the last must be a link
    fn path(&mut self, name: &str) -> QueryResult<ColumnPath> {
        let all = self.schema;
        let mut table = self.table;
        let mut hops = Vec::new();
        let segments: Vec<&str> = name.split('.').collect();

        for (i, segment) in segments.iter().enumerate() {
            let schema = all
                .table_at(table)
                .ok_or_else(|| invalid(format!("no table for path {}", name)))?;
            let column = schema.find_column(segment).ok_or_else(|| {
                invalid(format!("no column {} in table {}", segment, schema.name()))
            })?;
            let def = &schema.columns()[column];
            self.checks.push(Check {
                table,
                table_name: schema.name().to_string(),
                column,
                column_name: def.name.clone(),
                data_type: def.data_type,
            });

            if i + 1 == segments.len() {
                return Ok(ColumnPath {
                    name: name.to_string(),
                    hops,
                    table,
                    column,
                    data_type: def.data_type,
                });
            }

            let target = match (&def.link_target, def.data_type.is_link()) {
                (Some(target), true) => target,
                _ => {
                    return Err(invalid(format!(
                        "{}.{} is not a link and cannot be followed",
                        schema.name(),
                        segment
                    )));
                }
            };
            hops.push((table, column));
            table = all
                .find_table(target)
                .ok_or_else(|| invalid(format!("link target {} does not exist", target)))?;
        }
        Err(invalid("empty column path".to_string()))
    }

    fn nullable(&self, path: &ColumnPath) -> bool {
        path.data_type == DataType::Link
            || !path.is_direct()
            || self
                .schema
                .table_at(path.table)
                .and_then(|t| t.column(path.column))
                .is_some_and(|c| c.nullable)
    }

    fn check_literal(&self, path: &ColumnPath, value: &Value) -> QueryResult<()> {
        let ok = match (path.data_type, value) {
            (_, Value::Null) => self.nullable(path),
            (DataType::LinkList, _) => false,
            (dt, v) if dt.is_numeric() => v.as_f64().is_some(),
            (dt, v) => v.data_type() == Some(dt),
        };
        if ok {
            Ok(())
        } else {
            Err(invalid(format!(
                "cannot compare {} column {} with {}",
                path.data_type,
                path.name,
                value.type_name()
            )))
        }
    }

    fn string_path(&mut self, name: &str) -> QueryResult<ColumnPath> {
        let path = self.path(name)?;
        if path.data_type != DataType::String {
            return Err(invalid(format!(
                "{} is a {} column, string operators need a string column",
                name, path.data_type
            )));
        }
        Ok(path)
    }

    fn node(&mut self, predicate: &Predicate) -> QueryResult<Node> {
        Ok(match predicate {
            Predicate::True => Node::True,
            Predicate::Compare {
                path,
                op,
                value,
                case,
            } => {
                let path = self.path(path)?;
                self.check_literal(&path, value)?;
                if op.is_ordering() {
                    if !(path.data_type.is_numeric() || path.data_type == DataType::Timestamp) {
                        return Err(invalid(format!(
                            "ordering comparison on {} column {}",
                            path.data_type, path.name
                        )));
                    }
                    if value.is_null() {
                        return Err(invalid(format!("ordering comparison of {} with null", path.name)));
                    }
                }
                if *case == Case::Insensitive && path.data_type != DataType::String {
                    return Err(invalid(format!(
                        "case-insensitive comparison on {} column {}",
                        path.data_type, path.name
                    )));
                }
                let value = match (case, value) {
                    (Case::Insensitive, Value::String(s)) => Value::String(s.to_lowercase()),
                    _ => value.clone(),
                };
                Node::Compare {
                    path,
                    op: *op,
                    value,
                    case: *case,
                }
            }
            Predicate::Between { path, low, high } => {
                let path = self.path(path)?;
                if !(path.data_type.is_numeric() || path.data_type == DataType::Timestamp) {
                    return Err(invalid(format!(
                        "between on {} column {}",
                        path.data_type, path.name
                    )));
                }
                if low.is_null() || high.is_null() {
                    return Err(invalid(format!("between bounds of {} cannot be null", path.name)));
                }
                self.check_literal(&path, low)?;
                self.check_literal(&path, high)?;
                Node::Between {
                    path,
                    low: low.clone(),
                    high: high.clone(),
                }
            }
            Predicate::StringMatch {
                path,
                op,
                pattern,
                case,
            } => {
                let path = self.string_path(path)?;
                let like = match op {
                    StringOp::Like => Some(like_regex(pattern, *case)?),
                    _ => None,
                };
                let pattern = match case {
                    Case::Insensitive => pattern.to_lowercase(),
                    Case::Sensitive => pattern.clone(),
                };
                Node::StringMatch {
                    path,
                    op: *op,
                    pattern,
                    case: *case,
                    like,
                }
            }
            Predicate::IsNull(name) | Predicate::IsNotNull(name) => {
                let path = self.path(name)?;
                if !self.nullable(&path) {
                    return Err(invalid(format!("{} is not nullable", name)));
                }
                match predicate {
                    Predicate::IsNull(_) => Node::IsNull(path),
                    _ => Node::IsNotNull(path),
                }
            }
            Predicate::IsEmpty(name) | Predicate::IsNotEmpty(name) => {
                let path = self.path(name)?;
                if !matches!(
                    path.data_type,
                    DataType::String | DataType::Binary | DataType::LinkList
                ) {
                    return Err(invalid(format!(
                        "{} column {} has no notion of empty",
                        path.data_type, name
                    )));
                }
                match predicate {
                    Predicate::IsEmpty(_) => Node::IsEmpty(path),
                    _ => Node::IsNotEmpty(path),
                }
            }
            Predicate::In { path, values } => {
                let path = self.path(path)?;
                for value in values {
                    self.check_literal(&path, value)?;
                }
                Node::In {
                    path,
                    values: values.clone(),
                }
            }
            Predicate::And(children) => Node::And(
                children
                    .iter()
                    .map(|c| self.node(c))
                    .collect::<QueryResult<_>>()?,
            ),
            Predicate::Or(children) => Node::Or(
                children
                    .iter()
                    .map(|c| self.node(c))
                    .collect::<QueryResult<_>>()?,
            ),
            Predicate::Not(inner) => Node::Not(Box::new(self.node(inner)?)),
        })
    }
}

/// `*` matches any run of characters, `?` exactly one; the rest is literal
fn like_regex(pattern: &str, case: Case) -> QueryResult<Regex> {
    let mut re = String::from("(?s)");
    if case == Case::Insensitive {
        re.push_str("(?i)");
    }
    re.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| invalid(format!("bad like pattern {:?}: {}", pattern, e)))
}
