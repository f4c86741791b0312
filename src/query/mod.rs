//! Query engine.
//!
//! A [`Query`] is built with chained conditions (or parsed from text with
//! [`Query::parse`]), compiled against a schema and executed against one
//! snapshot. Results keep row position order unless sorted.

mod compile;
mod error;
mod execute;
mod parser;
mod predicate;
#[cfg(test)]
mod tests;

pub use compile::CompiledQuery;
pub use error::{QueryError, QueryResult};
pub use execute::Results;
pub use predicate::{Case, CompareOp, Predicate, Query, SortOrder, StringOp};

use tracing::trace;

use crate::database::Snapshot;
use crate::record::{RowKey, Schema, Value};
use compile::Compiler;
use parser::Clause;

impl Query {
    /// Parse the textual predicate language for `table`; `$N` in the text
    /// refers to `args[N]`
    pub fn parse(table: impl Into<String>, text: &str, args: &[Value]) -> QueryResult<Self> {
        let parsed = parser::parse(text, args)?;
        let mut query = Query::new(table).filter(parsed.predicate);
        for clause in parsed.clauses {
            query = match clause {
                Clause::Sort(keys) => keys
                    .into_iter()
                    .fold(query, |q, (path, order)| q.sort(&path, order)),
                Clause::Distinct(paths) => paths.into_iter().fold(query, |q, path| q.distinct(&path)),
                Clause::Limit(n) => query.limit(n),
            };
        }
        Ok(query)
    }

    /// Resolve names and check literal types against `schema`
    pub fn compile(&self, schema: &Schema) -> QueryResult<CompiledQuery> {
        let predicate = self.predicate().map_err(QueryError::InvalidQuery)?;
        Compiler::new(schema, self.table())?.finish(&predicate, &self.sort, &self.distinct, self.limit)
    }

    pub fn find_all<'a>(&self, snapshot: &'a Snapshot) -> QueryResult<Results<'a>> {
        let compiled = self.compile(snapshot.schema())?;
        compiled.execute(snapshot)
    }

    /// `find_all` ordered by `keys`, ahead of any sort already on the query
    pub fn find_all_sorted<'a>(
        &self,
        snapshot: &'a Snapshot,
        keys: &[(&str, SortOrder)],
    ) -> QueryResult<Results<'a>> {
        let mut query = self.clone();
        let existing = std::mem::take(&mut query.sort);
        query.sort = keys
            .iter()
            .map(|(path, order)| (path.to_string(), *order))
            .chain(existing)
            .collect();
        query.find_all(snapshot)
    }

    pub fn find_first(&self, snapshot: &Snapshot) -> QueryResult<Option<RowKey>> {
        let limit = self.limit.map_or(1, |l| l.min(1));
        Ok(self.clone().limit(limit).find_all(snapshot)?.first())
    }

    pub fn count(&self, snapshot: &Snapshot) -> QueryResult<usize> {
        Ok(self.find_all(snapshot)?.len())
    }
}

impl CompiledQuery {
    pub fn execute<'a>(&self, snapshot: &'a Snapshot) -> QueryResult<Results<'a>> {
        let keys = execute::run(self, snapshot)?;
        trace!(table = %self.table_name, version = snapshot.version(), rows = keys.len(), "executed query");
        Ok(Results::new(snapshot, self.table, keys))
    }
}
