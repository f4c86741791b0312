use std::ops::Deref;
use std::sync::Arc;

use ahash::AHashSet;

use super::error::{DatabaseError, DatabaseResult};
use crate::file::{PageRef, PageStore, PageView};
use crate::record::{
    ColumnHandle, ColumnValue, DataType, Record, RecordError, RowKey, Schema, TableSchema, Value,
};
use crate::table::{ByteReader, ByteWriter, Table};

/// A row in another table that links to a given row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backlink {
    pub table: String,
    pub column: String,
    pub key: RowKey,
}

/// Immutable view of the schema and every table at one committed version.
///
/// Tables are shared with neighbouring versions; only what a commit changed
/// differs between two snapshots.
#[derive(Clone)]
pub struct Snapshot {
    pub(crate) version: u64,
    pub(crate) schema: Arc<Schema>,
    pub(crate) tables: Vec<Arc<Table>>,
    /// Root extent of this version; `None` until persisted
    pub(crate) root: Option<PageRef>,
    /// Keeps this version's pages from being reused
    pub(crate) view: Option<Arc<PageView>>,
}

impl Snapshot {
    pub(crate) fn empty(schema_version: u64, view: Option<Arc<PageView>>) -> Self {
        Self {
            version: view.as_ref().map_or(0, |v| v.version()),
            schema: Arc::new(Schema::new(schema_version)),
            tables: Vec::new(),
            root: None,
            view,
        }
    }

    /// Load the version pinned by `view`
    pub(crate) fn load(view: PageView) -> DatabaseResult<Self> {
        let store = Arc::clone(view.store());
        let Some(root) = view.root() else {
            return Ok(Self::empty(store.schema_version(), Some(Arc::new(view))));
        };

        let bytes = store.read_extent(root)?;
        let mut r = ByteReader::new(&bytes);
        let schema = Schema::from_json(r.bytes()?)?;
        let count = r.u32()? as usize;
        if count != schema.table_count() {
            return Err(RecordError::Deserialization(format!(
                "root lists {} tables, schema has {}",
                count,
                schema.table_count()
            ))
            .into());
        }
        let mut tables = Vec::with_capacity(count);
        for table_schema in schema.tables() {
            let extent = r.page_ref()?;
            tables.push(Arc::new(Table::load(&store, extent, table_schema)?));
        }

        Ok(Self {
            version: view.version(),
            schema: Arc::new(schema),
            tables,
            root: Some(root),
            view: Some(Arc::new(view)),
        })
    }

    /// Write every changed table and a new root
    pub(crate) fn persist(&mut self, store: &PageStore) -> DatabaseResult<PageRef> {
        let mut w = ByteWriter::new();
        w.bytes(&self.schema.to_json()?);
        w.u32(self.tables.len() as u32);
        for table in &mut self.tables {
            let extent = match table.stored() {
                Some(extent) => extent,
                None => Arc::make_mut(table).persist(store)?,
            };
            w.page_ref(extent);
        }
        let root = store.write_new(&w.finish())?;
        self.root = Some(root);
        Ok(root)
    }

    /// Deep copy sharing nothing with any store, used to rewrite a file
    pub(crate) fn detached(&self) -> DatabaseResult<Self> {
        let tables = self
            .tables
            .iter()
            .map(|t| t.detached().map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            version: self.version,
            schema: Arc::clone(&self.schema),
            tables,
            root: None,
            view: None,
        })
    }

    /// Every extent this version references
    pub(crate) fn collect_extents(&self) -> AHashSet<PageRef> {
        let mut out = AHashSet::new();
        out.extend(self.root);
        for table in &self.tables {
            table.collect_extents(&mut out);
        }
        out
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn table_data(&self, idx: usize) -> Option<&Table> {
        self.tables.get(idx).map(Arc::as_ref)
    }

    /// Schema and mutable data of one table; copies the table if it is shared
    pub(crate) fn table_mut(&mut self, idx: usize) -> Option<(&TableSchema, &mut Table)> {
        let schema = self.schema.table_at(idx)?;
        let table = Arc::make_mut(self.tables.get_mut(idx)?);
        Some((schema, table))
    }

    pub(crate) fn table_index(&self, name: &str) -> DatabaseResult<usize> {
        Ok(self.schema.table_index(name)?)
    }

    fn resolve(&self, name: &str) -> DatabaseResult<(&TableSchema, &Table)> {
        let idx = self.table_index(name)?;
        match (self.schema.table_at(idx), self.tables.get(idx)) {
            (Some(schema), Some(table)) => Ok((schema, table)),
            _ => Err(RecordError::TableNotFound(name.to_string()).into()),
        }
    }

    pub fn table_schema(&self, table: &str) -> DatabaseResult<&TableSchema> {
        Ok(self.resolve(table)?.0)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.schema.tables().iter().map(|t| t.name()).collect()
    }

    /// Number of live rows
    pub fn row_count(&self, table: &str) -> DatabaseResult<usize> {
        Ok(self.resolve(table)?.1.row_count())
    }

    /// Live row keys in position order
    pub fn keys(&self, table: &str) -> DatabaseResult<Vec<RowKey>> {
        Ok(self.resolve(table)?.1.keys())
    }

    pub fn is_valid(&self, table: &str, key: RowKey) -> bool {
        self.resolve(table).is_ok_and(|(_, t)| t.contains(key))
    }

    pub fn get(&self, table: &str, key: RowKey, column: &str) -> DatabaseResult<Value> {
        let (schema, data) = self.resolve(table)?;
        let col = schema.column_index(column)?;
        Ok(data.get(schema, col, key)?)
    }

    /// Read through a typed handle
    pub fn get_typed<T: ColumnValue>(&self, handle: &ColumnHandle<T>, key: RowKey) -> DatabaseResult<T> {
        handle.check(&self.schema)?;
        let (schema, data) = match (self.schema.table_at(handle.table()), self.tables.get(handle.table())) {
            (Some(s), Some(t)) => (s, t),
            _ => return Err(RecordError::TableNotFound(handle.name().to_string()).into()),
        };
        let value = data.get(schema, handle.column(), key)?;
        let actual = value.type_name();
        T::from_value(value).ok_or_else(|| {
            RecordError::TypeMismatch {
                column: handle.name().to_string(),
                expected: T::DATA_TYPE.to_string(),
                actual,
            }
            .into()
        })
    }

    /// Resolve a typed handle against this snapshot's schema
    pub fn column_handle<T: ColumnValue>(&self, table: &str, column: &str) -> DatabaseResult<ColumnHandle<T>> {
        Ok(ColumnHandle::resolve(&self.schema, table, column)?)
    }

    pub fn row(&self, table: &str, key: RowKey) -> DatabaseResult<Record> {
        let (schema, data) = self.resolve(table)?;
        Ok(data.row(schema, key)?)
    }

    pub fn link_list(&self, table: &str, key: RowKey, column: &str) -> DatabaseResult<Vec<RowKey>> {
        match self.get(table, key, column)? {
            Value::LinkList(list) => Ok(list),
            other => Err(RecordError::TypeMismatch {
                column: format!("{}.{}", table, column),
                expected: DataType::LinkList.to_string(),
                actual: other.type_name(),
            }
            .into()),
        }
    }

    pub fn find_by_primary_key(&self, table: &str, value: impl Into<Value>) -> DatabaseResult<Option<RowKey>> {
        let (schema, data) = self.resolve(table)?;
        if schema.primary_key().is_none() {
            return Err(DatabaseError::SchemaMismatch(format!(
                "table {} has no primary key",
                table
            )));
        }
        Ok(data.find_by_primary_key(schema, &value.into()))
    }

    /// Rows in any table that link to `key` of `table`
    pub fn backlinks(&self, table: &str, key: RowKey) -> DatabaseResult<Vec<Backlink>> {
        let (_, data) = self.resolve(table)?;
        if !data.contains(key) {
            return Err(RecordError::InvalidRowKey {
                table: table.to_string(),
                key,
            }
            .into());
        }
        let mut out = Vec::new();
        for (source, source_schema) in self.tables.iter().zip(self.schema.tables()) {
            for (col, def) in source_schema.columns().iter().enumerate() {
                if def.link_target.as_deref() != Some(table) {
                    continue;
                }
                out.extend(source.rows_linking_to(col, key).into_iter().map(|k| Backlink {
                    table: source_schema.name().to_string(),
                    column: def.name.clone(),
                    key: k,
                }));
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("schema_version", &self.schema.version())
            .field("tables", &self.tables.len())
            .finish()
    }
}

/// A pinned read-only view of the latest version at the time it was begun.
///
/// The transaction keeps seeing exactly that version however many commits
/// happen meanwhile. While it is open, pages of its version cannot be reused,
/// so a long-lived read transaction makes the file grow. Drop it (or call
/// [`ReadTransaction::close`]) as soon as it is no longer needed.
#[derive(Debug, Clone)]
pub struct ReadTransaction {
    snapshot: Arc<Snapshot>,
}

impl ReadTransaction {
    pub(crate) fn new(snapshot: Arc<Snapshot>) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Release the pinned version
    pub fn close(self) {}
}

impl Deref for ReadTransaction {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.snapshot
    }
}
