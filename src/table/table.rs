use std::sync::Arc;

use ahash::AHashSet;
use tracing::debug;

use super::codec::{ByteReader, ByteWriter};
use super::column::ColumnTree;
use crate::file::{PageRef, PageStore};
use crate::index::SearchIndex;
use crate::record::{
    ColumnDef, DataType, Record, RecordError, RecordResult, RowKey, TableSchema, Value,
};

/// Rows of one table, stored column by column.
///
/// Row keys live in a hidden key column in ascending order, so the position
/// of a key is a binary search. Deleted rows are tombstoned until
/// [`Table::compact`] removes them, which happens when a write commits.
#[derive(Debug, Clone)]
pub struct Table {
    keys: ColumnTree,
    columns: Vec<ColumnTree>,
    next_key: u64,
    tombstones: AHashSet<RowKey>,
    indexes: Vec<Option<Arc<SearchIndex>>>,
    /// Header extent; `None` while the table has unsaved changes
    stored: Option<PageRef>,
}

impl Table {
    pub fn new(schema: &TableSchema) -> Self {
        Self {
            keys: ColumnTree::new_keys(),
            columns: schema
                .columns()
                .iter()
                .map(|c| ColumnTree::new(c.data_type))
                .collect(),
            next_key: 0,
            tombstones: AHashSet::new(),
            indexes: schema
                .columns()
                .iter()
                .map(|c| c.indexed.then(|| Arc::new(SearchIndex::new())))
                .collect(),
            stored: None,
        }
    }

    /// Number of live rows
    pub fn row_count(&self) -> usize {
        self.keys.len() - self.tombstones.len()
    }

    /// Number of stored rows including tombstoned ones
    pub fn physical_len(&self) -> usize {
        self.keys.len()
    }

    pub fn next_key(&self) -> u64 {
        self.next_key
    }

    pub fn is_dirty(&self) -> bool {
        self.stored.is_none()
    }

    /// Header extent when nothing changed since the last persist
    pub fn stored(&self) -> Option<PageRef> {
        self.stored
    }

    pub fn has_tombstones(&self) -> bool {
        !self.tombstones.is_empty()
    }

    /// Position of a live row
    pub fn position(&self, key: RowKey) -> Option<usize> {
        if self.tombstones.contains(&key) {
            return None;
        }
        self.keys.find_key(key.0)
    }

    pub fn contains(&self, key: RowKey) -> bool {
        self.position(key).is_some()
    }

    /// Key stored at a physical position, tombstoned or not
    pub fn key_at(&self, pos: usize) -> Option<RowKey> {
        self.keys.key_at(pos).map(RowKey)
    }

    pub fn is_deleted(&self, key: RowKey) -> bool {
        self.tombstones.contains(&key)
    }

    /// Live row keys in position order
    pub fn keys(&self) -> Vec<RowKey> {
        let mut out = Vec::with_capacity(self.row_count());
        self.keys.for_each_leaf(&mut |leaf| {
            for idx in 0..leaf.len() {
                if let Some(k) = leaf.key_at(idx).map(RowKey)
                    && !self.tombstones.contains(&k)
                {
                    out.push(k);
                }
            }
        });
        out
    }

    fn live_position(&self, schema: &TableSchema, key: RowKey) -> RecordResult<usize> {
        self.position(key).ok_or_else(|| RecordError::InvalidRowKey {
            table: schema.name().to_string(),
            key,
        })
    }

    fn column_tree(&self, schema: &TableSchema, col: usize) -> RecordResult<&ColumnTree> {
        self.columns.get(col).ok_or_else(|| RecordError::ColumnNotFound {
            table: schema.name().to_string(),
            column: format!("#{}", col),
        })
    }

    pub fn get(&self, schema: &TableSchema, col: usize, key: RowKey) -> RecordResult<Value> {
        let pos = self.live_position(schema, key)?;
        Ok(self.column_tree(schema, col)?.get(pos).unwrap_or(Value::Null))
    }

    /// Value at a physical position, without liveness checks
    pub fn get_at(&self, col: usize, pos: usize) -> Value {
        self.columns
            .get(col)
            .and_then(|c| c.get(pos))
            .unwrap_or(Value::Null)
    }

    /// String or binary bytes at a physical position, borrowed from the leaf
    pub fn payload_at(&self, col: usize, pos: usize) -> Option<&[u8]> {
        self.columns.get(col).and_then(|c| c.payload_at(pos))
    }

    pub fn row(&self, schema: &TableSchema, key: RowKey) -> RecordResult<Record> {
        let pos = self.live_position(schema, key)?;
        let values = (0..self.columns.len())
            .map(|col| self.get_at(col, pos))
            .collect();
        Ok(Record::new(key, values))
    }

    pub fn index(&self, col: usize) -> Option<&SearchIndex> {
        self.indexes.get(col).and_then(|i| i.as_deref())
    }

    /// Live row whose primary key equals `value`
    pub fn find_by_primary_key(&self, schema: &TableSchema, value: &Value) -> Option<RowKey> {
        let col = schema.primary_key_index()?;
        self.index(col)?
            .find(value)
            .into_iter()
            .find(|k| !self.tombstones.contains(k))
    }

    fn check_unique(&self, schema: &TableSchema, col: usize, value: &Value, except: Option<RowKey>) -> RecordResult<()> {
        if schema.primary_key_index() != Some(col) {
            return Ok(());
        }
        let taken = self
            .index(col)
            .map(|index| {
                index
                    .find(value)
                    .into_iter()
                    .any(|k| Some(k) != except && !self.tombstones.contains(&k))
            })
            .unwrap_or(false);
        if taken {
            return Err(RecordError::DuplicatePrimaryKey {
                table: schema.name().to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    /// Append a row. `values` holds one value per column.
    pub fn insert(&mut self, schema: &TableSchema, values: Vec<Value>) -> RecordResult<RowKey> {
        if values.len() != self.columns.len() {
            return Err(RecordError::InvalidSchema(format!(
                "{} expects {} values, got {}",
                schema.name(),
                self.columns.len(),
                values.len()
            )));
        }
        for (col, value) in values.iter().enumerate() {
            let def = column_def(schema, col)?;
            def.check_value(value)?;
            self.check_unique(schema, col, value, None)?;
        }

        let key = RowKey(self.next_key);
        self.keys.push(Value::Int(key.0 as i64))?;
        for (col, value) in values.into_iter().enumerate() {
            if let Some(index) = self.indexes.get_mut(col).and_then(|i| i.as_mut()) {
                Arc::make_mut(index).insert(&value, key)?;
            }
            self.columns[col].push(value)?;
        }
        self.next_key += 1;
        self.stored = None;
        Ok(key)
    }

    /// Overwrite one value and return the previous one
    pub fn set(&mut self, schema: &TableSchema, col: usize, key: RowKey, value: Value) -> RecordResult<Value> {
        let pos = self.live_position(schema, key)?;
        let def = column_def(schema, col)?;
        def.check_value(&value)?;

        let old = self.get_at(col, pos);
        if schema.primary_key_index() == Some(col) && old != value {
            return Err(RecordError::PrimaryKeyImmutable(format!(
                "{}.{}",
                schema.name(),
                def.name
            )));
        }

        if let Some(index) = self.indexes.get_mut(col).and_then(|i| i.as_mut()) {
            let index = Arc::make_mut(index);
            index.remove(&old, key)?;
            index.insert(&value, key)?;
        }
        self.columns[col].set(pos, value)?;
        self.stored = None;
        Ok(old)
    }

    /// Tombstone a row. It disappears from reads and indexes immediately.
    pub fn delete(&mut self, schema: &TableSchema, key: RowKey) -> RecordResult<()> {
        let pos = self.live_position(schema, key)?;
        for col in 0..self.columns.len() {
            if self.indexes[col].is_some() {
                let value = self.get_at(col, pos);
                if let Some(index) = self.indexes[col].as_mut() {
                    Arc::make_mut(index).remove(&value, key)?;
                }
            }
        }
        self.tombstones.insert(key);
        self.stored = None;
        Ok(())
    }

    /// Physically remove tombstoned rows
    pub fn compact(&mut self) -> RecordResult<()> {
        if self.tombstones.is_empty() {
            return Ok(());
        }
        let mut positions: Vec<usize> = self
            .tombstones
            .iter()
            .filter_map(|k| self.keys.find_key(k.0))
            .collect();
        positions.sort_unstable_by(|a, b| b.cmp(a));

        for pos in &positions {
            self.keys.remove(*pos)?;
            for column in &mut self.columns {
                column.remove(*pos)?;
            }
        }
        debug!(rows = positions.len(), "compacted tombstoned rows");
        self.tombstones.clear();
        self.stored = None;
        Ok(())
    }

    /// Add a column filled with the column default for every stored row
    pub fn add_column(&mut self, def: &ColumnDef) -> RecordResult<()> {
        let mut tree = ColumnTree::new(def.data_type);
        let default = def.default_value();
        for _ in 0..self.keys.len() {
            tree.push(default.clone())?;
        }
        self.columns.push(tree);
        self.indexes.push(None);
        if def.indexed {
            self.build_index(self.columns.len() - 1)?;
        }
        self.stored = None;
        Ok(())
    }

    pub fn remove_column(&mut self, col: usize) {
        if col < self.columns.len() {
            self.columns.remove(col);
            self.indexes.remove(col);
            self.stored = None;
        }
    }

    /// (Re)build the index of `col` from the column data
    pub fn build_index(&mut self, col: usize) -> RecordResult<()> {
        let Some(column) = self.columns.get(col) else {
            return Ok(());
        };
        let live = (0..self.keys.len()).filter_map(|pos| {
            let key = self.key_at(pos)?;
            (!self.tombstones.contains(&key)).then(|| (key, column.get(pos).unwrap_or(Value::Null)))
        });
        let index = SearchIndex::build(live)?;
        self.indexes[col] = Some(Arc::new(index));
        Ok(())
    }

    pub fn drop_index(&mut self, col: usize) {
        if let Some(slot) = self.indexes.get_mut(col) {
            *slot = None;
        }
    }

    /// Write changed columns and the table header. Tombstones must have been
    /// compacted away.
    pub fn persist(&mut self, store: &PageStore) -> RecordResult<PageRef> {
        if let Some(extent) = self.stored
            && !self.keys.is_dirty()
            && self.columns.iter().all(|c| !c.is_dirty())
        {
            return Ok(extent);
        }
        self.compact()?;

        let mut w = ByteWriter::new();
        w.u64(self.next_key);
        w.page_ref(self.keys.persist(store)?);
        w.u32(self.columns.len() as u32);
        for column in &mut self.columns {
            w.page_ref(column.persist(store)?);
        }
        let extent = store.write_new(&w.finish())?;
        self.stored = Some(extent);
        Ok(extent)
    }

    /// Load a table written by [`Table::persist`] and rebuild its indexes
    pub fn load(store: &PageStore, extent: PageRef, schema: &TableSchema) -> RecordResult<Self> {
        let bytes = store.read_extent(extent)?;
        let mut r = ByteReader::new(&bytes);
        let next_key = r.u64()?;
        let keys = ColumnTree::load(store, r.page_ref()?, None)?;
        let count = r.u32()? as usize;
        if count != schema.column_count() {
            return Err(RecordError::Deserialization(format!(
                "table {} has {} stored columns, schema lists {}",
                schema.name(),
                count,
                schema.column_count()
            )));
        }

        let mut columns = Vec::with_capacity(count);
        for def in schema.columns() {
            let column = ColumnTree::load(store, r.page_ref()?, Some(def.data_type))?;
            if column.len() != keys.len() {
                return Err(RecordError::Deserialization(format!(
                    "column {}.{} has {} rows, expected {}",
                    schema.name(),
                    def.name,
                    column.len(),
                    keys.len()
                )));
            }
            columns.push(column);
        }

        let mut table = Self {
            keys,
            columns,
            next_key,
            tombstones: AHashSet::new(),
            indexes: vec![None; count],
            stored: Some(extent),
        };
        for (col, def) in schema.columns().iter().enumerate() {
            if def.indexed {
                table.build_index(col)?;
            }
        }
        Ok(table)
    }

    /// Copy with live rows only and no ties to any store, so that persisting
    /// it writes every node afresh
    pub fn detached(&self) -> RecordResult<Self> {
        let mut copy = self.clone();
        copy.compact()?;

        let mut keys = ColumnTree::new_keys();
        for key in copy.keys.values() {
            keys.push(key)?;
        }
        let mut columns = Vec::with_capacity(copy.columns.len());
        for column in &copy.columns {
            let mut fresh = match column.data_type() {
                Some(dt) => ColumnTree::new(dt),
                None => ColumnTree::new_keys(),
            };
            for value in column.values() {
                fresh.push(value)?;
            }
            columns.push(fresh);
        }

        Ok(Self {
            keys,
            columns,
            next_key: copy.next_key,
            tombstones: AHashSet::new(),
            indexes: copy.indexes,
            stored: None,
        })
    }

    /// Every extent reachable from this table
    pub fn collect_extents(&self, out: &mut AHashSet<PageRef>) {
        out.extend(self.stored);
        self.keys.collect_extents(out);
        for column in &self.columns {
            column.collect_extents(out);
        }
    }

    /// Live values of a link or link-list column that point at `target`
    pub fn rows_linking_to(&self, col: usize, target: RowKey) -> Vec<RowKey> {
        let mut out = Vec::new();
        let Some(column) = self.columns.get(col) else {
            return out;
        };
        if !matches!(column.data_type(), Some(DataType::Link | DataType::LinkList)) {
            return out;
        }
        for pos in 0..self.keys.len() {
            let Some(key) = self.key_at(pos) else { continue };
            if self.tombstones.contains(&key) {
                continue;
            }
            let hit = match column.get(pos) {
                Some(Value::Link(k)) => k == target,
                Some(Value::LinkList(list)) => list.contains(&target),
                _ => false,
            };
            if hit {
                out.push(key);
            }
        }
        out
    }
}

fn column_def(schema: &TableSchema, col: usize) -> RecordResult<&ColumnDef> {
    schema.column(col).ok_or_else(|| RecordError::ColumnNotFound {
        table: schema.name().to_string(),
        column: format!("#{}", col),
    })
}
