use std::ops::Deref;
use std::sync::Arc;

use ahash::AHashSet;
use tracing::{debug, error, info};

use super::error::{DatabaseError, DatabaseResult};
use super::snapshot::Snapshot;
use super::{Shared, WriterGuard};
use crate::file::{FileError, PageRef, PageStore};
use crate::record::{
    ColumnDef, ColumnHandle, ColumnValue, DataType, LinkPolicy, RecordError, RowKey, Schema,
    TableSchema, Value,
};
use crate::sync::{self, Changeset, Instruction, SyncValue};
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

/// The single write transaction of a database.
///
/// Mutations go to a private copy-on-write snapshot and become visible to
/// readers only when [`commit`](WriteTransaction::commit) publishes it.
/// Reads through `Deref` see the transaction's own uncommitted changes.
/// Dropping an open transaction rolls it back.
pub struct WriteTransaction {
    shared: Arc<Shared>,
    store: Arc<PageStore>,
    base: Arc<Snapshot>,
    working: Snapshot,
    state: TransactionState,
    changed: bool,
    /// Log changes as sync instructions
    recording: bool,
    instructions: Vec<Instruction>,
    guard: Option<WriterGuard>,
}

impl WriteTransaction {
    pub(crate) fn new(
        shared: Arc<Shared>,
        store: Arc<PageStore>,
        base: Arc<Snapshot>,
        guard: WriterGuard,
    ) -> Self {
        let recording = shared.sync.is_some();
        Self {
            shared,
            store,
            working: Snapshot::clone(&base),
            base,
            state: TransactionState::Open,
            changed: false,
            recording,
            instructions: Vec::new(),
            guard: Some(guard),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Version this transaction started from
    pub fn base_version(&self) -> u64 {
        self.base.version
    }

    pub(crate) fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    fn check_open(&self) -> DatabaseResult<()> {
        match self.state {
            TransactionState::Open => Ok(()),
            _ => Err(DatabaseError::NotInTransaction),
        }
    }

    fn table_mut(&mut self, idx: usize) -> DatabaseResult<(&TableSchema, &mut Table)> {
        self.working
            .table_mut(idx)
            .ok_or_else(|| RecordError::TableNotFound(format!("#{}", idx)).into())
    }

    fn table_schema_at(&self, idx: usize) -> DatabaseResult<&TableSchema> {
        self.working
            .schema
            .table_at(idx)
            .ok_or_else(|| RecordError::TableNotFound(format!("#{}", idx)).into())
    }

    /// Every key a link value points at must be a live row of the target
    fn check_links(&self, def: &ColumnDef, value: &Value) -> DatabaseResult<()> {
        let Some(target) = def.link_target.as_deref() else {
            return Ok(());
        };
        let keys: &[RowKey] = match value {
            Value::Link(key) => std::slice::from_ref(key),
            Value::LinkList(keys) => keys,
            _ => return Ok(()),
        };
        let target_idx = self.working.table_index(target)?;
        let Some(data) = self.working.table_data(target_idx) else {
            return Err(RecordError::TableNotFound(target.to_string()).into());
        };
        for key in keys {
            if !data.contains(*key) {
                return Err(RecordError::InvalidLink {
                    column: def.name.clone(),
                    key: *key,
                }
                .into());
            }
        }
        Ok(())
    }

    // Rows

    /// Add a row with default values. Tables with a primary key need
    /// [`insert_row_with_primary_key`](Self::insert_row_with_primary_key).
    pub fn insert_row(&mut self, table: &str) -> DatabaseResult<RowKey> {
        self.check_open()?;
        let ts = self.working.table_schema(table)?;
        if ts.primary_key().is_some() {
            return Err(RecordError::PrimaryKeyRequired(table.to_string()).into());
        }
        let values = ts.columns().iter().map(ColumnDef::default_value).collect();
        self.create_row(table, values)
    }

    /// Add a row with defaults everywhere except the primary key
    pub fn insert_row_with_primary_key(
        &mut self,
        table: &str,
        pk: impl Into<Value>,
    ) -> DatabaseResult<RowKey> {
        self.check_open()?;
        let ts = self.working.table_schema(table)?;
        let Some(pk_idx) = ts.primary_key_index() else {
            return Err(RecordError::InvalidSchema(format!("table {} has no primary key", table)).into());
        };
        let mut values: Vec<Value> = ts.columns().iter().map(ColumnDef::default_value).collect();
        values[pk_idx] = pk.into();
        self.create_row(table, values)
    }

    /// Add a row with one value per column
    pub fn create_row(&mut self, table: &str, values: Vec<Value>) -> DatabaseResult<RowKey> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        let ts = self.table_schema_at(idx)?;
        for (def, value) in ts.columns().iter().zip(&values) {
            self.check_links(def, value)?;
        }

        let key = {
            let (ts, data) = self.table_mut(idx)?;
            data.insert(ts, values)?
        };
        self.changed = true;
        self.record_create(idx, key)?;
        Ok(key)
    }

    /// Add a row, or overwrite the row that already has the same primary key.
    ///
    /// `values` holds one value per column. On update, columns whose value is
    /// unchanged are not written.
    pub fn insert_or_update(&mut self, table: &str, values: Vec<Value>) -> DatabaseResult<RowKey> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        let ts = self.table_schema_at(idx)?;
        let Some(pk_idx) = ts.primary_key_index() else {
            return Err(RecordError::InvalidSchema(format!("table {} has no primary key", table)).into());
        };
        if values.len() != ts.columns().len() {
            return Err(RecordError::InvalidSchema(format!(
                "{} expects {} values, got {}",
                table,
                ts.columns().len(),
                values.len()
            ))
            .into());
        }
        let Some(key) = self.working.find_by_primary_key(table, values[pk_idx].clone())? else {
            return self.create_row(table, values);
        };

        for (col, value) in values.into_iter().enumerate() {
            if col == pk_idx {
                continue;
            }
            let current = match (self.working.schema.table_at(idx), self.working.table_data(idx)) {
                (Some(ts), Some(data)) => data.get(ts, col, key)?,
                _ => return Err(RecordError::TableNotFound(table.to_string()).into()),
            };
            if current != value {
                self.set_at(idx, key, col, value)?;
            }
        }
        debug!(table, key = %key, "updated existing row by primary key");
        Ok(key)
    }

    pub fn set(
        &mut self,
        table: &str,
        key: RowKey,
        column: &str,
        value: impl Into<Value>,
    ) -> DatabaseResult<()> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        let col = self.table_schema_at(idx)?.column_index(column)?;
        self.set_at(idx, key, col, value.into())
    }

    /// Write through a typed handle
    pub fn set_typed<T: ColumnValue>(
        &mut self,
        handle: &ColumnHandle<T>,
        key: RowKey,
        value: T,
    ) -> DatabaseResult<()> {
        self.check_open()?;
        handle.check(&self.working.schema)?;
        self.set_at(handle.table(), key, handle.column(), value.into_value())
    }

    fn set_at(&mut self, idx: usize, key: RowKey, col: usize, value: Value) -> DatabaseResult<()> {
        let ts = self.table_schema_at(idx)?;
        let def = ts.column(col).ok_or_else(|| RecordError::ColumnNotFound {
            table: ts.name().to_string(),
            column: format!("#{}", col),
        })?;
        self.check_links(def, &value)?;

        {
            let (ts, data) = self.table_mut(idx)?;
            data.set(ts, col, key, value)?;
        }
        self.changed = true;
        self.record_set(idx, key, col)
    }

    /// Delete a row, applying the delete policy of every link pointing at it
    pub fn delete_row(&mut self, table: &str, key: RowKey) -> DatabaseResult<()> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        if !self.working.is_valid(table, key) {
            return Err(RecordError::InvalidRowKey {
                table: table.to_string(),
                key,
            }
            .into());
        }
        self.delete_with_policies(idx, key)
    }

    /// Delete every row of a table
    pub fn clear_table(&mut self, table: &str) -> DatabaseResult<()> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        for key in self.working.keys(table)? {
            // Cascades may already have removed it
            if self.working.is_valid(table, key) {
                self.delete_with_policies(idx, key)?;
            }
        }
        Ok(())
    }

    fn delete_with_policies(&mut self, idx: usize, key: RowKey) -> DatabaseResult<()> {
        let schema = Arc::clone(&self.working.schema);
        let name_of = |t: usize| schema.table_at(t).map(TableSchema::name).unwrap_or_default();

        // First pass: find everything a cascade takes along, fail on Forbid
        let mut doomed = vec![(idx, key)];
        let mut seen: AHashSet<(usize, RowKey)> = doomed.iter().copied().collect();
        let mut next = 0;
        while next < doomed.len() {
            let (t, k) = doomed[next];
            next += 1;
            let target = name_of(t);
            for (src, src_schema) in schema.tables().iter().enumerate() {
                for (col, def) in src_schema.columns().iter().enumerate() {
                    if def.link_target.as_deref() != Some(target) {
                        continue;
                    }
                    for holder in self.working.tables[src].rows_linking_to(col, k) {
                        if seen.contains(&(src, holder)) {
                            continue;
                        }
                        let violation = || -> DatabaseError {
                            RecordError::LinkViolation {
                                table: target.to_string(),
                                key: k,
                                column: format!("{}.{}", src_schema.name(), def.name),
                            }
                            .into()
                        };
                        match def.on_delete {
                            LinkPolicy::Forbid => return Err(violation()),
                            LinkPolicy::Nullify
                                if def.data_type == DataType::Link && !def.nullable =>
                            {
                                return Err(violation());
                            }
                            LinkPolicy::Nullify => {}
                            LinkPolicy::Cascade => {
                                seen.insert((src, holder));
                                doomed.push((src, holder));
                            }
                        }
                    }
                }
            }
        }

        // Second pass: tombstone, then clear the links left pointing at them
        for &(t, k) in &doomed {
            self.record_erase(t, k)?;
            let (ts, data) = self.table_mut(t)?;
            data.delete(ts, k)?;
        }
        for &(t, k) in &doomed {
            let target = name_of(t);
            for (src, src_schema) in schema.tables().iter().enumerate() {
                for (col, def) in src_schema.columns().iter().enumerate() {
                    if def.link_target.as_deref() != Some(target) {
                        continue;
                    }
                    let holders = self.working.tables[src].rows_linking_to(col, k);
                    for holder in holders {
                        let (ts, data) = self.table_mut(src)?;
                        let cleared = match data.get(ts, col, holder)? {
                            Value::LinkList(mut keys) => {
                                keys.retain(|x| *x != k);
                                Value::LinkList(keys)
                            }
                            _ => Value::Null,
                        };
                        data.set(ts, col, holder, cleared)?;
                    }
                }
            }
        }

        self.changed = true;
        if doomed.len() > 1 {
            debug!(rows = doomed.len(), "delete cascaded");
        }
        Ok(())
    }

    /// Append `target` to a link list
    pub fn add_link(&mut self, table: &str, key: RowKey, column: &str, target: RowKey) -> DatabaseResult<()> {
        let mut keys = self.working.link_list(table, key, column)?;
        keys.push(target);
        self.set(table, key, column, Value::LinkList(keys))
    }

    /// Remove the first occurrence of `target` from a link list
    pub fn remove_link(&mut self, table: &str, key: RowKey, column: &str, target: RowKey) -> DatabaseResult<bool> {
        let mut keys = self.working.link_list(table, key, column)?;
        let Some(pos) = keys.iter().position(|k| *k == target) else {
            return Ok(false);
        };
        keys.remove(pos);
        self.set(table, key, column, Value::LinkList(keys))?;
        Ok(true)
    }

    /// Add `delta` to an int column and return the new value
    pub fn add_to_counter(&mut self, table: &str, key: RowKey, column: &str, delta: i64) -> DatabaseResult<i64> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        let ts = self.table_schema_at(idx)?;
        let col = ts.column_index(column)?;
        let counter = ts.columns()[col].counter;
        let current = match self.working.get(table, key, column)? {
            Value::Int(v) => v,
            Value::Null => 0,
            other => {
                return Err(RecordError::TypeMismatch {
                    column: format!("{}.{}", table, column),
                    expected: DataType::Int.to_string(),
                    actual: other.type_name(),
                }
                .into());
            }
        };
        let updated = current.wrapping_add(delta);

        {
            let (ts, data) = self.table_mut(idx)?;
            data.set(ts, col, key, Value::Int(updated))?;
        }
        self.changed = true;
        if counter {
            self.record_add(idx, key, col, delta)?;
        } else {
            self.record_set(idx, key, col)?;
        }
        Ok(updated)
    }

    // Schema

    /// Validated copy of the schema with `f` applied
    fn next_schema(&self, f: impl FnOnce(&mut Schema) -> DatabaseResult<()>) -> DatabaseResult<Schema> {
        let mut next = Schema::clone(&self.working.schema);
        f(&mut next)?;
        next.validate()?;
        Ok(next)
    }

    fn install_schema(&mut self, schema: Schema) {
        self.working.schema = Arc::new(schema);
        self.changed = true;
    }

    pub fn add_table(&mut self, table: TableSchema) -> DatabaseResult<()> {
        self.add_tables(vec![table])
    }

    /// Add several tables at once; they may link to each other
    pub fn add_tables(&mut self, tables: Vec<TableSchema>) -> DatabaseResult<()> {
        self.check_open()?;
        let next = self.next_schema(|s| {
            for table in &tables {
                if s.find_table(table.name()).is_some() {
                    return Err(RecordError::DuplicateTable(table.name().to_string()).into());
                }
                s.tables_mut().push(table.clone());
            }
            Ok(())
        })?;
        for table in &tables {
            self.working.tables.push(Arc::new(Table::new(table)));
            info!(table = table.name(), "added table");
        }
        self.install_schema(next);
        Ok(())
    }

    /// Remove a table and its rows. Fails while other tables link to it.
    pub fn remove_table(&mut self, name: &str) -> DatabaseResult<()> {
        self.check_open()?;
        let idx = self.working.table_index(name)?;
        let next = self.next_schema(|s| {
            s.tables_mut().remove(idx);
            Ok(())
        })?;
        self.working.tables.remove(idx);
        self.install_schema(next);
        info!(table = name, "removed table");
        Ok(())
    }

    /// Append a column; existing rows get the column default
    pub fn add_column(&mut self, table: &str, def: ColumnDef) -> DatabaseResult<usize> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        let next = self.next_schema(|s| {
            let ts = &mut s.tables_mut()[idx];
            if ts.find_column(&def.name).is_some() {
                return Err(RecordError::DuplicateColumn {
                    table: table.to_string(),
                    column: def.name.clone(),
                }
                .into());
            }
            ts.columns_mut().push(def.clone());
            Ok(())
        })?;
        let (_, data) = self.table_mut(idx)?;
        data.add_column(&def)?;
        self.install_schema(next);
        debug!(table, column = %def.name, "added column");
        Ok(self.table_schema_at(idx)?.column_count() - 1)
    }

    pub fn remove_column(&mut self, table: &str, column: &str) -> DatabaseResult<()> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        let col = self.table_schema_at(idx)?.column_index(column)?;
        let next = self.next_schema(|s| {
            let ts = &mut s.tables_mut()[idx];
            if ts.primary_key_index() == Some(col) {
                return Err(RecordError::InvalidSchema(format!(
                    "cannot remove primary key column {}.{}",
                    table, column
                ))
                .into());
            }
            ts.columns_mut().remove(col);
            Ok(())
        })?;
        let (_, data) = self.table_mut(idx)?;
        data.remove_column(col);
        self.install_schema(next);
        Ok(())
    }

    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> DatabaseResult<()> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        let col = self.table_schema_at(idx)?.column_index(from)?;
        let next = self.next_schema(|s| {
            let ts = &mut s.tables_mut()[idx];
            if ts.find_column(to).is_some() {
                return Err(RecordError::DuplicateColumn {
                    table: table.to_string(),
                    column: to.to_string(),
                }
                .into());
            }
            if ts.primary_key_index() == Some(col) {
                ts.set_primary_key(Some(to.to_string()));
            }
            ts.columns_mut()[col].name = to.to_string();
            Ok(())
        })?;
        self.install_schema(next);
        Ok(())
    }

    pub fn add_index(&mut self, table: &str, column: &str) -> DatabaseResult<()> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        let col = self.table_schema_at(idx)?.column_index(column)?;
        let next = self.next_schema(|s| {
            s.tables_mut()[idx].columns_mut()[col].indexed = true;
            Ok(())
        })?;
        let (_, data) = self.table_mut(idx)?;
        data.build_index(col)?;
        self.install_schema(next);
        Ok(())
    }

    pub fn remove_index(&mut self, table: &str, column: &str) -> DatabaseResult<()> {
        self.check_open()?;
        let idx = self.working.table_index(table)?;
        let col = self.table_schema_at(idx)?.column_index(column)?;
        let next = self.next_schema(|s| {
            let ts = &mut s.tables_mut()[idx];
            if ts.primary_key_index() == Some(col) {
                return Err(RecordError::InvalidSchema(format!(
                    "primary key {}.{} is always indexed",
                    table, column
                ))
                .into());
            }
            ts.columns_mut()[col].indexed = false;
            Ok(())
        })?;
        let (_, data) = self.table_mut(idx)?;
        data.drop_index(col);
        self.install_schema(next);
        Ok(())
    }

    pub(crate) fn set_schema_version(&mut self, version: u64) {
        if self.working.schema.version() != version {
            Arc::make_mut(&mut self.working.schema).set_version(version);
            self.changed = true;
        }
    }

    // Sync log

    fn primary_key_of(&self, idx: usize, key: RowKey) -> Option<(&TableSchema, usize, SyncValue)> {
        let ts = self.working.schema.table_at(idx)?;
        if ts.is_system() {
            return None;
        }
        let pk_idx = ts.primary_key_index()?;
        let value = self.working.table_data(idx)?.get(ts, pk_idx, key).ok()?;
        Some((ts, pk_idx, SyncValue::from_value(&value)?))
    }

    fn record_create(&mut self, idx: usize, key: RowKey) -> DatabaseResult<()> {
        if !self.recording {
            return Ok(());
        }
        let Some((ts, pk_idx, pk)) = self.primary_key_of(idx, key) else {
            return Ok(());
        };
        let columns = ts.column_count();
        let instruction = Instruction::CreateObject {
            table: ts.name().to_string(),
            pk,
        };
        self.instructions.push(instruction);
        for col in (0..columns).filter(|c| *c != pk_idx) {
            self.record_set(idx, key, col)?;
        }
        Ok(())
    }

    fn record_set(&mut self, idx: usize, key: RowKey, col: usize) -> DatabaseResult<()> {
        if !self.recording {
            return Ok(());
        }
        let Some(state) = self.shared.sync.clone() else {
            return Ok(());
        };
        let Some((ts, pk_idx, pk)) = self.primary_key_of(idx, key) else {
            return Ok(());
        };
        let Some(def) = ts.column(col).filter(|_| col != pk_idx) else {
            return Ok(());
        };
        let value = self.working.get(ts.name(), key, &def.name)?;
        let Some(value) = SyncValue::from_value(&value) else {
            return Ok(());
        };
        let table = ts.name().to_string();
        let column = def.name.clone();

        let clock = state.tick();
        sync::store_field_clock(self, &sync::field_key(&table, &pk, &column), clock)?;
        self.instructions.push(Instruction::Set {
            table,
            pk,
            column,
            value,
            clock,
        });
        Ok(())
    }

    fn record_add(&mut self, idx: usize, key: RowKey, col: usize, delta: i64) -> DatabaseResult<()> {
        if !self.recording {
            return Ok(());
        }
        let Some((ts, _, pk)) = self.primary_key_of(idx, key) else {
            return Ok(());
        };
        let Some(def) = ts.column(col) else {
            return Ok(());
        };
        let instruction = Instruction::AddInteger {
            table: ts.name().to_string(),
            pk,
            column: def.name.clone(),
            delta,
        };
        self.instructions.push(instruction);
        Ok(())
    }

    fn record_erase(&mut self, idx: usize, key: RowKey) -> DatabaseResult<()> {
        if !self.recording {
            return Ok(());
        }
        if let Some((ts, _, pk)) = self.primary_key_of(idx, key) {
            let instruction = Instruction::EraseObject {
                table: ts.name().to_string(),
                pk,
            };
            self.instructions.push(instruction);
        }
        Ok(())
    }

    // Commit

    /// Required links must point at live rows when the transaction commits
    fn check_required_links(&self) -> DatabaseResult<()> {
        let schema = &self.working.schema;
        for (idx, ts) in schema.tables().iter().enumerate() {
            for (col, def) in ts.columns().iter().enumerate() {
                if def.data_type != DataType::Link || def.nullable {
                    continue;
                }
                let Some(target) = def.link_target.as_deref() else { continue };
                let target_idx = schema.table_index(target)?;
                let (Some(data), Some(target_data)) =
                    (self.working.table_data(idx), self.working.table_data(target_idx))
                else {
                    continue;
                };
                for key in data.keys() {
                    match data.get(ts, col, key)? {
                        Value::Link(k) if target_data.contains(k) => {}
                        Value::Link(k) => {
                            return Err(RecordError::InvalidLink {
                                column: format!("{}.{}", ts.name(), def.name),
                                key: k,
                            }
                            .into());
                        }
                        _ => {
                            return Err(RecordError::NullConstraintViolation(format!(
                                "{}.{} (row {})",
                                ts.name(),
                                def.name,
                                key
                            ))
                            .into());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate, persist and publish the changes as a new version.
    ///
    /// On any failure the transaction ends rolled back and the previously
    /// published version stays current. A transaction without changes
    /// publishes nothing and returns the version it started from.
    pub fn commit(&mut self) -> DatabaseResult<u64> {
        self.check_open()?;
        let result = self.commit_changes();
        match &result {
            Ok(_) => self.state = TransactionState::Committed,
            Err(err) => {
                error!(error = %err, base = self.base.version, "commit failed");
                self.state = TransactionState::RolledBack;
                self.store.rollback();
            }
        }
        self.guard.take();
        result
    }

    fn commit_changes(&mut self) -> DatabaseResult<u64> {
        if !self.changed {
            return Ok(self.base.version);
        }
        self.working.schema.validate()?;
        self.check_required_links()?;

        let root = self.working.persist(&self.store).map_err(commit_failure)?;
        let old = self.base.collect_extents();
        let new = self.working.collect_extents();
        let freed: Vec<PageRef> = old.difference(&new).copied().collect();

        let shared = Arc::clone(&self.shared);
        let _publishing = shared.publishing.lock();
        let version = self
            .store
            .commit(Some(root), self.working.schema.version(), &freed)
            .map_err(|e| commit_failure(e.into()))?;
        let view = self.store.open_snapshot(version)?;
        self.working.version = version;
        self.working.view = Some(Arc::new(view));
        debug!(version, freed = freed.len(), "committed write transaction");

        let changeset = match (&self.shared.sync, self.instructions.is_empty()) {
            (Some(state), false) => Some(Changeset {
                node: state.node(),
                version,
                instructions: std::mem::take(&mut self.instructions),
            }),
            _ => None,
        };
        self.shared.publish(Arc::new(self.working.clone()), changeset);
        Ok(version)
    }

    /// Discard every change and release the writer lock
    pub fn rollback(&mut self) -> DatabaseResult<()> {
        self.check_open()?;
        self.abort();
        debug!(base = self.base.version, "rolled back write transaction");
        Ok(())
    }

    fn abort(&mut self) {
        self.state = TransactionState::RolledBack;
        self.store.rollback();
        self.guard.take();
    }
}

/// I/O trouble while writing becomes `CommitFailed`; running out of space
/// and validation errors keep their own kind
fn commit_failure(err: DatabaseError) -> DatabaseError {
    match err {
        DatabaseError::File(FileError::Io(e))
        | DatabaseError::Record(RecordError::File(FileError::Io(e))) => {
            DatabaseError::CommitFailed(e.to_string())
        }
        other => other,
    }
}

impl Deref for WriteTransaction {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.working
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Open {
            self.abort();
        }
    }
}

impl std::fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("base", &self.base.version)
            .field("state", &self.state)
            .field("changed", &self.changed)
            .finish()
    }
}
