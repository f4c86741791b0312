//! Sync merge layer.
//!
//! A sync-enabled database logs every local change to tables with a primary
//! key as [`Instruction`]s. A [`SyncSession`] replays changesets received
//! from other replicas through an ordinary write transaction:
//!
//! - `AddInteger` adds its delta, so concurrent increments commute
//! - `Set` wins only with a newer clock than the stored field clock
//! - `EraseObject` deletes the object; later sets on it are dropped
//! - `CreateObject` is idempotent
//!
//! Moving changesets between replicas is left to the application.

mod changeset;
mod clock;

pub use changeset::{Changeset, Instruction, SyncValue};
pub use clock::LogicalClock;

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::{Database, DatabaseError, DatabaseResult, WriteTransaction};
use crate::record::{ColumnDef, DataType, TableSchema, Value};

/// System table holding the clock of the last write to every synced field
pub const FIELD_CLOCK_TABLE: &str = "__sync_field_clocks";

/// Changesets kept in memory for other replicas to fetch
const MAX_HISTORY: usize = 4096;

pub(crate) fn field_clock_schema() -> TableSchema {
    TableSchema::new(
        FIELD_CLOCK_TABLE,
        vec![
            ColumnDef::new("field", DataType::String),
            ColumnDef::new("counter", DataType::Int),
            ColumnDef::new("node", DataType::Int),
        ],
    )
    .with_primary_key("field")
}

/// Row name of one field in [`FIELD_CLOCK_TABLE`]
pub(crate) fn field_key(table: &str, pk: &SyncValue, column: &str) -> String {
    format!("{}\u{1f}{}\u{1f}{}", table, pk.to_value(), column)
}

pub(crate) fn read_field_clock(txn: &WriteTransaction, field: &str) -> DatabaseResult<Option<LogicalClock>> {
    let Some(row) = txn.find_by_primary_key(FIELD_CLOCK_TABLE, field)? else {
        return Ok(None);
    };
    let counter = txn.get(FIELD_CLOCK_TABLE, row, "counter")?;
    let node = txn.get(FIELD_CLOCK_TABLE, row, "node")?;
    Ok(match (counter, node) {
        (Value::Int(counter), Value::Int(node)) => {
            Some(LogicalClock::with_counter(node as u64, counter as u64))
        }
        _ => None,
    })
}

pub(crate) fn store_field_clock(
    txn: &mut WriteTransaction,
    field: &str,
    clock: LogicalClock,
) -> DatabaseResult<()> {
    txn.insert_or_update(
        FIELD_CLOCK_TABLE,
        vec![
            Value::from(field),
            Value::Int(clock.counter as i64),
            Value::Int(clock.node_id as i64),
        ],
    )?;
    Ok(())
}

/// Per-database sync bookkeeping: the local clock and committed changesets
pub(crate) struct SyncState {
    node: u64,
    clock: Mutex<LogicalClock>,
    history: Mutex<Vec<Changeset>>,
}

impl SyncState {
    pub(crate) fn new(node: u64) -> Self {
        Self {
            node,
            clock: Mutex::new(LogicalClock::new(node)),
            history: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn node(&self) -> u64 {
        self.node
    }

    pub(crate) fn tick(&self) -> LogicalClock {
        self.clock.lock().tick()
    }

    fn observe(&self, remote: &LogicalClock) {
        self.clock.lock().merge(remote);
    }

    pub(crate) fn push(&self, changeset: Changeset) {
        let mut history = self.history.lock();
        history.push(changeset);
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(..excess);
        }
    }

    fn since(&self, version: u64) -> Vec<Changeset> {
        self.history
            .lock()
            .iter()
            .filter(|c| c.version > version)
            .cloned()
            .collect()
    }
}

/// Exchange point between a sync-enabled database and its peers
#[derive(Clone)]
pub struct SyncSession {
    db: Database,
    state: Arc<SyncState>,
}

impl SyncSession {
    /// Fails with `InvalidConfig` unless the database was opened with a
    /// sync node id
    pub fn new(db: &Database) -> DatabaseResult<Self> {
        let state = db.sync_state().ok_or_else(|| {
            DatabaseError::InvalidConfig("database was opened without a sync node".to_string())
        })?;
        Ok(Self {
            db: db.clone(),
            state,
        })
    }

    pub fn node_id(&self) -> u64 {
        self.state.node
    }

    /// Local changesets committed after `version`, oldest first
    pub fn changesets_since(&self, version: u64) -> Vec<Changeset> {
        self.state.since(version)
    }

    /// Merge a changeset from another replica and return the version it
    /// committed as
    pub fn integrate(&self, changeset: &Changeset) -> DatabaseResult<u64> {
        if changeset.node == self.state.node {
            return Err(DatabaseError::Sync(format!(
                "changeset {} originates from this replica",
                changeset.version
            )));
        }
        let mut txn = self.db.begin_write()?;
        txn.set_recording(false);
        for instruction in &changeset.instructions {
            self.apply(&mut txn, instruction)?;
        }
        let version = txn.commit()?;
        info!(
            node = changeset.node,
            remote_version = changeset.version,
            instructions = changeset.instructions.len(),
            version,
            "integrated changeset"
        );
        Ok(version)
    }

    fn apply(&self, txn: &mut WriteTransaction, instruction: &Instruction) -> DatabaseResult<()> {
        let table = instruction.table();
        if txn.schema().find_table(table).is_none() {
            return Err(DatabaseError::Sync(format!("unknown table {}", table)));
        }
        match instruction {
            Instruction::CreateObject { pk, .. } => {
                if txn.find_by_primary_key(table, pk.to_value())?.is_none() {
                    txn.insert_row_with_primary_key(table, pk.to_value())?;
                }
            }
            Instruction::Set {
                pk,
                column,
                value,
                clock,
                ..
            } => {
                self.state.observe(clock);
                let Some(row) = txn.find_by_primary_key(table, pk.to_value())? else {
                    debug!(table, column = %column, "dropping set on missing object");
                    return Ok(());
                };
                let field = field_key(table, pk, column);
                if read_field_clock(txn, &field)?.is_some_and(|stored| stored >= *clock) {
                    debug!(table, column = %column, "older write lost");
                    return Ok(());
                }
                txn.set(table, row, column, value.to_value())?;
                store_field_clock(txn, &field, *clock)?;
            }
            Instruction::AddInteger {
                pk, column, delta, ..
            } => {
                if let Some(row) = txn.find_by_primary_key(table, pk.to_value())? {
                    txn.add_to_counter(table, row, column, *delta)?;
                }
            }
            Instruction::EraseObject { pk, .. } => {
                if let Some(row) = txn.find_by_primary_key(table, pk.to_value())? {
                    txn.delete_row(table, row)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("node", &self.state.node)
            .finish()
    }
}
