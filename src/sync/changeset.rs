//! Instructions exchanged between replicas.
//!
//! Objects are addressed by table name and primary key, never by row key,
//! since row keys are local to one file.

use serde::{Deserialize, Serialize};

use super::clock::LogicalClock;
use crate::database::{DatabaseError, DatabaseResult};
use crate::record::{Timestamp, Value};

/// Scalar value carried by an instruction. Links are local and never synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SyncValue {
    Null,
    Int(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Timestamp(Timestamp),
}

impl SyncValue {
    /// Convert a stored value; links yield `None`
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Null => SyncValue::Null,
            Value::Int(v) => SyncValue::Int(*v),
            Value::Bool(v) => SyncValue::Bool(*v),
            Value::Float(v) => SyncValue::Float(*v),
            Value::Double(v) => SyncValue::Double(*v),
            Value::String(v) => SyncValue::String(v.clone()),
            Value::Binary(v) => SyncValue::Binary(v.clone()),
            Value::Timestamp(v) => SyncValue::Timestamp(*v),
            Value::Link(_) | Value::LinkList(_) => return None,
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            SyncValue::Null => Value::Null,
            SyncValue::Int(v) => Value::Int(*v),
            SyncValue::Bool(v) => Value::Bool(*v),
            SyncValue::Float(v) => Value::Float(*v),
            SyncValue::Double(v) => Value::Double(*v),
            SyncValue::String(v) => Value::String(v.clone()),
            SyncValue::Binary(v) => Value::Binary(v.clone()),
            SyncValue::Timestamp(v) => Value::Timestamp(*v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// Create the object if it does not exist yet
    CreateObject { table: String, pk: SyncValue },
    /// Last-writer-wins field assignment
    Set {
        table: String,
        pk: SyncValue,
        column: String,
        value: SyncValue,
        clock: LogicalClock,
    },
    /// Commutative counter increment
    AddInteger {
        table: String,
        pk: SyncValue,
        column: String,
        delta: i64,
    },
    EraseObject { table: String, pk: SyncValue },
}

impl Instruction {
    pub fn table(&self) -> &str {
        match self {
            Instruction::CreateObject { table, .. }
            | Instruction::Set { table, .. }
            | Instruction::AddInteger { table, .. }
            | Instruction::EraseObject { table, .. } => table,
        }
    }
}

/// Instructions of one committed write transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    /// Replica that produced the changes
    pub node: u64,
    /// Version the changes were committed as on that replica
    pub version: u64,
    pub instructions: Vec<Instruction>,
}

impl Changeset {
    pub fn to_json(&self) -> DatabaseResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DatabaseError::Sync(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> DatabaseResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| DatabaseError::Sync(e.to_string()))
    }
}
