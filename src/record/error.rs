use super::record::RowKey;
use crate::file::FileError;
use crate::index::IndexError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Column not found: {table}.{column}")]
    ColumnNotFound { table: String, column: String },

    #[error("Table already exists: {0}")]
    DuplicateTable(String),

    #[error("Column already exists: {table}.{column}")]
    DuplicateColumn { table: String, column: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid row key {key} in table {table}")]
    InvalidRowKey { table: String, key: RowKey },

    #[error("Type mismatch for {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("NULL value for NOT NULL column: {0}")]
    NullConstraintViolation(String),

    #[error("Duplicate primary key {value} in table {table}")]
    DuplicatePrimaryKey { table: String, value: String },

    #[error("Table {0} has a primary key; create rows with a primary key value")]
    PrimaryKeyRequired(String),

    #[error("Primary key column {0} cannot be changed")]
    PrimaryKeyImmutable(String),

    #[error("Column {column} is not indexable ({data_type})")]
    NotIndexable { column: String, data_type: String },

    #[error("Link {column} points to missing row {key}")]
    InvalidLink { column: String, key: RowKey },

    #[error("Row {key} in {table} is still linked from {column}")]
    LinkViolation {
        table: String,
        key: RowKey,
        column: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RecordResult<T> = Result<T, RecordError>;
