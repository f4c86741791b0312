use thiserror::Error;

use crate::file::FileError;
use crate::query::QueryError;
use crate::record::RecordError;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Write transaction is no longer open")]
    NotInTransaction,

    #[error("Another write transaction is open")]
    WouldBlock,

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Database is opened read-only")]
    ReadOnly,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sync error: {0}")]
    Sync(String),
}

impl DatabaseError {
    /// Whether the error means the file content cannot be trusted
    pub fn is_corruption(&self) -> bool {
        match self {
            DatabaseError::File(e) => e.is_corruption(),
            DatabaseError::Record(RecordError::File(e)) => e.is_corruption(),
            DatabaseError::Record(RecordError::Deserialization(_) | RecordError::Json(_)) => true,
            _ => false,
        }
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
