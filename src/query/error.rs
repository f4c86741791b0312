use thiserror::Error;

use crate::record::RecordError;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

pub type QueryResult<T> = Result<T, QueryError>;
