use thiserror::Error;

use crate::btree::BPlusTreeError;

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("B+ tree error: {0}")]
    BPlusTreeError(#[from] BPlusTreeError),

    #[error("Value of type {0} cannot be indexed")]
    NotIndexable(String),
}
