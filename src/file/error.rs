use std::io;
use thiserror::Error;

use super::PageId;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Page out of range: page_id={0}")]
    PageOutOfRange(PageId),

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Out of space: requested {requested} bytes, limit is {limit} bytes")]
    OutOfSpace { requested: u64, limit: u64 },

    #[error("Corrupt file: {0}")]
    CorruptFile(String),

    #[error("Checksum mismatch in extent at page {0}")]
    ChecksumMismatch(PageId),

    #[error("Version {0} is no longer retained")]
    VersionUnavailable(u64),

    #[error("File is locked by another writer: {0}")]
    Locked(String),

    #[error("File was opened read-only")]
    ReadOnly,
}

impl FileError {
    /// True for errors that mean the on-disk bytes cannot be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(self, FileError::CorruptFile(_) | FileError::ChecksumMismatch(_))
    }
}

pub type FileResult<T> = Result<T, FileError>;
