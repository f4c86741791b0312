use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::error::DatabaseResult;
use super::transaction::WriteTransaction;
use crate::file::{DEFAULT_PAGE_SIZE, PAGE_CACHE_SIZE, StoreOptions};
use crate::record::Schema;

/// Called once inside a write transaction with `(old_version, new_version)`
/// when the stored schema is older than the requested one
pub type MigrationFn =
    Arc<dyn Fn(&mut WriteTransaction, u64, u64) -> DatabaseResult<()> + Send + Sync>;

/// Decides on open whether to compact, given `(file_bytes, used_bytes)`
pub type CompactPredicate = Arc<dyn Fn(u64, u64) -> bool + Send + Sync>;

/// Everything needed to open a database. There is no process-wide default:
/// each handle is opened from an explicit value.
#[derive(Clone)]
pub struct Config {
    pub(crate) path: Option<PathBuf>,
    pub(crate) schema: Option<Schema>,
    pub(crate) migration: Option<MigrationFn>,
    pub(crate) delete_if_migration_needed: bool,
    pub(crate) read_only: bool,
    pub(crate) page_size: usize,
    pub(crate) cache_extents: usize,
    pub(crate) max_file_size: Option<u64>,
    pub(crate) writer_timeout: Option<Duration>,
    pub(crate) compact_on_open: Option<CompactPredicate>,
    pub(crate) sync_node: Option<u64>,
}

impl Config {
    /// Database stored in the file at `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::in_memory()
        }
    }

    /// Database that lives only as long as its handles
    pub fn in_memory() -> Self {
        Self {
            path: None,
            schema: None,
            migration: None,
            delete_if_migration_needed: false,
            read_only: false,
            page_size: DEFAULT_PAGE_SIZE,
            cache_extents: PAGE_CACHE_SIZE,
            max_file_size: None,
            writer_timeout: None,
            compact_on_open: None,
            sync_node: None,
        }
    }

    /// Schema the application expects; its version is stored in the file
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_migration<F>(mut self, migration: F) -> Self
    where
        F: Fn(&mut WriteTransaction, u64, u64) -> DatabaseResult<()> + Send + Sync + 'static,
    {
        self.migration = Some(Arc::new(migration));
        self
    }

    /// Delete and recreate the file instead of failing when the stored
    /// schema differs and no migration is configured
    pub fn delete_if_migration_needed(mut self) -> Self {
        self.delete_if_migration_needed = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Number of extents held in the page cache
    pub fn with_cache_size(mut self, extents: usize) -> Self {
        self.cache_extents = extents;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Make `begin_write` give up with `WouldBlock` after waiting this long
    pub fn with_writer_timeout(mut self, timeout: Duration) -> Self {
        self.writer_timeout = Some(timeout);
        self
    }

    pub fn with_compact_on_open<F>(mut self, predicate: F) -> Self
    where
        F: Fn(u64, u64) -> bool + Send + Sync + 'static,
    {
        self.compact_on_open = Some(Arc::new(predicate));
        self
    }

    /// Record local changes for sync, identifying this replica as `node`
    pub fn with_sync_node(mut self, node: u64) -> Self {
        self.sync_node = Some(node);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    pub(crate) fn store_options(&self) -> StoreOptions {
        StoreOptions {
            page_size: self.page_size,
            cache_extents: self.cache_extents,
            max_file_size: self.max_file_size,
            read_only: self.read_only,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("schema_version", &self.schema.as_ref().map(Schema::version))
            .field("migration", &self.migration.is_some())
            .field("delete_if_migration_needed", &self.delete_if_migration_needed)
            .field("read_only", &self.read_only)
            .field("page_size", &self.page_size)
            .field("cache_extents", &self.cache_extents)
            .field("max_file_size", &self.max_file_size)
            .field("writer_timeout", &self.writer_timeout)
            .field("sync_node", &self.sync_node)
            .finish()
    }
}
