//! Database handle and transactions.
//!
//! A [`Database`] owns one page store and publishes a sequence of immutable
//! [`Snapshot`]s. Readers pin a snapshot and never block; a single
//! [`WriteTransaction`] at a time builds the next snapshot and publishes it on
//! commit.

mod config;
mod error;
mod migration;
mod snapshot;
#[cfg(test)]
mod tests;
mod transaction;

pub use config::{CompactPredicate, Config, MigrationFn};
pub use error::{DatabaseError, DatabaseResult};
pub use snapshot::{Backlink, ReadTransaction, Snapshot};
pub use transaction::{TransactionState, WriteTransaction};

use parking_lot::{Condvar, Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::file::{
    FileError, LockFile, MIN_PAGE_SIZE, PageStore, SlotChoice, StoreOptions, StoreStats,
};
use crate::notify::{ChangeSet, Notifier, Subscription};
use crate::query::Query;
use crate::sync::{Changeset, SyncState};

/// State shared by every clone of a handle and its transactions
pub(crate) struct Shared {
    config: Config,
    store: RwLock<Arc<PageStore>>,
    latest: RwLock<Arc<Snapshot>>,
    /// Held from advancing the store's version until the matching snapshot
    /// is published
    publishing: Mutex<()>,
    /// Whether a write transaction is open in this process
    writer: Mutex<bool>,
    writer_released: Condvar,
    lock_file: Mutex<Option<LockFile>>,
    notifier: Notifier,
    pub(crate) sync: Option<Arc<SyncState>>,
}

impl Shared {
    /// Make `snapshot` the latest version and hand it to the dispatcher.
    /// Snapshots no newer than the current latest are ignored.
    pub(crate) fn publish(&self, snapshot: Arc<Snapshot>, changeset: Option<Changeset>) {
        {
            let mut latest = self.latest.write();
            if snapshot.version() <= latest.version() {
                debug!(
                    version = snapshot.version(),
                    latest = latest.version(),
                    "ignoring stale snapshot"
                );
                return;
            }
            *latest = Arc::clone(&snapshot);
        }
        if let (Some(sync), Some(changeset)) = (&self.sync, changeset) {
            sync.push(changeset);
        }
        self.notifier.publish(snapshot);
    }
}

/// Ownership of the writer slot; released on drop
pub(crate) struct WriterGuard {
    shared: Arc<Shared>,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.shared.lock_file.lock().as_mut()
            && let Err(err) = lock.unlock()
        {
            warn!(error = %err, "failed to release writer lock file");
        }
        *self.shared.writer.lock() = false;
        self.shared.writer_released.notify_one();
    }
}

/// Handle to an open database. Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Open or create the database described by `config`.
    ///
    /// When the config names a schema, the stored schema is reconciled with
    /// it: new files get the tables, older versions run the migration.
    pub fn open(config: Config) -> DatabaseResult<Self> {
        Self::open_slot(config, SlotChoice::Newest)
    }

    /// Like [`Database::open`], but fall back to the previously committed
    /// version when the newest one is corrupt
    pub fn open_with_recovery(config: Config) -> DatabaseResult<Self> {
        match Self::open_slot(config.clone(), SlotChoice::Newest) {
            Err(err) if err.is_corruption() && !config.is_in_memory() => {
                warn!(error = %err, "newest version unreadable, recovering previous one");
                Self::open_slot(config, SlotChoice::Previous)
            }
            other => other,
        }
    }

    fn open_slot(config: Config, slot: SlotChoice) -> DatabaseResult<Self> {
        check_config(&config)?;
        let mut store = open_store(&config, slot)?;
        let mut latest = Snapshot::load(store.open_latest()?)?;

        if migration::needs_reset(&latest, &config) {
            if let Some(path) = config.path() {
                warn!(path = %path.display(), "schema changed, deleting database file");
                drop(latest);
                drop(store);
                std::fs::remove_file(path).map_err(FileError::Io)?;
                store = open_store(&config, slot)?;
                latest = Snapshot::load(store.open_latest()?)?;
            }
        }

        let lock_file = match config.path() {
            Some(path) if !config.read_only => Some(LockFile::open_for(path)?),
            _ => None,
        };
        let sync = config.sync_node.map(|node| Arc::new(SyncState::new(node)));
        info!(
            path = ?config.path(),
            version = latest.version(),
            schema_version = latest.schema().version(),
            "opened database"
        );

        let db = Self {
            shared: Arc::new(Shared {
                store: RwLock::new(store),
                latest: RwLock::new(Arc::new(latest)),
                publishing: Mutex::new(()),
                writer: Mutex::new(false),
                writer_released: Condvar::new(),
                lock_file: Mutex::new(lock_file),
                notifier: Notifier::new().map_err(FileError::Io)?,
                sync,
                config,
            }),
        };
        migration::reconcile(&db)?;
        migration::compact_if_requested(&db)?;
        Ok(db)
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.shared.config.path()
    }

    pub(crate) fn store(&self) -> Arc<PageStore> {
        Arc::clone(&self.shared.store.read())
    }

    pub(crate) fn sync_state(&self) -> Option<Arc<SyncState>> {
        self.shared.sync.clone()
    }

    /// Latest published snapshot
    pub fn latest(&self) -> Arc<Snapshot> {
        Arc::clone(&self.shared.latest.read())
    }

    pub fn latest_version(&self) -> u64 {
        self.shared.latest.read().version()
    }

    /// Pin the latest version. Never blocks on writers.
    pub fn begin_read(&self) -> ReadTransaction {
        ReadTransaction::new(self.latest())
    }

    /// Pin a specific retained version
    pub fn begin_read_at(&self, version: u64) -> DatabaseResult<ReadTransaction> {
        let latest = self.latest();
        if latest.version() == version {
            return Ok(ReadTransaction::new(latest));
        }
        let view = self.store().open_snapshot(version)?;
        Ok(ReadTransaction::new(Arc::new(Snapshot::load(view)?)))
    }

    /// Start the write transaction, waiting for the current writer to finish.
    /// With a configured writer timeout the wait ends in `WouldBlock`.
    pub fn begin_write(&self) -> DatabaseResult<WriteTransaction> {
        self.start_write(true)
    }

    /// Start the write transaction or fail with `WouldBlock` right away
    pub fn try_begin_write(&self) -> DatabaseResult<WriteTransaction> {
        self.start_write(false)
    }

    fn start_write(&self, wait: bool) -> DatabaseResult<WriteTransaction> {
        let guard = self.acquire_writer(wait)?;
        // Another process may have committed since we last looked
        self.refresh()?;
        Ok(WriteTransaction::new(
            Arc::clone(&self.shared),
            self.store(),
            self.latest(),
            guard,
        ))
    }

    fn acquire_writer(&self, wait: bool) -> DatabaseResult<WriterGuard> {
        if self.shared.config.read_only {
            return Err(DatabaseError::ReadOnly);
        }
        {
            let mut busy = self.shared.writer.lock();
            if *busy && !wait {
                return Err(DatabaseError::WouldBlock);
            }
            let deadline = self.shared.config.writer_timeout.map(|t| Instant::now() + t);
            while *busy {
                match deadline {
                    Some(deadline) => {
                        let timed_out = self
                            .shared
                            .writer_released
                            .wait_until(&mut busy, deadline)
                            .timed_out();
                        if timed_out && *busy {
                            return Err(DatabaseError::WouldBlock);
                        }
                    }
                    None => self.shared.writer_released.wait(&mut busy),
                }
            }
            *busy = true;
        }
        let guard = WriterGuard {
            shared: Arc::clone(&self.shared),
        };

        if let Some(lock) = self.shared.lock_file.lock().as_mut() {
            if wait {
                lock.lock()?;
            } else {
                lock.try_lock().map_err(|err| match err {
                    FileError::Locked(_) => DatabaseError::WouldBlock,
                    other => other.into(),
                })?;
            }
        }
        Ok(guard)
    }

    /// Run `f` in a write transaction; commit on `Ok`, roll back on `Err`
    pub fn write<R>(
        &self,
        f: impl FnOnce(&mut WriteTransaction) -> DatabaseResult<R>,
    ) -> DatabaseResult<R> {
        let mut txn = self.begin_write()?;
        match f(&mut txn) {
            Ok(value) => {
                if txn.is_open() {
                    txn.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                if txn.is_open() {
                    txn.rollback()?;
                }
                Err(err)
            }
        }
    }

    /// Adopt versions other processes committed to the file. Returns whether
    /// a newer version was published.
    pub fn refresh(&self) -> DatabaseResult<bool> {
        let _publishing = self.shared.publishing.lock();
        let store = self.store();
        store.refresh()?;
        let version = store.version();
        if version <= self.latest_version() {
            return Ok(false);
        }
        let snapshot = Snapshot::load(store.open_snapshot(version)?)?;
        self.shared.publish(Arc::new(snapshot), None);
        Ok(true)
    }

    /// Call `listener` with the changes to `query`'s results after every
    /// commit that affects them. Listeners run on the dispatcher thread.
    pub fn subscribe<F>(&self, query: Query, listener: F) -> DatabaseResult<Subscription>
    where
        F: FnMut(&ChangeSet) + Send + 'static,
    {
        let baseline = self.latest();
        query.compile(baseline.schema())?;
        Ok(self.shared.notifier.subscribe(query, baseline, Box::new(listener)))
    }

    /// Block until every commit published so far has been delivered
    pub fn wait_for_notifications(&self) {
        self.shared.notifier.wait_idle();
    }

    /// Rewrite the file with live data only and switch to it.
    ///
    /// Needs the writer slot; readers keep their pinned snapshots, which stay
    /// readable from the replaced store.
    pub fn compact(&self) -> DatabaseResult<()> {
        let _guard = self.acquire_writer(true)?;
        self.refresh()?;
        let old_store = self.store();
        let latest = self.latest();
        let options = self.shared.config.store_options();
        let before = old_store.file_size()?;

        let (store, snapshot) = match self.shared.config.path() {
            None => {
                let store = Arc::new(PageStore::in_memory(&options)?);
                let snapshot = write_compacted(&store, &latest)?;
                (store, snapshot)
            }
            Some(path) => {
                let mut tmp = path.as_os_str().to_owned();
                tmp.push(".compact");
                let tmp = std::path::PathBuf::from(tmp);
                if tmp.exists() {
                    std::fs::remove_file(&tmp).map_err(FileError::Io)?;
                }
                let store = Arc::new(PageStore::create(&tmp, &options)?);
                let snapshot = write_compacted(&store, &latest)?;
                std::fs::rename(&tmp, path).map_err(FileError::Io)?;
                (store, snapshot)
            }
        };

        let after = store.file_size()?;
        let _publishing = self.shared.publishing.lock();
        *self.shared.store.write() = store;
        self.shared.publish(Arc::new(snapshot), None);
        info!(before, after, "compacted database");
        Ok(())
    }

    /// Write a compacted copy of the latest version to a new file
    pub fn write_copy_to(&self, path: impl AsRef<Path>) -> DatabaseResult<()> {
        let latest = self.latest();
        let options = StoreOptions {
            read_only: false,
            ..self.shared.config.store_options()
        };
        let store = Arc::new(PageStore::create(path.as_ref(), &options)?);
        write_compacted(&store, &latest)?;
        info!(path = %path.as_ref().display(), version = latest.version(), "wrote copy");
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        self.store().stats()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.shared.config.path())
            .field("version", &self.latest_version())
            .finish()
    }
}

fn check_config(config: &Config) -> DatabaseResult<()> {
    if config.page_size < MIN_PAGE_SIZE || !config.page_size.is_power_of_two() {
        return Err(DatabaseError::InvalidConfig(format!(
            "page size must be a power of two of at least {} bytes, got {}",
            MIN_PAGE_SIZE, config.page_size
        )));
    }
    if config.cache_extents == 0 {
        return Err(DatabaseError::InvalidConfig("cache size must be positive".to_string()));
    }
    if config.read_only && config.is_in_memory() {
        return Err(DatabaseError::InvalidConfig(
            "an in-memory database cannot be read-only".to_string(),
        ));
    }
    if let Some(schema) = &config.schema {
        schema.validate()?;
    }
    Ok(())
}

fn open_store(config: &Config, slot: SlotChoice) -> DatabaseResult<Arc<PageStore>> {
    let options = config.store_options();
    let store = match config.path() {
        None => PageStore::in_memory(&options)?,
        Some(path) if path.exists() => PageStore::open(path, &options, slot)?,
        Some(path) if config.read_only => {
            return Err(FileError::FileNotFound(path.display().to_string()).into());
        }
        Some(path) => PageStore::create(path, &options)?,
    };
    Ok(Arc::new(store))
}

/// Persist a detached copy of `snapshot` into an empty store
fn write_compacted(store: &Arc<PageStore>, snapshot: &Snapshot) -> DatabaseResult<Snapshot> {
    store.set_base_version(snapshot.version());
    let mut copy = snapshot.detached()?;
    let root = copy.persist(store)?;
    let version = store.commit(Some(root), copy.schema().version(), &[])?;
    copy.version = version;
    copy.view = Some(Arc::new(store.open_snapshot(version)?));
    Ok(copy)
}
