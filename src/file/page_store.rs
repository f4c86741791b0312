use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::buffer_manager::PageCache;
use super::error::{FileError, FileResult};
use super::file_manager::PagedFile;
use super::free_list::FreeList;
use super::header::FileHeader;
use super::{DEFAULT_PAGE_SIZE, PAGE_CACHE_SIZE, PageId, PageRef};

/// Bytes in front of every extent payload: length and CRC32
const EXTENT_HEADER: usize = 8;

/// Options for opening a page store
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Page size for new files; existing files use the size in their header
    pub page_size: usize,
    /// Number of extents kept in the LRU cache
    pub cache_extents: usize,
    /// Upper bound for the file size in bytes
    pub max_file_size: Option<u64>,
    pub read_only: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_extents: PAGE_CACHE_SIZE,
            max_file_size: None,
            read_only: false,
        }
    }
}

/// Which header slot to trust when opening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChoice {
    /// The valid slot with the highest version
    Newest,
    /// The older valid slot, used for recovery
    Previous,
}

/// Point-in-time counters for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub version: u64,
    pub page_size: usize,
    pub page_count: u64,
    pub free_pages: u64,
    pub pending_pages: u64,
    pub pinned_versions: usize,
    pub retained_versions: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

struct StoreState {
    file: PagedFile,
    /// Last published header
    header: FileHeader,
    active_slot: usize,
    free_list: FreeList,
    /// Logical end of the file including unpublished allocations
    page_count: u64,
    /// Allocator state before the first allocation of the pending commit
    saved: Option<(FreeList, u64)>,
    /// Root of every version that may still be opened
    versions: BTreeMap<u64, Option<PageRef>>,
}

/// Copy-on-write page store with two-phase commit.
///
/// New data always goes to freshly allocated extents; a commit flushes them,
/// then publishes a header naming the new root. Extents released by commit
/// `v` are only reused once every pinned snapshot is at version `v` or later.
pub struct PageStore {
    state: Mutex<StoreState>,
    /// version -> number of open views
    pins: Mutex<BTreeMap<u64, usize>>,
    cache: Mutex<PageCache>,
    max_file_size: Option<u64>,
    #[cfg(test)]
    fail_next_publish: std::sync::atomic::AtomicBool,
}

impl PageStore {
    /// Create a new store file. Fails if the file exists.
    pub fn create<P: AsRef<Path>>(path: P, options: &StoreOptions) -> FileResult<Self> {
        let file = PagedFile::create(path.as_ref(), options.page_size)?;
        info!(path = %path.as_ref().display(), page_size = options.page_size, "creating page store");
        Self::initialize(file, options)
    }

    /// Create a store that lives only in memory
    pub fn in_memory(options: &StoreOptions) -> FileResult<Self> {
        let file = PagedFile::in_memory(options.page_size)?;
        Self::initialize(file, options)
    }

    /// Open an existing store file
    pub fn open<P: AsRef<Path>>(path: P, options: &StoreOptions, slot: SlotChoice) -> FileResult<Self> {
        let mut file = PagedFile::open(path.as_ref(), options.page_size, options.read_only)?;
        let (active_slot, newest, previous) = FileHeader::read_slots(&mut file)?;

        let (active_slot, header) = match slot {
            SlotChoice::Newest => (active_slot, newest),
            SlotChoice::Previous => {
                let previous = previous.ok_or_else(|| {
                    FileError::CorruptFile("no previous header slot to recover from".to_string())
                })?;
                warn!(
                    newest = newest.version,
                    previous = previous.version,
                    "opening previous committed version"
                );
                (1 - active_slot, previous)
            }
        };

        file.set_page_size(header.page_size as usize)?;
        let free_list = match header.free_list {
            Some(extent) => {
                let bytes = read_extent_from(&mut file, extent, header.page_count)?;
                FreeList::decode(&bytes)
                    .ok_or_else(|| FileError::CorruptFile("unreadable free list".to_string()))?
            }
            None => FreeList::new(),
        };

        // Drop pages written by a commit that never published
        if !options.read_only && file.page_count()? > header.page_count {
            debug!(pages = header.page_count, "truncating unpublished tail");
            file.set_page_count(header.page_count)?;
        }

        info!(
            path = %path.as_ref().display(),
            version = header.version,
            pages = header.page_count,
            "opened page store"
        );

        let mut versions = BTreeMap::new();
        versions.insert(header.version, header.root);

        Ok(Self {
            state: Mutex::new(StoreState {
                file,
                header,
                active_slot,
                free_list,
                page_count: header.page_count,
                saved: None,
                versions,
            }),
            pins: Mutex::new(BTreeMap::new()),
            cache: Mutex::new(PageCache::with_capacity(options.cache_extents)),
            max_file_size: options.max_file_size,
            #[cfg(test)]
            fail_next_publish: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn initialize(mut file: PagedFile, options: &StoreOptions) -> FileResult<Self> {
        let header = FileHeader::empty(file.page_size());
        file.set_page_count(1)?;
        header.write_slot(&mut file, 0)?;
        file.sync()?;

        let mut versions = BTreeMap::new();
        versions.insert(0, None);

        Ok(Self {
            state: Mutex::new(StoreState {
                file,
                header,
                active_slot: 0,
                free_list: FreeList::new(),
                page_count: header.page_count,
                saved: None,
                versions,
            }),
            pins: Mutex::new(BTreeMap::new()),
            cache: Mutex::new(PageCache::with_capacity(options.cache_extents)),
            max_file_size: options.max_file_size,
            #[cfg(test)]
            fail_next_publish: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn page_size(&self) -> usize {
        self.state.lock().file.page_size()
    }

    /// Last published version
    pub fn version(&self) -> u64 {
        self.state.lock().header.version
    }

    /// Root of the last published version
    pub fn root(&self) -> Option<PageRef> {
        self.state.lock().header.root
    }

    pub fn schema_version(&self) -> u64 {
        self.state.lock().header.schema_version
    }

    pub fn is_in_memory(&self) -> bool {
        self.state.lock().file.is_in_memory()
    }

    /// Number of pages needed for an extent with `size` payload bytes
    pub fn pages_for(&self, size: usize) -> u32 {
        let page_size = self.page_size();
        (size + EXTENT_HEADER).div_ceil(page_size).max(1) as u32
    }

    /// Reserve an extent able to hold `size` payload bytes
    pub fn allocate(&self, size: usize) -> FileResult<PageRef> {
        let mut state = self.state.lock();
        let extent = self.allocate_locked(&mut state, size)?;
        drop(state);
        self.cache.lock().invalidate_range(extent.page, extent.count);
        Ok(extent)
    }

    fn allocate_locked(&self, state: &mut StoreState, size: usize) -> FileResult<PageRef> {
        if state.file.is_read_only() {
            return Err(FileError::ReadOnly);
        }
        let page_size = state.file.page_size() as u64;
        let count = (size + EXTENT_HEADER).div_ceil(page_size as usize).max(1) as u32;

        if state.saved.is_none() {
            state.saved = Some((state.free_list.clone(), state.page_count));
        }

        if let Some(extent) = state.free_list.allocate(count) {
            return Ok(extent);
        }

        let page: PageId = state.page_count;
        let new_count = page + count as u64;
        if let Some(limit) = self.max_file_size
            && new_count * page_size > limit
        {
            return Err(FileError::OutOfSpace {
                requested: new_count * page_size,
                limit,
            });
        }
        state.page_count = new_count;
        Ok(PageRef::new(page, count))
    }

    /// Write `payload` into a previously allocated extent. Not durable until
    /// the next [`PageStore::commit`].
    pub fn write_extent(&self, extent: PageRef, payload: &[u8]) -> FileResult<()> {
        let mut state = self.state.lock();
        let capacity = extent.count as usize * state.file.page_size();
        if payload.len() + EXTENT_HEADER > capacity {
            return Err(FileError::InvalidPageSize {
                expected: capacity - EXTENT_HEADER,
                actual: payload.len(),
            });
        }
        write_extent_to(&mut state.file, extent, payload)
    }

    /// Allocate an extent and write `payload` into it
    pub fn write_new(&self, payload: &[u8]) -> FileResult<PageRef> {
        let extent = self.allocate(payload.len())?;
        self.write_extent(extent, payload)?;
        Ok(extent)
    }

    /// Read and verify an extent payload
    pub fn read_extent(&self, extent: PageRef) -> FileResult<Arc<Vec<u8>>> {
        if let Some(data) = self.cache.lock().get(extent.page) {
            return Ok(data);
        }

        let data = {
            let mut state = self.state.lock();
            let page_count = state.page_count;
            Arc::new(read_extent_from(&mut state.file, extent, page_count)?)
        };
        self.cache.lock().insert(extent.page, Arc::clone(&data));
        Ok(data)
    }

    /// Publish a new version.
    ///
    /// Phase one writes the free list and syncs every data page; phase two
    /// writes the header into the inactive slot and syncs again. `freed` lists
    /// extents reachable from the previous version but not from `root`.
    /// On failure the allocator is rolled back and the previous version stays
    /// the published one.
    pub fn commit(
        &self,
        root: Option<PageRef>,
        schema_version: u64,
        freed: &[PageRef],
    ) -> FileResult<u64> {
        let mut state = self.state.lock();
        match self.commit_locked(&mut state, root, schema_version, freed) {
            Ok(version) => {
                self.reclaim_locked(&mut state);
                Ok(version)
            }
            Err(err) => {
                warn!(error = %err, "commit failed, rolling back allocations");
                rollback_locked(&mut state);
                Err(err)
            }
        }
    }

    fn commit_locked(
        &self,
        state: &mut StoreState,
        root: Option<PageRef>,
        schema_version: u64,
        freed: &[PageRef],
    ) -> FileResult<u64> {
        if state.file.is_read_only() {
            return Err(FileError::ReadOnly);
        }
        if state.saved.is_none() {
            state.saved = Some((state.free_list.clone(), state.page_count));
        }
        let version = state.header.version + 1;

        for extent in freed {
            state.free_list.release(*extent, version);
        }
        if let Some(old) = state.header.free_list {
            state.free_list.release(old, version);
        }

        // Size for one extra entry: the allocation below never adds one
        let reserve = FreeList::encoded_len(state.free_list.extent_count() + 1);
        let free_extent = self.allocate_locked(state, reserve)?;
        let encoded = state.free_list.encode();
        drop_cached(&self.cache, free_extent);
        write_extent_to(&mut state.file, free_extent, &encoded)?;

        // Phase one: every page the new version references is durable
        if state.file.page_count()? < state.page_count {
            state.file.set_page_count(state.page_count)?;
        }
        state.file.sync()?;

        if self.publish_should_fail() {
            return Err(FileError::Io(std::io::Error::other(
                "injected failure before header publish",
            )));
        }

        // Phase two: publish the header into the inactive slot
        let header = FileHeader {
            version,
            schema_version,
            root,
            free_list: Some(free_extent),
            page_count: state.page_count,
            ..state.header
        };
        let slot = 1 - state.active_slot;
        header.write_slot(&mut state.file, slot)?;
        state.file.sync()?;

        state.header = header;
        state.active_slot = slot;
        state.saved = None;
        state.versions.insert(version, root);

        debug!(
            version,
            pages = state.page_count,
            freed = freed.len(),
            "published version"
        );
        Ok(version)
    }

    /// Continue version numbering after `version` in a freshly created store,
    /// so a compacted copy never goes back in time
    pub(crate) fn set_base_version(&self, version: u64) {
        let mut state = self.state.lock();
        state.header.version = version;
        let root = state.header.root;
        state.versions.clear();
        state.versions.insert(version, root);
    }

    /// Discard every allocation made since the last publish
    pub fn rollback(&self) {
        rollback_locked(&mut self.state.lock());
    }

    /// Pin `version` and return a view of it.
    pub fn open_snapshot(self: &Arc<Self>, version: u64) -> FileResult<PageView> {
        let state = self.state.lock();
        let root = *state
            .versions
            .get(&version)
            .ok_or(FileError::VersionUnavailable(version))?;
        *self.pins.lock().entry(version).or_insert(0) += 1;
        drop(state);

        Ok(PageView {
            store: Arc::clone(self),
            version,
            root,
        })
    }

    /// Pin the latest published version
    pub fn open_latest(self: &Arc<Self>) -> FileResult<PageView> {
        let version = self.version();
        self.open_snapshot(version)
    }

    fn unpin(&self, version: u64) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&version) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&version);
            }
        }
    }

    /// Make released extents reusable where no pinned snapshot needs them.
    /// Returns without doing anything if the pin table is contended.
    pub fn reclaim(&self) {
        let mut state = self.state.lock();
        self.reclaim_locked(&mut state);
    }

    fn reclaim_locked(&self, state: &mut StoreState) {
        let Some(pins) = self.pins.try_lock() else {
            debug!("pin table busy, skipping reclamation");
            return;
        };
        let latest = state.header.version;
        let oldest = pins.keys().next().copied().unwrap_or(latest).min(latest);
        drop(pins);

        let reclaimed = state.free_list.reclaim(oldest);
        if !reclaimed.is_empty() {
            let mut cache = self.cache.lock();
            for extent in &reclaimed {
                cache.invalidate_range(extent.page, extent.count);
            }
            debug!(extents = reclaimed.len(), oldest, "reclaimed extents");
        }
        state.versions.retain(|v, _| *v >= oldest);
    }

    /// Re-read the header from disk and adopt it if another process published
    /// a newer version. Returns the new `(version, root)` when it changed.
    pub fn refresh(&self) -> FileResult<Option<(u64, Option<PageRef>)>> {
        let mut state = self.state.lock();
        if state.file.is_in_memory() {
            return Ok(None);
        }
        let (slot, header, _) = FileHeader::read_slots(&mut state.file)?;
        if header.version <= state.header.version {
            return Ok(None);
        }

        let free_list = match header.free_list {
            Some(extent) => {
                let bytes = read_extent_from(&mut state.file, extent, header.page_count)?;
                FreeList::decode(&bytes)
                    .ok_or_else(|| FileError::CorruptFile("unreadable free list".to_string()))?
            }
            None => FreeList::new(),
        };

        info!(from = state.header.version, to = header.version, "adopting newer version from disk");
        state.header = header;
        state.active_slot = slot;
        state.free_list = free_list;
        state.page_count = header.page_count;
        state.saved = None;
        state.versions.insert(header.version, header.root);
        // Another writer may have reused any extent
        self.cache.lock().clear();
        Ok(Some((header.version, header.root)))
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        let pins = self.pins.lock();
        let (cache_hits, cache_misses) = self.cache.lock().stats();
        StoreStats {
            version: state.header.version,
            page_size: state.file.page_size(),
            page_count: state.header.page_count,
            free_pages: state.free_list.free_pages(),
            pending_pages: state.free_list.pending_pages(),
            pinned_versions: pins.len(),
            retained_versions: state.versions.len(),
            cache_hits,
            cache_misses,
        }
    }

    /// Size of the backing file in bytes
    pub fn file_size(&self) -> FileResult<u64> {
        self.state.lock().file.len()
    }

    /// Flush OS buffers
    pub fn sync(&self) -> FileResult<()> {
        self.state.lock().file.sync()
    }

    /// Make the next commit fail after phase one, as if the process died
    /// before the header reached disk.
    #[cfg(test)]
    pub(crate) fn fail_next_publish(&self) {
        self.fail_next_publish
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn publish_should_fail(&self) -> bool {
        self.fail_next_publish
            .swap(false, std::sync::atomic::Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn publish_should_fail(&self) -> bool {
        false
    }
}

fn rollback_locked(state: &mut StoreState) {
    if let Some((free_list, page_count)) = state.saved.take() {
        state.free_list = free_list;
        state.page_count = page_count;
    }
}

fn drop_cached(cache: &Mutex<PageCache>, extent: PageRef) {
    cache.lock().invalidate_range(extent.page, extent.count);
}

fn write_extent_to(file: &mut PagedFile, extent: PageRef, payload: &[u8]) -> FileResult<()> {
    let capacity = extent.count as usize * file.page_size();
    let mut buffer = vec![0u8; capacity];
    buffer[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    buffer[4..8].copy_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buffer[EXTENT_HEADER..EXTENT_HEADER + payload.len()].copy_from_slice(payload);
    file.write_pages(extent.page, &buffer)
}

fn read_extent_from(file: &mut PagedFile, extent: PageRef, page_count: u64) -> FileResult<Vec<u8>> {
    if extent.page == 0 || extent.count == 0 || extent.end() > page_count {
        return Err(FileError::PageOutOfRange(extent.page));
    }
    let mut buffer = vec![0u8; extent.count as usize * file.page_size()];
    file.read_pages(extent.page, &mut buffer)?;

    let len = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    let crc = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
    if EXTENT_HEADER + len > buffer.len() {
        return Err(FileError::ChecksumMismatch(extent.page));
    }
    buffer.truncate(EXTENT_HEADER + len);
    let payload = buffer.split_off(EXTENT_HEADER);
    if crc32fast::hash(&payload) != crc {
        return Err(FileError::ChecksumMismatch(extent.page));
    }
    Ok(payload)
}

/// A pinned, read-only view of one published version.
///
/// While the view exists none of the extents reachable from its root are
/// handed out again. Holding views for a long time makes the file grow.
pub struct PageView {
    store: Arc<PageStore>,
    version: u64,
    root: Option<PageRef>,
}

impl PageView {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> Option<PageRef> {
        self.root
    }

    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }

    pub fn read_extent(&self, extent: PageRef) -> FileResult<Arc<Vec<u8>>> {
        self.store.read_extent(extent)
    }
}

impl std::fmt::Debug for PageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageView")
            .field("version", &self.version)
            .field("root", &self.root)
            .finish()
    }
}

impl Drop for PageView {
    fn drop(&mut self) {
        self.store.unpin(self.version);
    }
}
