mod buffer_manager;
mod error;
mod file_manager;
mod free_list;
mod header;
mod lock;
mod page_store;

pub use buffer_manager::PageCache;
pub use error::{FileError, FileResult};
pub use file_manager::PagedFile;
pub use free_list::FreeList;
pub use header::{FileHeader, FORMAT_VERSION, HEADER_SLOT_SIZE, MAGIC};
pub use lock::LockFile;
pub use page_store::{PageStore, PageView, SlotChoice, StoreOptions, StoreStats};

use serde::{Deserialize, Serialize};

/// Default page size in bytes (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size accepted; page 0 must fit both header slots
pub const MIN_PAGE_SIZE: usize = 1024;

/// Number of extents kept in the page cache
pub const PAGE_CACHE_SIZE: usize = 1024;

/// Page ID type
pub type PageId = u64;

/// Reference to an extent: a run of `count` contiguous pages starting at `page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageRef {
    pub page: PageId,
    pub count: u32,
}

impl PageRef {
    pub fn new(page: PageId, count: u32) -> Self {
        Self { page, count }
    }

    /// First page after this extent
    pub fn end(&self) -> PageId {
        self.page + self.count as u64
    }
}
