use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::{PAGE_CACHE_SIZE, PageId};

/// LRU cache of decoded extent payloads, keyed by the extent's first page.
///
/// Extents are immutable once published, so entries are never dirty. An
/// entry must be invalidated when the allocator hands its pages out again.
pub struct PageCache {
    /// Combined storage and eviction order: one hash lookup per access
    entries: LruCache<PageId, Arc<Vec<u8>>>,
    hits: u64,
    misses: u64,
}

impl PageCache {
    pub fn new() -> Self {
        Self::with_capacity(PAGE_CACHE_SIZE)
    }

    /// Create a cache holding at most `capacity` extents (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up an extent payload, updating recency
    pub fn get(&mut self, page: PageId) -> Option<Arc<Vec<u8>>> {
        match self.entries.get(&page) {
            Some(data) => {
                self.hits += 1;
                Some(Arc::clone(data))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, page: PageId, data: Arc<Vec<u8>>) {
        // LruCache::push evicts the least recently used entry when full
        self.entries.push(page, data);
    }

    /// Drop any cached extent starting inside `[page, page + count)`
    pub fn invalidate_range(&mut self, page: PageId, count: u32) {
        if self.entries.is_empty() {
            return;
        }
        let end = page + count as u64;
        if (count as usize) < self.entries.len() {
            for p in page..end {
                self.entries.pop(&p);
            }
        } else {
            let stale: Vec<PageId> = self
                .entries
                .iter()
                .map(|(p, _)| *p)
                .filter(|p| *p >= page && *p < end)
                .collect();
            for p in stale {
                self.entries.pop(&p);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}
