use super::PageRef;

/// Free-space tracking for the page store.
///
/// `free` holds extents that can be handed out right away, sorted by page and
/// coalesced. `pending` holds extents released by a commit, tagged with that
/// commit's version; they still belong to older snapshots and only move to
/// `free` once no pinned snapshot predates the tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeList {
    free: Vec<PageRef>,
    pending: Vec<(u64, PageRef)>,
}

impl FreeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// First-fit allocation of `count` contiguous pages
    pub fn allocate(&mut self, count: u32) -> Option<PageRef> {
        let idx = self.free.iter().position(|extent| extent.count >= count)?;
        let extent = self.free[idx];
        if extent.count == count {
            self.free.remove(idx);
        } else {
            self.free[idx] = PageRef::new(extent.page + count as u64, extent.count - count);
        }
        Some(PageRef::new(extent.page, count))
    }

    /// Release an extent that is unreachable from versions `>= version`
    pub fn release(&mut self, extent: PageRef, version: u64) {
        self.pending.push((version, extent));
    }

    /// Move every pending extent tagged `<= oldest_live` to the free set.
    /// Returns the extents that became reusable.
    pub fn reclaim(&mut self, oldest_live: u64) -> Vec<PageRef> {
        let mut reclaimed = Vec::new();
        self.pending.retain(|(tag, extent)| {
            if *tag <= oldest_live {
                reclaimed.push(*extent);
                false
            } else {
                true
            }
        });
        for extent in &reclaimed {
            self.insert_free(*extent);
        }
        reclaimed
    }

    pub fn free_pages(&self) -> u64 {
        self.free.iter().map(|e| e.count as u64).sum()
    }

    pub fn pending_pages(&self) -> u64 {
        self.pending.iter().map(|(_, e)| e.count as u64).sum()
    }

    pub fn free_extents(&self) -> &[PageRef] {
        &self.free
    }

    /// Number of extents `encode` will write, free and pending alike
    pub fn extent_count(&self) -> usize {
        self.free.len() + self.pending.len()
    }

    /// Serialize every extent. Pending extents are written as free: a reopened
    /// file has no live snapshots older than its header version.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.extent_count() * 12);
        buf.extend_from_slice(&(self.extent_count() as u32).to_le_bytes());
        for extent in self.free.iter().chain(self.pending.iter().map(|(_, e)| e)) {
            buf.extend_from_slice(&extent.page.to_le_bytes());
            buf.extend_from_slice(&extent.count.to_le_bytes());
        }
        buf
    }

    /// Size in bytes of an encoding holding `extents` entries
    pub fn encoded_len(extents: usize) -> usize {
        4 + extents * 12
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let count = u32::from_le_bytes(bytes.get(0..4)?.try_into().ok()?) as usize;
        let mut list = FreeList::new();
        for i in 0..count {
            let at = 4 + i * 12;
            let page = u64::from_le_bytes(bytes.get(at..at + 8)?.try_into().ok()?);
            let pages = u32::from_le_bytes(bytes.get(at + 8..at + 12)?.try_into().ok()?);
            list.insert_free(PageRef::new(page, pages));
        }
        Some(list)
    }

    fn insert_free(&mut self, extent: PageRef) {
        if extent.count == 0 {
            return;
        }
        let idx = self.free.partition_point(|e| e.page < extent.page);
        self.free.insert(idx, extent);

        // Coalesce with the right neighbour, then the left one
        if idx + 1 < self.free.len() && self.free[idx].end() == self.free[idx + 1].page {
            self.free[idx].count += self.free[idx + 1].count;
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].end() == self.free[idx].page {
            self.free[idx - 1].count += self.free[idx].count;
            self.free.remove(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// List whose free set holds `extents`
    fn free_list(extents: &[PageRef]) -> FreeList {
        let mut list = FreeList::new();
        for extent in extents {
            list.release(*extent, 1);
        }
        list.reclaim(1);
        list
    }

    #[test]
    fn test_allocate_first_fit_splits() {
        let mut list = free_list(&[PageRef::new(10, 2), PageRef::new(20, 5)]);

        assert_eq!(list.allocate(3), Some(PageRef::new(20, 3)));
        assert_eq!(list.free_extents(), &[PageRef::new(10, 2), PageRef::new(23, 2)]);
        assert_eq!(list.allocate(2), Some(PageRef::new(10, 2)));
        assert_eq!(list.allocate(4), None);
    }

    #[test]
    fn test_adjacent_extents_coalesce() {
        let list = free_list(&[PageRef::new(5, 1), PageRef::new(7, 1), PageRef::new(6, 1)]);
        assert_eq!(list.free_extents(), &[PageRef::new(5, 3)]);
    }

    #[test]
    fn test_pending_waits_for_oldest_reader() {
        let mut list = FreeList::new();
        list.release(PageRef::new(4, 1), 3);
        list.release(PageRef::new(9, 2), 5);

        // A reader still pins version 2: nothing is reusable
        assert!(list.reclaim(2).is_empty());
        assert_eq!(list.allocate(1), None);

        assert_eq!(list.reclaim(4), vec![PageRef::new(4, 1)]);
        assert_eq!(list.pending_pages(), 2);
        assert_eq!(list.allocate(1), Some(PageRef::new(4, 1)));
    }

    #[test]
    fn test_encode_writes_pending_as_free() {
        let mut list = free_list(&[PageRef::new(2, 1)]);
        list.release(PageRef::new(8, 3), 11);

        let bytes = list.encode();
        assert_eq!(bytes.len(), FreeList::encoded_len(2));
        let decoded = FreeList::decode(&bytes).unwrap();
        assert_eq!(decoded.free_extents(), &[PageRef::new(2, 1), PageRef::new(8, 3)]);
        assert_eq!(decoded.pending_pages(), 0);
    }
}
