use super::error::{FileError, FileResult};
use super::file_manager::PagedFile;
use super::PageRef;

/// File magic at the start of each header slot
pub const MAGIC: [u8; 4] = *b"TSDB";

/// On-disk format version
pub const FORMAT_VERSION: u16 = 1;

/// Distance between the two header slots in page 0
pub const HEADER_SLOT_SIZE: usize = 512;

/// Encoded length of one slot including the trailing CRC
const SLOT_LEN: usize = 68;
const CRC_OFFSET: usize = SLOT_LEN - 4;

/// One committed state of the file.
///
/// Page 0 holds two copies. A commit always overwrites the slot that is not
/// active, so a torn header write leaves the other slot intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub format_version: u16,
    pub page_size: u32,
    pub version: u64,
    pub schema_version: u64,
    pub root: Option<PageRef>,
    pub free_list: Option<PageRef>,
    pub page_count: u64,
}

impl FileHeader {
    /// Header of a freshly created, empty file
    pub fn empty(page_size: usize) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: page_size as u32,
            version: 0,
            schema_version: 0,
            root: None,
            free_list: None,
            page_count: 1,
        }
    }

    pub fn encode(&self) -> [u8; SLOT_LEN] {
        let mut buf = [0u8; SLOT_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        // 6..8 flags, 12..16 reserved
        buf[8..12].copy_from_slice(&self.page_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.version.to_le_bytes());
        buf[24..32].copy_from_slice(&self.schema_version.to_le_bytes());
        let root = self.root.unwrap_or(PageRef::new(0, 0));
        buf[32..40].copy_from_slice(&root.page.to_le_bytes());
        buf[40..44].copy_from_slice(&root.count.to_le_bytes());
        let free = self.free_list.unwrap_or(PageRef::new(0, 0));
        buf[44..48].copy_from_slice(&free.count.to_le_bytes());
        buf[48..56].copy_from_slice(&free.page.to_le_bytes());
        buf[56..64].copy_from_slice(&self.page_count.to_le_bytes());
        let crc = crc32fast::hash(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode a slot, returning `None` when the magic or checksum is wrong
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < SLOT_LEN || buf[0..4] != MAGIC {
            return None;
        }
        let stored_crc = u32::from_le_bytes(buf[CRC_OFFSET..SLOT_LEN].try_into().ok()?);
        if crc32fast::hash(&buf[..CRC_OFFSET]) != stored_crc {
            return None;
        }

        let u64_at = |at: usize| buf[at..at + 8].try_into().ok().map(u64::from_le_bytes);
        let u32_at = |at: usize| buf[at..at + 4].try_into().ok().map(u32::from_le_bytes);

        let format_version = u16::from_le_bytes(buf[4..6].try_into().ok()?);
        let root = PageRef::new(u64_at(32)?, u32_at(40)?);
        let free = PageRef::new(u64_at(48)?, u32_at(44)?);

        Some(Self {
            format_version,
            page_size: u32_at(8)?,
            version: u64_at(16)?,
            schema_version: u64_at(24)?,
            root: (root.page != 0).then_some(root),
            free_list: (free.page != 0).then_some(free),
            page_count: u64_at(56)?,
        })
    }

    /// Read both slots. Returns `(active slot, header, other valid header)`.
    pub fn read_slots(file: &mut PagedFile) -> FileResult<(usize, FileHeader, Option<FileHeader>)> {
        let mut page0 = vec![0u8; HEADER_SLOT_SIZE * 2];
        file.read_at(0, &mut page0)?;

        let a = Self::decode(&page0[..HEADER_SLOT_SIZE]);
        let b = Self::decode(&page0[HEADER_SLOT_SIZE..]);

        let (slot, active, other) = match (a, b) {
            (Some(a), Some(b)) if b.version > a.version => (1, b, Some(a)),
            (Some(a), b) => (0, a, b),
            (None, Some(b)) => (1, b, None),
            (None, None) => {
                return Err(FileError::CorruptFile(
                    "no valid header slot found".to_string(),
                ));
            }
        };

        if active.format_version != FORMAT_VERSION {
            return Err(FileError::CorruptFile(format!(
                "unsupported format version {}",
                active.format_version
            )));
        }

        Ok((slot, active, other))
    }

    /// Write this header into `slot` (0 or 1). Does not sync.
    pub fn write_slot(&self, file: &mut PagedFile, slot: usize) -> FileResult<()> {
        file.write_at((slot * HEADER_SLOT_SIZE) as u64, &self.encode())
    }
}
