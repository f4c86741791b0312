use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};
use super::{MIN_PAGE_SIZE, PageId};

/// Where the pages live
enum Backing {
    Disk { file: File, path: PathBuf },
    Memory(Vec<u8>),
}

/// A single paged file, either on disk or held in memory.
///
/// All offsets are page aligned except for the header slots in page 0,
/// which go through [`PagedFile::read_at`] and [`PagedFile::write_at`].
pub struct PagedFile {
    backing: Backing,
    page_size: usize,
    read_only: bool,
}

impl PagedFile {
    /// Create a new file. Fails if it already exists.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> FileResult<Self> {
        check_page_size(page_size)?;
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            backing: Backing::Disk {
                file,
                path: path.to_path_buf(),
            },
            page_size,
            read_only: false,
        })
    }

    /// Open an existing file
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize, read_only: bool) -> FileResult<Self> {
        check_page_size(page_size)?;
        let path = path.as_ref();

        if !path.exists() {
            return Err(FileError::FileNotFound(path.display().to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;

        Ok(Self {
            backing: Backing::Disk {
                file,
                path: path.to_path_buf(),
            },
            page_size,
            read_only,
        })
    }

    /// Create an anonymous in-memory file
    pub fn in_memory(page_size: usize) -> FileResult<Self> {
        check_page_size(page_size)?;
        Ok(Self {
            backing: Backing::Memory(Vec::new()),
            page_size,
            read_only: false,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Reopening with the page size recorded in the header
    pub(crate) fn set_page_size(&mut self, page_size: usize) -> FileResult<()> {
        check_page_size(page_size)?;
        self.page_size = page_size;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Disk { path, .. } => Some(path),
            Backing::Memory(_) => None,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.backing, Backing::Memory(_))
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Size of the file in bytes
    pub fn len(&self) -> FileResult<u64> {
        match &self.backing {
            Backing::Disk { file, .. } => Ok(file.metadata()?.len()),
            Backing::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    pub fn is_empty(&self) -> FileResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Get the number of pages in the file
    pub fn page_count(&self) -> FileResult<u64> {
        Ok(self.len()?.div_ceil(self.page_size as u64))
    }

    /// Read raw bytes at `offset`. Bytes past the end of the file read as zero.
    pub fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> FileResult<()> {
        match &mut self.backing {
            Backing::Disk { file, .. } => {
                file.seek(SeekFrom::Start(offset))?;
                let mut filled = 0;
                while filled < buffer.len() {
                    let n = file.read(&mut buffer[filled..])?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                // If we read less than requested, fill the rest with zeros
                buffer[filled..].fill(0);
            }
            Backing::Memory(bytes) => {
                let start = (offset as usize).min(bytes.len());
                let end = (start + buffer.len()).min(bytes.len());
                let n = end - start;
                buffer[..n].copy_from_slice(&bytes[start..end]);
                buffer[n..].fill(0);
            }
        }
        Ok(())
    }

    /// Write raw bytes at `offset`, extending the file if necessary
    pub fn write_at(&mut self, offset: u64, buffer: &[u8]) -> FileResult<()> {
        if self.read_only {
            return Err(FileError::ReadOnly);
        }
        match &mut self.backing {
            Backing::Disk { file, .. } => {
                let required_size = offset + buffer.len() as u64;
                if file.metadata()?.len() < required_size {
                    file.set_len(required_size)?;
                }
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(buffer)?;
            }
            Backing::Memory(bytes) => {
                let start = offset as usize;
                let end = start + buffer.len();
                if bytes.len() < end {
                    bytes.resize(end, 0);
                }
                bytes[start..end].copy_from_slice(buffer);
            }
        }
        Ok(())
    }

    /// Read `buffer.len() / page_size` pages starting at `page_id`
    pub fn read_pages(&mut self, page_id: PageId, buffer: &mut [u8]) -> FileResult<()> {
        self.check_buffer(buffer.len())?;
        self.read_at(page_id * self.page_size as u64, buffer)
    }

    /// Write whole pages starting at `page_id`
    pub fn write_pages(&mut self, page_id: PageId, buffer: &[u8]) -> FileResult<()> {
        self.check_buffer(buffer.len())?;
        self.write_at(page_id * self.page_size as u64, buffer)
    }

    /// Grow or shrink the file to exactly `pages` pages
    pub fn set_page_count(&mut self, pages: u64) -> FileResult<()> {
        if self.read_only {
            return Err(FileError::ReadOnly);
        }
        let len = pages * self.page_size as u64;
        match &mut self.backing {
            Backing::Disk { file, .. } => file.set_len(len)?,
            Backing::Memory(bytes) => bytes.resize(len as usize, 0),
        }
        Ok(())
    }

    /// Sync the file to disk (flush all OS buffers)
    pub fn sync(&mut self) -> FileResult<()> {
        if let Backing::Disk { file, .. } = &mut self.backing
            && !self.read_only
        {
            file.sync_data()?;
        }
        Ok(())
    }

    fn check_buffer(&self, len: usize) -> FileResult<()> {
        if len == 0 || len % self.page_size != 0 {
            return Err(FileError::InvalidPageSize {
                expected: self.page_size,
                actual: len,
            });
        }
        Ok(())
    }
}

fn check_page_size(page_size: usize) -> FileResult<()> {
    if page_size < MIN_PAGE_SIZE || !page_size.is_power_of_two() {
        return Err(FileError::InvalidPageSize {
            expected: MIN_PAGE_SIZE,
            actual: page_size,
        });
    }
    Ok(())
}
