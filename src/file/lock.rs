use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};

/// Advisory lock file next to a database file (`<db>.lock`).
///
/// Held exclusively for the lifetime of a write transaction so that writers
/// in different processes serialize. On non-unix targets locking is a no-op
/// and only the in-process writer mutex applies.
pub struct LockFile {
    file: File,
    path: PathBuf,
    held: bool,
}

impl LockFile {
    /// Open (creating if needed) the lock file belonging to `db_path`
    pub fn open_for<P: AsRef<Path>>(db_path: P) -> FileResult<Self> {
        let mut path = db_path.as_ref().as_os_str().to_owned();
        path.push(".lock");
        let path = PathBuf::from(path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Ok(Self {
            file,
            path,
            held: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Block until the exclusive lock is acquired
    pub fn lock(&mut self) -> FileResult<()> {
        if !self.held {
            flock(&self.file, false)?;
            self.held = true;
        }
        Ok(())
    }

    /// Try to acquire the exclusive lock without waiting
    pub fn try_lock(&mut self) -> FileResult<()> {
        if !self.held {
            if !flock(&self.file, true)? {
                return Err(FileError::Locked(self.path.display().to_string()));
            }
            self.held = true;
        }
        Ok(())
    }

    pub fn unlock(&mut self) -> FileResult<()> {
        if self.held {
            funlock(&self.file)?;
            self.held = false;
        }
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.unlock();
    }
}

/// Returns `Ok(false)` when `nonblocking` and another holder has the lock
#[cfg(unix)]
fn flock(file: &File, nonblocking: bool) -> FileResult<bool> {
    use std::os::unix::io::AsRawFd;

    let mut op = libc::LOCK_EX;
    if nonblocking {
        op |= libc::LOCK_NB;
    }
    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EWOULDBLOCK) if nonblocking => return Ok(false),
            _ => return Err(err.into()),
        }
    }
}

#[cfg(unix)]
fn funlock(file: &File) -> FileResult<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn flock(_file: &File, _nonblocking: bool) -> FileResult<bool> {
    Ok(true)
}

#[cfg(not(unix))]
fn funlock(_file: &File) -> FileResult<()> {
    Ok(())
}
