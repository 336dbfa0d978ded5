//! Positioned file access with explicit byte counts.
//!
//! Each rank holds its own [`FileHandle`] onto the shared file, the way
//! each process of a parallel job holds its own descriptor.  Reads and
//! writes take absolute offsets and return the number of bytes actually
//! transferred; a short read is reported through the count, not as an
//! error, so the caller can classify it as a count error collectively.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A file opened by one rank for positioned access.
#[derive(Debug)]
pub struct FileHandle {
    file: File,
}

impl FileHandle {
    /// Create the file, truncating previous content.  Called by rank 0 of
    /// a collective create; the other ranks attach with [`open_write`]
    /// after a barrier.
    ///
    /// [`open_write`]: FileHandle::open_write
    pub fn create(path: &Path) -> io::Result<FileHandle> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(FileHandle { file })
    }

    /// Open an existing file for writing without truncation.
    pub fn open_write(path: &Path) -> io::Result<FileHandle> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(FileHandle { file })
    }

    /// Open an existing file read-only.
    pub fn open_read(path: &Path) -> io::Result<FileHandle> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(FileHandle { file })
    }

    /// Read up to `buf.len()` bytes at `offset`, returning the count
    /// transferred.  The count is short only when the file ends inside
    /// the requested range.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Write all of `buf` at `offset`, returning the count transferred.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    /// Current size of the file in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Flush buffered writes to the operating system.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}
