//! The per-rank file context: cursor, partition, and collective plumbing.
//!
//! A [`FileContext`] is created collectively and consumed collectively.
//! Operations take the context by value and hand it back on success; on
//! any failure the context is dropped on every rank, which closes the
//! file handle, so a failed context can never be used or closed again.
//!
//! All ranks advance the logical cursor `accessed_bytes` identically on
//! every call, whether or not they touched the file; block headers live at
//! `112 + accessed_bytes` and field payloads at the rank's partition
//! offset past that.

use std::path::Path;

use forestfile_format::file_header::{FileHeader, ParsedFileHeader};
use forestfile_format::{pad, Dim, USER_STRING_BYTES};
use forestfile_format::{BLOCK_HEADER_BYTES, BYTE_DIV, FILE_HEADER_BYTES, FIRST_BLOCK_OFFSET};
use forestfile_io::{Communicator, FileHandle};

use crate::error::Error;
use crate::forest::Forest;

/// The partition vector held by a context: copied at create, borrowed
/// from the bound forest at open-read, absent for unbound reads.
#[derive(Debug)]
pub enum Partition<'a> {
    /// Copied into the context; freed with it.
    Owned(Box<[i64]>),
    /// Borrowed from a forest that must outlive the context.
    Borrowed(&'a [i64]),
    /// No partition; field reads fall back to the uniform partition.
    Unset,
}

impl Partition<'_> {
    /// The partition vector, if any.
    pub fn get(&self) -> Option<&[i64]> {
        match self {
            Partition::Owned(gfq) => Some(gfq),
            Partition::Borrowed(gfq) => Some(gfq),
            Partition::Unset => None,
        }
    }
}

/// Per-rank handle onto one data file being written or read.
#[derive(Debug)]
pub struct FileContext<'a, C: Communicator> {
    pub(crate) comm: &'a C,
    pub(crate) dim: Dim,
    pub(crate) local_num_cells: i64,
    pub(crate) global_num_cells: i64,
    pub(crate) partition: Partition<'a>,
    pub(crate) file: FileHandle,
    pub(crate) writable: bool,
    pub(crate) accessed_bytes: u64,
    pub(crate) num_calls: u64,
}

impl<'a, C: Communicator> FileContext<'a, C> {
    /// Logical cursor: bytes consumed past the file-header region,
    /// identical on every rank.
    pub fn accessed_bytes(&self) -> u64 {
        self.accessed_bytes
    }

    /// Number of successful block operations on this context.
    pub fn num_calls(&self) -> u64 {
        self.num_calls
    }

    /// Global cell count this context was created or opened with.
    pub fn global_num_cells(&self) -> i64 {
        self.global_num_cells
    }

    /// Absolute offset of the next block header.
    pub(crate) fn block_offset(&self) -> u64 {
        FIRST_BLOCK_OFFSET as u64 + self.accessed_bytes
    }

    /// Absolute offset of the next block's payload.
    pub(crate) fn payload_offset(&self) -> u64 {
        self.block_offset() + BLOCK_HEADER_BYTES as u64
    }

    /// Account for one completed block of `payload_len` bytes.
    pub(crate) fn advance(&mut self, payload_len: u64) {
        self.accessed_bytes +=
            BLOCK_HEADER_BYTES as u64 + payload_len + pad::pad_len(payload_len) as u64;
        self.num_calls += 1;
    }

    /// Create a new data file for the given forest.  Collective; rank 0
    /// writes the file header and its alignment pad.
    ///
    /// The forest's partition vector is copied into the context.
    ///
    /// # Panics
    ///
    /// If the forest is invalid or the user string exceeds 47 bytes.
    pub fn create(
        comm: &'a C,
        forest: &Forest,
        path: &Path,
        user_string: &str,
    ) -> Result<FileContext<'a, C>, Error> {
        assert!(forest.is_valid());
        assert!(user_string.len() <= USER_STRING_BYTES);
        assert_eq!(comm.rank(), forest.rank);
        assert_eq!(comm.size(), forest.size);

        let file = open_collective(comm, path, OpenMode::Create)?;
        let mut ctx = FileContext {
            comm,
            dim: forest.dim,
            local_num_cells: forest.local_num_cells,
            global_num_cells: forest.global_num_cells,
            partition: Partition::Owned(forest.gfq.clone().into_boxed_slice()),
            file,
            writable: true,
            accessed_bytes: 0,
            num_calls: 0,
        };

        let root = (comm.rank() == 0).then(|| {
            let header = FileHeader {
                dim: forest.dim,
                global_num_cells: forest.global_num_cells,
                user_string: user_string.to_string(),
            };
            let bytes = header.encode();
            write_all_at(&mut ctx.file, 0, &bytes)
        });
        sync_root(comm, root, "writing the file header")?;

        Ok(ctx)
    }

    /// Open a data file for reading without binding it to a forest.
    /// Collective; rank 0 reads and validates the file header, then the
    /// parsed user string and global cell count are replicated.
    ///
    /// Field reads on the returned context fall back to the uniform
    /// partition unless one is supplied per call.
    pub fn open_read_ext(
        comm: &'a C,
        dim: Dim,
        path: &Path,
    ) -> Result<(FileContext<'a, C>, String, i64), Error> {
        let file = open_collective(comm, path, OpenMode::Read)?;
        let mut ctx = FileContext {
            comm,
            dim,
            local_num_cells: 0,
            global_num_cells: 0,
            partition: Partition::Unset,
            file,
            writable: false,
            accessed_bytes: 0,
            num_calls: 0,
        };

        let root = (comm.rank() == 0).then(|| read_file_header(&mut ctx.file, dim));
        let parsed = sync_root(comm, root, "reading the file header")?;

        // Replicate user string and global count: 8-byte count, then the
        // fixed-width user field.
        let mut wire = [0u8; 8 + USER_STRING_BYTES];
        if let Some(header) = &parsed {
            wire[..8].copy_from_slice(&header.global_num_cells.to_le_bytes());
            wire[8..8 + header.user_string.len()].copy_from_slice(header.user_string.as_bytes());
            wire[8 + header.user_string.len()..].fill(b' ');
        }
        comm.broadcast(0, &mut wire);
        let global_num_cells = i64::from_le_bytes(wire[..8].try_into().expect("wire layout"));
        let user_string = String::from_utf8_lossy(&wire[8..])
            .trim_end_matches(' ')
            .to_string();

        ctx.global_num_cells = global_num_cells;
        Ok((ctx, user_string, global_num_cells))
    }

    /// Open a data file for reading, bound to `forest`.  Collective.
    ///
    /// The file's global cell count must match the forest's; the forest's
    /// partition vector is borrowed for all subsequent field reads, so the
    /// forest must outlive the context.
    pub fn open_read(
        comm: &'a C,
        forest: &'a Forest,
        path: &Path,
    ) -> Result<(FileContext<'a, C>, String), Error> {
        assert!(forest.is_valid());
        assert_eq!(comm.rank(), forest.rank);

        let (mut ctx, user_string, global_num_cells) =
            Self::open_read_ext(comm, forest.dim, path)?;

        if global_num_cells != forest.global_num_cells {
            // Every rank knows both counts; the decision is uniform.
            let err = Error::Format(forestfile_format::FormatError::GlobalCountMismatch {
                in_file: global_num_cells,
                expected: forest.global_num_cells,
            });
            if comm.rank() == 0 {
                log::error!("forestfile: open_read: {err}");
            }
            drop(ctx);
            return Err(err);
        }

        ctx.local_num_cells = forest.local_num_cells;
        ctx.partition = Partition::Borrowed(&forest.gfq);
        Ok((ctx, user_string))
    }

    /// Close the context.  Collective; flushes written data and agrees on
    /// the outcome across ranks.  The context is consumed either way.
    pub fn close(mut self) -> Result<(), Error> {
        let local = if self.writable {
            self.file.sync().map_err(Error::Io)
        } else {
            Ok(())
        };
        sync_all(self.comm, local, "closing the file")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collective plumbing shared by the block operations
// ---------------------------------------------------------------------------

pub(crate) enum OpenMode {
    Create,
    Read,
}

/// Open the file on every rank.  For create, rank 0 truncates first and
/// the other ranks attach afterwards; any rank's failure fails all ranks
/// with a uniform class.
pub(crate) fn open_collective<C: Communicator>(
    comm: &C,
    path: &Path,
    mode: OpenMode,
) -> Result<FileHandle, Error> {
    let local = match mode {
        OpenMode::Create => {
            let root = (comm.rank() == 0).then(|| FileHandle::create(path).map_err(Error::Io));
            let created = sync_root(comm, root, "creating the file")?;
            match created {
                Some(fh) => Ok(fh),
                None => FileHandle::open_write(path).map_err(Error::Io),
            }
        }
        OpenMode::Read => FileHandle::open_read(path).map_err(Error::Io),
    };
    sync_all(comm, local, "opening the file")
}

/// Read and validate the 112-byte file-header region on rank 0.
pub(crate) fn read_file_header(
    file: &mut FileHandle,
    dim: Dim,
) -> Result<ParsedFileHeader, Error> {
    let mut bytes = [0u8; FILE_HEADER_BYTES + BYTE_DIV];
    let count = file.read_at(0, &mut bytes).map_err(Error::Io)?;
    if count != bytes.len() {
        return Err(Error::Count);
    }
    let fixed: [u8; FILE_HEADER_BYTES] = bytes[..FILE_HEADER_BYTES]
        .try_into()
        .expect("fixed-width slice");
    let parsed = ParsedFileHeader::parse(dim, &fixed)?;
    pad::check_pad(&bytes[FILE_HEADER_BYTES..])?;
    Ok(parsed)
}

/// Write `buf` at `offset`, turning a short transfer into a count error.
pub(crate) fn write_all_at(file: &mut FileHandle, offset: u64, buf: &[u8]) -> Result<(), Error> {
    let count = file.write_at(offset, buf).map_err(Error::Io)?;
    if count != buf.len() {
        return Err(Error::Count);
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes at `offset`, turning a short transfer
/// into a count error.
pub(crate) fn read_all_at(file: &mut FileHandle, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
    let count = file.read_at(offset, buf).map_err(Error::Io)?;
    if count != buf.len() {
        return Err(Error::Count);
    }
    Ok(())
}

/// Synchronize the outcome of a rank-0-only phase: rank 0 passes
/// `Some(result)`, the others `None`.  Every rank fails with the same
/// class when rank 0 failed; rank 0 keeps the detailed error and logs
/// one diagnostic line.
pub(crate) fn sync_root<C: Communicator, T>(
    comm: &C,
    local: Option<Result<T, Error>>,
    what: &str,
) -> Result<Option<T>, Error> {
    debug_assert_eq!(local.is_some(), comm.rank() == 0);
    let code = match &local {
        Some(Err(e)) => e.code(),
        _ => 0,
    };
    let mut wire = code.to_le_bytes();
    comm.broadcast(0, &mut wire);
    let code = i32::from_le_bytes(wire);

    if code != 0 {
        return Err(match local {
            Some(Err(e)) => {
                log::error!("forestfile: {what}: {e}");
                e
            }
            _ => Error::from_code(code).expect("nonzero code"),
        });
    }
    Ok(local.map(|r| match r {
        Ok(v) => v,
        Err(_) => unreachable!("code zero implies success"),
    }))
}

/// Synchronize the outcome of a phase every rank executed locally, such
/// as a collective open or payload transfer.  The first failing rank's
/// class is adopted everywhere.
pub(crate) fn sync_all<C: Communicator, T>(
    comm: &C,
    local: Result<T, Error>,
    what: &str,
) -> Result<T, Error> {
    let code = match &local {
        Ok(_) => 0i32,
        Err(e) => e.code(),
    };
    let mut codes = vec![0u8; 4 * comm.size()];
    comm.allgather(&code.to_le_bytes(), &mut codes);
    let first = codes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().expect("wire layout")))
        .find(|&c| c != 0);

    match first {
        None => local,
        Some(peer_code) => Err(match local {
            Err(e) => {
                if comm.rank() == 0 {
                    log::error!("forestfile: {what}: {e}");
                }
                e
            }
            Ok(_) => Error::from_code(peer_code).expect("nonzero code"),
        }),
    }
}

/// Collective count check after a collective payload transfer: if any
/// rank moved fewer bytes than requested, every rank fails with the
/// count class.
pub(crate) fn sync_count<C: Communicator>(
    comm: &C,
    requested: usize,
    transferred: usize,
    what: &str,
) -> Result<(), Error> {
    let short = requested != transferred;
    if comm.allreduce_or(short) {
        if comm.rank() == 0 {
            log::error!("forestfile: {what}: read or write count error");
        }
        return Err(Error::Count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use forestfile_format::FormatError;
    use forestfile_io::spmd;

    #[test]
    fn partition_get() {
        let owned = Partition::Owned(vec![0i64, 3, 6].into_boxed_slice());
        assert_eq!(owned.get(), Some(&[0i64, 3, 6][..]));
        let gfq = [0i64, 6];
        let borrowed = Partition::Borrowed(&gfq);
        assert_eq!(borrowed.get(), Some(&gfq[..]));
        assert_eq!(Partition::Unset.get(), None);
    }

    #[test]
    fn sync_root_spreads_the_class() {
        let classes = spmd(3, |comm| {
            let local = (comm.rank() == 0)
                .then(|| Err::<(), Error>(Error::Format(FormatError::BadPadding)));
            sync_root(&comm, local, "test phase").unwrap_err().class()
        });
        assert!(classes.into_iter().all(|c| c == ErrorClass::Io));
    }

    #[test]
    fn sync_root_success_passes_value_through() {
        let values = spmd(2, |comm| {
            let local = (comm.rank() == 0).then(|| Ok::<i32, Error>(42));
            sync_root(&comm, local, "test phase").unwrap()
        });
        assert_eq!(values[0], Some(42));
        assert_eq!(values[1], None);
    }

    #[test]
    fn sync_all_adopts_first_failure() {
        let classes = spmd(4, |comm| {
            let local: Result<(), Error> = if comm.rank() == 2 {
                Err(Error::Count)
            } else {
                Ok(())
            };
            sync_all(&comm, local, "test phase").unwrap_err().class()
        });
        assert!(classes.into_iter().all(|c| c == ErrorClass::Count));
    }

    #[test]
    fn sync_count_is_collective() {
        let results = spmd(3, |comm| {
            let transferred = if comm.rank() == 1 { 3 } else { 8 };
            sync_count(&comm, 8, transferred, "test phase")
        });
        for r in results {
            assert_eq!(r.unwrap_err().class(), ErrorClass::Count);
        }

        let results = spmd(3, |comm| {
            let _ = comm.rank();
            sync_count(&comm, 8, 8, "test phase")
        });
        assert!(results.into_iter().all(|r| r.is_ok()));
    }
}
