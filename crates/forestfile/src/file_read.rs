//! Reading and skipping header and field blocks.
//!
//! Readers must issue the same sequence of block operations the writer
//! issued; the cursor only moves forward.  Rank 0 reads all block
//! metadata and padding, the parsed bytes are replicated, and every rank
//! validates the same copy, so a malformed block fails identically
//! everywhere.  Skip operations consume a block's metadata and advance by
//! the size declared in the file without touching the payload.

use forestfile_format::block_header::{BlockHeader, BlockType};
use forestfile_format::{pad, FormatError, BLOCK_HEADER_BYTES, BLOCK_SIZE_PREFIX_BYTES};
use forestfile_io::Communicator;

use crate::context::{read_all_at, sync_all, sync_count, sync_root, FileContext};
use crate::error::Error;
use crate::forest::uniform_partition;

/// Outcome of the shared block-metadata step.
struct BlockMeta {
    /// Size field from the file: payload bytes for `H`, element bytes
    /// for `F`.
    size: u64,
    /// User string; empty in skip mode, which never reads it.
    user_string: String,
}

impl<'a, C: Communicator> FileContext<'a, C> {
    /// Read, replicate, and validate the metadata of the next block, then
    /// check its pad framing.
    ///
    /// `expected_size`, when given, is compared against the size field;
    /// `want_user` selects the full 64-byte header versus the 16-byte
    /// prefix a skip needs.
    fn read_block_meta(
        &mut self,
        expected_type: BlockType,
        expected_size: Option<u64>,
        want_user: bool,
    ) -> Result<BlockMeta, Error> {
        let comm = self.comm;
        let to_read = if want_user {
            BLOCK_HEADER_BYTES
        } else {
            BLOCK_SIZE_PREFIX_BYTES
        };

        // Raw metadata bytes on rank 0, then replicated.
        let block_offset = self.block_offset();
        let root = (comm.rank() == 0).then(|| {
            let mut bytes = vec![0u8; to_read];
            read_all_at(&mut self.file, block_offset, &mut bytes).map(|()| bytes)
        });
        let mut bytes = sync_root(comm, root, "reading block metadata")?
            .unwrap_or_else(|| vec![0u8; to_read]);
        comm.broadcast(0, &mut bytes);

        // Every rank validates the same bytes; the outcome is uniform.
        let meta = parse_block_meta(&bytes, expected_type, expected_size, want_user);
        let meta = match meta {
            Ok(meta) => meta,
            Err(e) => {
                let e = Error::Format(e);
                if comm.rank() == 0 {
                    log::error!("forestfile: reading block metadata: {e}");
                }
                return Err(e);
            }
        };

        // Pad framing on rank 0.
        let payload_len = match expected_type {
            BlockType::Header => meta.size,
            BlockType::Field => meta.size * self.global_num_cells as u64,
        };
        let pad_offset = self.payload_offset() + payload_len;
        let root = (comm.rank() == 0).then(|| {
            let mut pad_bytes = vec![0u8; pad::pad_len(payload_len)];
            read_all_at(&mut self.file, pad_offset, &mut pad_bytes)?;
            pad::check_pad(&pad_bytes).map_err(Error::Format)
        });
        sync_root(comm, root, "reading block padding")?;

        Ok(meta)
    }

    /// Rank-0 check that the file is long enough for the payload the
    /// caller is about to read.
    fn check_remaining(&mut self, payload_len: u64) -> Result<(), Error> {
        let needed = self.payload_offset() + payload_len;
        let comm = self.comm;
        let root = (comm.rank() == 0).then(|| {
            let len = self.file.len().map_err(Error::Io)?;
            if len < needed {
                return Err(Error::Format(FormatError::UnexpectedEof {
                    expected: needed as usize,
                    available: len as usize,
                }));
            }
            Ok(())
        });
        sync_root(comm, root, "checking the file size")?;
        Ok(())
    }

    /// Read the next block as a header block of exactly `header_size`
    /// bytes.  Collective; the payload is read on rank 0 and replicated.
    ///
    /// Returns the payload and the block's user string.
    pub fn read_header(mut self, header_size: usize) -> Result<(Self, Vec<u8>, String), Error> {
        assert!(header_size > 0);
        self.check_remaining(header_size as u64)?;
        let meta = self.read_block_meta(BlockType::Header, Some(header_size as u64), true)?;

        let comm = self.comm;
        let payload_offset = self.payload_offset();
        let root = (comm.rank() == 0).then(|| {
            let mut payload = vec![0u8; header_size];
            read_all_at(&mut self.file, payload_offset, &mut payload).map(|()| payload)
        });
        let mut payload = sync_root(comm, root, "reading header data")?
            .unwrap_or_else(|| vec![0u8; header_size]);
        comm.broadcast(0, &mut payload);

        self.advance(header_size as u64);
        Ok((self, payload, meta.user_string))
    }

    /// Consume the next block, which must be a header block, without
    /// reading its payload.  Collective.  The cursor advances by the size
    /// declared in the file.
    pub fn skip_header(mut self) -> Result<Self, Error> {
        let meta = self.read_block_meta(BlockType::Header, None, false)?;
        self.advance(meta.size);
        Ok(self)
    }

    /// Read the next block as a field block of `elem_size` bytes per
    /// cell, striped by the context's partition: the bound forest's at
    /// open-read, or the uniform partition for unbound contexts.
    /// Collective.
    ///
    /// Returns this rank's `local_num_cells * elem_size` payload bytes
    /// and the block's user string.
    pub fn read_field(self, elem_size: usize) -> Result<(Self, Vec<u8>, String), Error> {
        // An unbound context computes the uniform partition for this one
        // call and does not store it.
        let gfq: Vec<i64> = match self.partition.get() {
            Some(gfq) => gfq.to_vec(),
            None => uniform_partition(self.global_num_cells, self.comm.size()),
        };
        self.read_field_with(&gfq, elem_size)
    }

    /// As [`read_field`](FileContext::read_field), but striped by a
    /// caller-supplied partition vector for this call only.
    pub fn read_field_ext(
        self,
        gfq: &[i64],
        elem_size: usize,
    ) -> Result<(Self, Vec<u8>, String), Error> {
        self.read_field_with(gfq, elem_size)
    }

    fn read_field_with(
        mut self,
        gfq: &[i64],
        elem_size: usize,
    ) -> Result<(Self, Vec<u8>, String), Error> {
        assert!(elem_size > 0);
        let comm = self.comm;
        assert_eq!(gfq.len(), comm.size() + 1);
        assert_eq!(gfq[0], 0);
        assert_eq!(gfq[comm.size()], self.global_num_cells);

        let global_payload = self.global_num_cells as u64 * elem_size as u64;
        self.check_remaining(global_payload)?;
        let meta = self.read_block_meta(BlockType::Field, Some(elem_size as u64), true)?;

        let local_count = (gfq[comm.rank() + 1] - gfq[comm.rank()]) as usize;
        let offset = self.payload_offset() + gfq[comm.rank()] as u64 * elem_size as u64;
        let mut payload = vec![0u8; local_count * elem_size];
        let local = self.file.read_at(offset, &mut payload).map_err(Error::Io);
        let transferred = sync_all(comm, local, "reading field payload")?;
        sync_count(comm, payload.len(), transferred, "reading field payload")?;

        self.advance(global_payload);
        Ok((self, payload, meta.user_string))
    }

    /// Consume the next block, which must be a field block, without
    /// reading its payload.  Collective.
    pub fn skip_field(mut self) -> Result<Self, Error> {
        let meta = self.read_block_meta(BlockType::Field, None, false)?;
        self.advance(meta.size * self.global_num_cells as u64);
        Ok(self)
    }

    /// Read a field block of deflated cell records, the inverse of
    /// [`write_cell_records`](FileContext::write_cell_records).
    pub fn read_cell_records(self) -> Result<(Self, Vec<i32>, String), Error> {
        let elem_size = self.words_per_cell() * std::mem::size_of::<i32>();
        let (ctx, bytes, user_string) = self.read_field(elem_size)?;
        let records: Vec<i32> = bytemuck::pod_collect_to_vec(&bytes);
        Ok((ctx, records, user_string))
    }

    /// Null-payload adapter: `None` or `Some(0)` skips the block, any
    /// other size reads it.
    pub fn read_header_opt(
        self,
        header_size: Option<usize>,
    ) -> Result<(Self, Option<(Vec<u8>, String)>), Error> {
        match header_size {
            None | Some(0) => self.skip_header().map(|ctx| (ctx, None)),
            Some(size) => self
                .read_header(size)
                .map(|(ctx, payload, user)| (ctx, Some((payload, user)))),
        }
    }

    /// Null-payload adapter: `None` or `Some(0)` skips the block, any
    /// other element size reads it.
    pub fn read_field_opt(
        self,
        elem_size: Option<usize>,
    ) -> Result<(Self, Option<(Vec<u8>, String)>), Error> {
        match elem_size {
            None | Some(0) => self.skip_field().map(|ctx| (ctx, None)),
            Some(size) => self
                .read_field(size)
                .map(|(ctx, payload, user)| (ctx, Some((payload, user)))),
        }
    }
}

/// Validate replicated block-metadata bytes.  Runs identically on every
/// rank.
fn parse_block_meta(
    bytes: &[u8],
    expected_type: BlockType,
    expected_size: Option<u64>,
    want_user: bool,
) -> Result<BlockMeta, FormatError> {
    let (block_type, size, user_string) = if want_user {
        let fixed: [u8; BLOCK_HEADER_BYTES] =
            bytes.try_into().expect("full block header replicated");
        let header = BlockHeader::parse(&fixed)?;
        (header.block_type, header.size, header.user_string)
    } else {
        let (block_type, size) = BlockHeader::parse_size_prefix(bytes)?;
        (block_type, size, String::new())
    };

    if block_type != expected_type {
        return Err(FormatError::BlockTypeMismatch {
            expected: expected_type.tag(),
            found: block_type.tag(),
        });
    }
    if let Some(expected) = expected_size {
        if size != expected {
            return Err(FormatError::ElemSizeMismatch {
                in_file: size,
                expected,
            });
        }
    }
    Ok(BlockMeta { size, user_string })
}
