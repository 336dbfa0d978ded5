//! Writing header and field blocks.
//!
//! Writes are append-only: each call emits one block at the current
//! logical cursor and advances it identically on every rank.  Rank 0
//! writes all block metadata and padding; field payloads are written by
//! every rank at its partition offset.

use forestfile_format::block_header::{BlockHeader, BlockType};
use forestfile_format::{pad, USER_STRING_BYTES};
use forestfile_io::Communicator;

use crate::context::{sync_all, sync_count, sync_root, write_all_at, FileContext};
use crate::error::Error;

impl<'a, C: Communicator> FileContext<'a, C> {
    /// Write one header block: `data` on rank 0, cursor advance on all
    /// ranks.  Collective.
    ///
    /// An empty `data` writes nothing and leaves the cursor untouched.
    /// On failure the context is consumed and the file is closed on every
    /// rank.
    ///
    /// # Panics
    ///
    /// If the user string exceeds 47 bytes.
    pub fn write_header(mut self, data: &[u8], user_string: &str) -> Result<Self, Error> {
        assert!(user_string.len() <= USER_STRING_BYTES);
        if data.is_empty() {
            return Ok(self);
        }

        let header = BlockHeader {
            block_type: BlockType::Header,
            size: data.len() as u64,
            user_string: user_string.to_string(),
        };

        let comm = self.comm;
        let root = (comm.rank() == 0).then(|| {
            let block_offset = self.block_offset();
            let payload_offset = self.payload_offset();
            write_all_at(&mut self.file, block_offset, &header.encode())?;
            write_all_at(&mut self.file, payload_offset, data)?;
            let pad = pad::pad_bytes(data.len() as u64);
            write_all_at(&mut self.file, payload_offset + data.len() as u64, &pad)
        });
        sync_root(comm, root, "writing a header block")?;

        self.advance(data.len() as u64);
        Ok(self)
    }

    /// Write one field block: every rank contributes its
    /// `local_num_cells * elem_size` bytes at its partition offset.
    /// Collective.
    ///
    /// A zero `elem_size` writes nothing and leaves the cursor untouched.
    ///
    /// # Panics
    ///
    /// If `data` does not hold exactly the local payload, or the user
    /// string exceeds 47 bytes.
    pub fn write_field(
        mut self,
        elem_size: usize,
        data: &[u8],
        user_string: &str,
    ) -> Result<Self, Error> {
        assert!(user_string.len() <= USER_STRING_BYTES);
        if elem_size == 0 {
            return Ok(self);
        }
        assert_eq!(data.len(), elem_size * self.local_num_cells as usize);

        let comm = self.comm;
        let global_payload = self.global_num_cells as u64 * elem_size as u64;

        // Block metadata on rank 0.
        let header = BlockHeader {
            block_type: BlockType::Field,
            size: elem_size as u64,
            user_string: user_string.to_string(),
        };
        let root = (comm.rank() == 0).then(|| {
            let block_offset = self.block_offset();
            write_all_at(&mut self.file, block_offset, &header.encode())
        });
        sync_root(comm, root, "writing a field block header")?;

        // Payload on every rank, striped by the partition vector.
        let gfq = self
            .partition
            .get()
            .expect("write context always carries a partition");
        let rank_offset = gfq[comm.rank()] as u64 * elem_size as u64;
        let offset = self.payload_offset() + rank_offset;
        let local = self.file.write_at(offset, data).map_err(Error::Io);
        let transferred = sync_all(comm, local, "writing field payload")?;
        sync_count(comm, data.len(), transferred, "writing field payload")?;

        // Padding on rank 0.
        let root = (comm.rank() == 0).then(|| {
            let pad = pad::pad_bytes(global_payload);
            let offset = self.payload_offset() + global_payload;
            write_all_at(&mut self.file, offset, &pad)
        });
        sync_root(comm, root, "writing field padding")?;

        self.advance(global_payload);
        Ok(self)
    }

    /// Write the deflated cell records of this context's forest as one
    /// field block with element size `(dim + 1) * 4` bytes.  Collective.
    pub fn write_cell_records(self, records: &[i32], user_string: &str) -> Result<Self, Error> {
        let elem_size = self.words_per_cell() * std::mem::size_of::<i32>();
        let bytes: &[u8] = bytemuck::cast_slice(records);
        self.write_field(elem_size, bytes, user_string)
    }

    pub(crate) fn words_per_cell(&self) -> usize {
        self.dim.words_per_cell()
    }
}
