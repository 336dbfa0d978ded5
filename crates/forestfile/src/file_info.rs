//! Listing the blocks of a data file without reading payloads.
//!
//! `file_info` opens the file on its own, walks the chain of block
//! headers on rank 0, and replicates the resulting section list.  The
//! walk stops quietly at the first incomplete or malformed block, so a
//! truncated file reports exactly its intact prefix.

use std::path::Path;

use forestfile_format::block_header::{BlockHeader, BlockType};
use forestfile_format::file_header::ParsedFileHeader;
use forestfile_format::{
    pad, FormatError, BLOCK_HEADER_BYTES, BYTE_DIV, FILE_HEADER_BYTES, FIRST_BLOCK_OFFSET,
    USER_STRING_BYTES,
};
use forestfile_io::{Communicator, FileHandle};

use crate::context::{open_collective, sync_all, sync_root, OpenMode};
use crate::error::Error;
use crate::forest::Forest;

/// Metadata of one block found in a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    /// Block kind.
    pub block_type: BlockType,
    /// Declared size: payload bytes for `H`, element bytes for `F`.
    pub data_size: u64,
    /// The block's user string.
    pub user_string: String,
}

/// List the blocks of the file at `path`, which must record the same
/// global cell count as `forest`.  Collective.
///
/// Returns the file's user string and one entry per complete block.
pub fn file_info<C: Communicator>(
    comm: &C,
    forest: &Forest,
    path: &Path,
) -> Result<(String, Vec<SectionInfo>), Error> {
    assert!(forest.is_valid());

    let mut file = open_collective(comm, path, OpenMode::Read)?;

    // File header on rank 0, replicated raw, validated everywhere.
    let root = (comm.rank() == 0).then(|| {
        let mut bytes = vec![0u8; FILE_HEADER_BYTES + BYTE_DIV];
        let count = file.read_at(0, &mut bytes).map_err(Error::Io)?;
        if count != bytes.len() {
            return Err(Error::Count);
        }
        Ok(bytes)
    });
    let mut header_bytes = sync_root(comm, root, "reading the file header")?
        .unwrap_or_else(|| vec![0u8; FILE_HEADER_BYTES + BYTE_DIV]);
    comm.broadcast(0, &mut header_bytes);

    let fixed: [u8; FILE_HEADER_BYTES] = header_bytes[..FILE_HEADER_BYTES]
        .try_into()
        .expect("fixed-width slice");
    let parsed = match ParsedFileHeader::parse(forest.dim, &fixed)
        .and_then(|parsed| pad::check_pad(&header_bytes[FILE_HEADER_BYTES..]).map(|()| parsed))
    {
        Ok(parsed) => parsed,
        Err(e) => {
            let e = Error::Format(e);
            if comm.rank() == 0 {
                log::error!("forestfile: file_info: {e}");
            }
            return Err(e);
        }
    };

    if parsed.global_num_cells != forest.global_num_cells {
        let e = Error::Format(FormatError::GlobalCountMismatch {
            in_file: parsed.global_num_cells,
            expected: forest.global_num_cells,
        });
        if comm.rank() == 0 {
            log::error!("forestfile: file_info: {e}");
        }
        return Err(e);
    }

    // Walk the block chain on rank 0.
    let root = (comm.rank() == 0).then(|| scan_sections(&mut file, forest.global_num_cells));
    let sections = sync_root(comm, root, "scanning data sections")?;

    // Replicate the section list.
    let mut wire = encode_sections(sections.as_deref().unwrap_or(&[]));
    let mut len = (wire.len() as u64).to_le_bytes();
    comm.broadcast(0, &mut len);
    wire.resize(u64::from_le_bytes(len) as usize, 0);
    comm.broadcast(0, &mut wire);
    let sections = decode_sections(&wire);

    sync_all(comm, Ok::<(), Error>(()), "closing the file")?;
    Ok((parsed.user_string, sections))
}

/// Read block headers until the file ends or a block is incomplete.
/// Only I/O failures are errors; malformed content ends the scan.
fn scan_sections(file: &mut FileHandle, global_num_cells: i64) -> Result<Vec<SectionInfo>, Error> {
    let mut sections = Vec::new();
    let mut position = FIRST_BLOCK_OFFSET as u64;

    loop {
        let mut header_bytes = [0u8; BLOCK_HEADER_BYTES];
        let count = file.read_at(position, &mut header_bytes).map_err(Error::Io)?;
        if count != BLOCK_HEADER_BYTES {
            break;
        }

        let header = match BlockHeader::parse(&header_bytes) {
            Ok(header) => header,
            Err(_) => break,
        };

        let payload_len = match header.block_type {
            BlockType::Header => header.size,
            BlockType::Field => header.size * global_num_cells as u64,
        };
        let pad_len = pad::pad_len(payload_len);

        // The pad must be present and well formed for the block to count.
        let mut pad_bytes = vec![0u8; pad_len];
        let pad_position = position + BLOCK_HEADER_BYTES as u64 + payload_len;
        let count = file.read_at(pad_position, &mut pad_bytes).map_err(Error::Io)?;
        if count != pad_len || pad::check_pad(&pad_bytes).is_err() {
            log::error!(
                "forestfile: file_info: stopping the scan at a block with wrong padding"
            );
            break;
        }

        sections.push(SectionInfo {
            block_type: header.block_type,
            data_size: header.size,
            user_string: header.user_string,
        });
        position = pad_position + pad_len as u64;
    }

    Ok(sections)
}

/// Fixed-width wire form of a section list: tag, size, user string.
fn encode_sections(sections: &[SectionInfo]) -> Vec<u8> {
    let entry = 1 + 8 + USER_STRING_BYTES;
    let mut wire = Vec::with_capacity(sections.len() * entry);
    for section in sections {
        wire.push(section.block_type.tag());
        wire.extend_from_slice(&section.data_size.to_le_bytes());
        let mut user = [b' '; USER_STRING_BYTES];
        user[..section.user_string.len()].copy_from_slice(section.user_string.as_bytes());
        wire.extend_from_slice(&user);
    }
    wire
}

fn decode_sections(wire: &[u8]) -> Vec<SectionInfo> {
    let entry = 1 + 8 + USER_STRING_BYTES;
    debug_assert_eq!(wire.len() % entry, 0);
    wire.chunks_exact(entry)
        .map(|chunk| SectionInfo {
            block_type: BlockType::from_tag(chunk[0]).expect("validated on rank 0"),
            data_size: u64::from_le_bytes(chunk[1..9].try_into().expect("wire layout")),
            user_string: String::from_utf8_lossy(&chunk[9..])
                .trim_end_matches(' ')
                .to_string(),
        })
        .collect()
}
