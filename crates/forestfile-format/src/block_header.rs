//! The 64-byte block header preceding every payload.
//!
//! Layout (offsets in bytes):
//!
//! ```text
//! 0      : block type, 'H' or 'F'
//! 1      : ' '
//! 2..15  : 13-digit zero-padded decimal size
//! 15     : '\n'
//! 16..63 : 47-byte user string, space padded
//! 63     : '\n'
//! ```
//!
//! For `H` blocks the size field is the payload size in bytes; for `F`
//! blocks it is the per-cell element size, and the payload length is the
//! global cell count times that size.

use crate::error::FormatError;
use crate::file_header::{parse_decimal, trim_field};
use crate::{BLOCK_HEADER_BYTES, BLOCK_SIZE_PREFIX_BYTES, SIZE_DIGITS, USER_STRING_BYTES};

/// The two kinds of blocks in a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Fixed-size global header block, written and read on rank 0 only.
    Header,
    /// Per-cell field block, striped across ranks by the partition vector.
    Field,
}

impl BlockType {
    /// One-byte tag stored in the file.
    pub const fn tag(self) -> u8 {
        match self {
            BlockType::Header => b'H',
            BlockType::Field => b'F',
        }
    }

    /// Inverse of [`BlockType::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'H' => Some(BlockType::Header),
            b'F' => Some(BlockType::Field),
            _ => None,
        }
    }
}

/// One parsed or to-be-written block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block kind.
    pub block_type: BlockType,
    /// Declared size: payload bytes for `H`, element bytes for `F`.
    pub size: u64,
    /// Free-form user string, at most 47 bytes.
    pub user_string: String,
}

impl BlockHeader {
    /// Encode into the fixed 64-byte layout, no NUL anywhere.
    ///
    /// # Panics
    ///
    /// If the user string exceeds 47 bytes or the size does not fit the
    /// 13-digit field; both are caller errors.
    pub fn encode(&self) -> [u8; BLOCK_HEADER_BYTES] {
        assert!(
            self.user_string.len() <= USER_STRING_BYTES,
            "user string longer than {USER_STRING_BYTES} bytes"
        );
        assert!(self.size < 10u64.pow(SIZE_DIGITS as u32));

        let mut out = [b' '; BLOCK_HEADER_BYTES];
        out[0] = self.block_type.tag();
        let digits = format!("{:013}", self.size);
        out[2..2 + SIZE_DIGITS].copy_from_slice(digits.as_bytes());
        out[BLOCK_SIZE_PREFIX_BYTES - 1] = b'\n';
        let user = self.user_string.as_bytes();
        out[BLOCK_SIZE_PREFIX_BYTES..BLOCK_SIZE_PREFIX_BYTES + user.len()].copy_from_slice(user);
        out[BLOCK_HEADER_BYTES - 1] = b'\n';
        out
    }

    /// Parse the type tag and size from the first 16 bytes of a block
    /// header.  This is all a skip operation needs.
    pub fn parse_size_prefix(bytes: &[u8]) -> Result<(BlockType, u64), FormatError> {
        assert!(bytes.len() >= BLOCK_SIZE_PREFIX_BYTES);
        let block_type =
            BlockType::from_tag(bytes[0]).ok_or(FormatError::UnknownBlockType(bytes[0]))?;
        if bytes[BLOCK_SIZE_PREFIX_BYTES - 1] != b'\n' {
            return Err(FormatError::MissingNewline {
                offset: BLOCK_SIZE_PREFIX_BYTES - 1,
            });
        }
        let size = parse_decimal(&bytes[2..2 + SIZE_DIGITS])? as u64;
        Ok((block_type, size))
    }

    /// Parse and validate a complete 64-byte block header.
    pub fn parse(bytes: &[u8; BLOCK_HEADER_BYTES]) -> Result<Self, FormatError> {
        let (block_type, size) = Self::parse_size_prefix(bytes)?;
        if bytes[BLOCK_HEADER_BYTES - 1] != b'\n' {
            return Err(FormatError::MissingNewline {
                offset: BLOCK_HEADER_BYTES - 1,
            });
        }
        let user_string = trim_field(&bytes[BLOCK_SIZE_PREFIX_BYTES..BLOCK_HEADER_BYTES - 1]);
        Ok(BlockHeader {
            block_type,
            size,
            user_string,
        })
    }
}
