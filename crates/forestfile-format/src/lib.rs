//! Byte-level codec for the forestfile parallel data format.
//!
//! A forestfile data file is a fixed 96-byte text file header, a 16-byte
//! alignment pad, and a sequence of blocks.  Every block is a 64-byte text
//! block header, a binary payload, and a pad that rounds the payload up to
//! the next 16-byte boundary.  All text fields are fixed-width, newline
//! terminated, and space padded, so the metadata of a file remains readable
//! when opened in an editor.
//!
//! This crate contains no I/O and no process model: it only encodes and
//! parses the fixed-width header lines and the padding rules.  The parallel
//! protocol on top of it lives in the `forestfile` crate.

pub mod block_header;
pub mod error;
pub mod file_header;
pub mod pad;

pub use block_header::{BlockHeader, BlockType};
pub use error::FormatError;
pub use file_header::{Dim, FileHeader, ParsedFileHeader};

/// Number of magic bytes at the start of a file, excluding the newline.
pub const MAGIC_BYTES: usize = 7;

/// Width of the version line content, excluding the newline.
pub const VERSION_STR_BYTES: usize = 23;

/// Width of a user string field, excluding the newline.
pub const USER_STRING_BYTES: usize = 47;

/// Width of the decimal global cell count at the end of the file header.
pub const CELL_COUNT_BYTES: usize = 16;

/// Total size of the file header: magic, version, user string, cell count.
pub const FILE_HEADER_BYTES: usize =
    (MAGIC_BYTES + 1) + (VERSION_STR_BYTES + 1) + (USER_STRING_BYTES + 1) + CELL_COUNT_BYTES;

/// Every payload is padded so block boundaries land on this alignment.
pub const BYTE_DIV: usize = 16;

/// Upper bound on the pad length produced by [`pad::pad_len`].
pub const MAX_PAD_BYTES: usize = BYTE_DIV + 1;

/// Number of decimal digits in a block header size field.
pub const SIZE_DIGITS: usize = 13;

/// Total size of a block header: type tag, space, size, user string.
pub const BLOCK_HEADER_BYTES: usize = 2 + SIZE_DIGITS + 1 + USER_STRING_BYTES + 1;

/// Shortest block header prefix that contains the type tag and the size
/// field with its terminating newline.  Enough to skip over a block.
pub const BLOCK_SIZE_PREFIX_BYTES: usize = 2 + SIZE_DIGITS + 1;

/// Absolute file offset of the first block: file header plus its pad.
pub const FIRST_BLOCK_OFFSET: usize = FILE_HEADER_BYTES + BYTE_DIV;
