//! The 96-byte file header and its trailing 16-byte alignment pad.
//!
//! Layout (offsets in bytes):
//!
//! ```text
//! 0   : 7-byte magic ("p4data0" or "p8data0"), '\n'
//! 8   : 23-byte version string, space padded, '\n'
//! 32  : 47-byte user string, space padded, '\n'
//! 80  : 16-digit zero-padded decimal global cell count, no newline
//! 96  : alignment pad '\n', 14 spaces, '\n'
//! ```
//!
//! The pad after the file header is always present and exactly 16 bytes;
//! its closing newline terminates the cell count line in a text editor.

use crate::error::FormatError;
use crate::pad;
use crate::{
    BYTE_DIV, CELL_COUNT_BYTES, FILE_HEADER_BYTES, MAGIC_BYTES, USER_STRING_BYTES,
    VERSION_STR_BYTES,
};

/// Spatial dimension of the forest a data file belongs to.
///
/// The dimension selects the magic bytes and the record width; there is no
/// other difference between 2D and 3D files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    /// Forest of quadtrees (2D).
    Quad,
    /// Forest of octrees (3D).
    Oct,
}

impl Dim {
    /// The magic bytes identifying a data file of this dimension.
    pub const fn magic(self) -> &'static [u8; MAGIC_BYTES] {
        match self {
            Dim::Quad => b"p4data0",
            Dim::Oct => b"p8data0",
        }
    }

    /// Number of spatial coordinates per cell.
    pub const fn dim(self) -> usize {
        match self {
            Dim::Quad => 2,
            Dim::Oct => 3,
        }
    }

    /// Number of `i32` words in one deflated cell record: the coordinates
    /// followed by the level.
    pub const fn words_per_cell(self) -> usize {
        self.dim() + 1
    }

    /// Number of significant coordinate bits; the root cell has side length
    /// `1 << max_level()`.
    pub const fn max_level(self) -> i8 {
        match self {
            Dim::Quad => 30,
            Dim::Oct => 19,
        }
    }

    /// Deepest refinement level a cell may carry.
    pub const fn max_cell_level(self) -> i8 {
        self.max_level() - 1
    }

    /// Side length of a cell at `level`, in integer coordinates.
    pub const fn cell_len(self, level: i8) -> i32 {
        1 << (self.max_level() - level)
    }
}

/// Content of the version line: crate name and version, truncated to the
/// fixed field width if ever necessary.
pub fn version_line() -> String {
    let mut line = concat!("forestfile ", env!("CARGO_PKG_VERSION")).to_string();
    line.truncate(VERSION_STR_BYTES);
    line
}

/// The writer-side view of a file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Dimension tag selecting the magic bytes.
    pub dim: Dim,
    /// Global number of cells recorded in the file.
    pub global_num_cells: i64,
    /// Free-form user string, at most 47 bytes.
    pub user_string: String,
}

/// The reader-side view of a parsed file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFileHeader {
    /// Version line with trailing spaces removed.  Not interpreted.
    pub version: String,
    /// User string with trailing spaces removed.
    pub user_string: String,
    /// Global number of cells recorded in the file.
    pub global_num_cells: i64,
}

/// Append `field` to `out`, space padded on the right to exactly `width`
/// bytes, truncated if longer.
fn push_padded(out: &mut Vec<u8>, field: &[u8], width: usize) {
    let n = field.len().min(width);
    out.extend_from_slice(&field[..n]);
    out.resize(out.len() + (width - n), b' ');
}

impl FileHeader {
    /// Encode the header and its trailing alignment pad: exactly
    /// [`FILE_HEADER_BYTES`]` + `[`BYTE_DIV`] bytes, no NUL anywhere.
    ///
    /// # Panics
    ///
    /// If the user string exceeds 47 bytes or the cell count is negative;
    /// both are caller errors, not file errors.
    pub fn encode(&self) -> Vec<u8> {
        assert!(
            self.user_string.len() <= USER_STRING_BYTES,
            "user string longer than {USER_STRING_BYTES} bytes"
        );
        assert!(self.global_num_cells >= 0);
        assert!(self.global_num_cells < 10i64.pow(CELL_COUNT_BYTES as u32));

        let mut out = Vec::with_capacity(FILE_HEADER_BYTES + BYTE_DIV);
        out.extend_from_slice(self.dim.magic());
        out.push(b'\n');
        push_padded(&mut out, version_line().as_bytes(), VERSION_STR_BYTES);
        out.push(b'\n');
        push_padded(&mut out, self.user_string.as_bytes(), USER_STRING_BYTES);
        out.push(b'\n');
        out.extend_from_slice(format!("{:016}", self.global_num_cells).as_bytes());
        debug_assert_eq!(out.len(), FILE_HEADER_BYTES);
        out.extend_from_slice(&pad::pad_bytes(FILE_HEADER_BYTES as u64));
        debug_assert_eq!(out.len(), FILE_HEADER_BYTES + BYTE_DIV);
        out
    }
}

impl ParsedFileHeader {
    /// Parse and validate the 96-byte header region against the magic of
    /// the expected dimension.
    pub fn parse(dim: Dim, bytes: &[u8; FILE_HEADER_BYTES]) -> Result<Self, FormatError> {
        // Newlines first: a wrong layout is reported before a wrong magic.
        if bytes[MAGIC_BYTES] != b'\n' {
            return Err(FormatError::MissingNewline {
                offset: MAGIC_BYTES,
            });
        }
        if bytes[..MAGIC_BYTES] != dim.magic()[..] {
            let mut found = [0u8; MAGIC_BYTES];
            found.copy_from_slice(&bytes[..MAGIC_BYTES]);
            return Err(FormatError::MagicMismatch { found });
        }

        let version_start = MAGIC_BYTES + 1;
        let version_end = version_start + VERSION_STR_BYTES;
        if bytes[version_end] != b'\n' {
            return Err(FormatError::MissingNewline {
                offset: version_end,
            });
        }
        let version = &bytes[version_start..version_end];
        if version.contains(&0) {
            return Err(FormatError::BadVersionString);
        }

        let user_start = version_end + 1;
        let user_end = user_start + USER_STRING_BYTES;
        if bytes[user_end] != b'\n' {
            return Err(FormatError::MissingNewline { offset: user_end });
        }
        let user = &bytes[user_start..user_end];

        let count_start = user_end + 1;
        debug_assert_eq!(count_start + CELL_COUNT_BYTES, FILE_HEADER_BYTES);
        let global_num_cells = parse_decimal(&bytes[count_start..FILE_HEADER_BYTES])?;

        Ok(ParsedFileHeader {
            version: trim_field(version),
            user_string: trim_field(user),
            global_num_cells,
        })
    }
}

/// Parse a fixed-width zero-padded decimal field; every byte must be an
/// ASCII digit.
pub(crate) fn parse_decimal(field: &[u8]) -> Result<i64, FormatError> {
    let mut value: i64 = 0;
    for &b in field {
        if !b.is_ascii_digit() {
            return Err(FormatError::SizeNotDecimal);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as i64))
            .ok_or(FormatError::SizeNotDecimal)?;
    }
    Ok(value)
}

/// Strip the space padding of a fixed-width field into an owned string.
pub(crate) fn trim_field(field: &[u8]) -> String {
    String::from_utf8_lossy(field).trim_end_matches(' ').to_string()
}
