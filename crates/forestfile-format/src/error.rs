//! Error type for format encoding and parsing.

use core::fmt;

use crate::MAGIC_BYTES;

/// Errors raised when a file or block header does not match the fixed
/// layout, or when declared sizes disagree with the caller's expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The magic bytes do not match the expected dimension tag.
    MagicMismatch {
        /// The seven bytes found at the start of the file.
        found: [u8; MAGIC_BYTES],
    },
    /// A terminating newline is absent at its fixed offset.
    MissingNewline {
        /// Offset of the missing newline within the header region.
        offset: usize,
    },
    /// The version line contains NUL bytes and cannot have been produced
    /// by a conforming writer.
    BadVersionString,
    /// A fixed-width decimal size field contains a non-digit byte.
    SizeNotDecimal,
    /// The block type tag is neither `H` nor `F`.
    UnknownBlockType(u8),
    /// The block type tag differs from the type the caller asked for.
    BlockTypeMismatch {
        /// The type the caller expected.
        expected: u8,
        /// The type found in the file.
        found: u8,
    },
    /// The element size recorded in a field block differs from the
    /// caller's element size.
    ElemSizeMismatch {
        /// The size recorded in the file.
        in_file: u64,
        /// The size the caller expected.
        expected: u64,
    },
    /// The global cell count recorded in the file differs from the count
    /// of the forest the file was opened against.
    GlobalCountMismatch {
        /// The count recorded in the file.
        in_file: i64,
        /// The count of the bound forest.
        expected: i64,
    },
    /// A pad region does not start and end with a newline byte.
    BadPadding,
    /// The file ends before a complete header, payload, or pad.
    UnexpectedEof {
        /// Number of bytes required.
        expected: usize,
        /// Number of bytes actually present.
        available: usize,
    },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::MagicMismatch { found } => {
                write!(f, "wrong magic number: {}", String::from_utf8_lossy(found))
            }
            FormatError::MissingNewline { offset } => {
                write!(f, "missing newline at header offset {offset}")
            }
            FormatError::BadVersionString => {
                write!(f, "malformed version line in file header")
            }
            FormatError::SizeNotDecimal => {
                write!(f, "size field is not a fixed-width decimal")
            }
            FormatError::UnknownBlockType(t) => {
                write!(f, "unknown block type {:?}", char::from(*t))
            }
            FormatError::BlockTypeMismatch { expected, found } => {
                write!(
                    f,
                    "wrong block type: expected {:?}, found {:?}",
                    char::from(*expected),
                    char::from(*found)
                )
            }
            FormatError::ElemSizeMismatch { in_file, expected } => {
                write!(
                    f,
                    "wrong element size: in file = {in_file}, by parameter = {expected}"
                )
            }
            FormatError::GlobalCountMismatch { in_file, expected } => {
                write!(
                    f,
                    "global cell count mismatch: in file = {in_file}, by parameter = {expected}"
                )
            }
            FormatError::BadPadding => write!(f, "wrong padding format"),
            FormatError::UnexpectedEof {
                expected,
                available,
            } => {
                write!(f, "file too short: need {expected} bytes, have {available}")
            }
        }
    }
}

impl std::error::Error for FormatError {}
