//! Error types for the collective file protocol.
//!
//! Three things can go wrong: the file does not match the format
//! ([`Error::Format`], class `Io`), a transfer moved fewer bytes than
//! requested ([`Error::Count`], its own class, never folded into an I/O
//! class), or the operating system refused the operation ([`Error::Io`],
//! class preserved from the underlying kind).  When rank 0 detects an
//! error, only its class crosses the communicator; the other ranks then
//! fail with [`Error::Peer`] of the same class, so every rank agrees.

use std::fmt;
use std::io;

use forestfile_format::FormatError;

/// The canonical error class shared by all ranks of a failed collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed file content: header, block header, pad, or size
    /// mismatch.
    Io,
    /// A read or write transferred fewer bytes than requested.
    Count,
    /// An error class of the underlying I/O layer, passed through.
    Sys(io::ErrorKind),
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Io => write!(f, "file format error"),
            ErrorClass::Count => write!(f, "read or write count error"),
            ErrorClass::Sys(kind) => write!(f, "{kind}"),
        }
    }
}

/// Any error surfaced by a collective file operation.
#[derive(Debug)]
pub enum Error {
    /// The file does not conform to the format.
    Format(FormatError),
    /// Partial read or write.
    Count,
    /// Underlying I/O failure on this rank.
    Io(io::Error),
    /// A failure detected on another rank; only its class is known here.
    Peer(ErrorClass),
}

impl Error {
    /// The canonical class of this error, identical on every rank of a
    /// failed collective.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Format(_) => ErrorClass::Io,
            Error::Count => ErrorClass::Count,
            Error::Io(e) => ErrorClass::Sys(e.kind()),
            Error::Peer(class) => *class,
        }
    }

    /// Encode the class as a nonzero integer for broadcasting.  Zero is
    /// reserved for success.
    pub(crate) fn code(&self) -> i32 {
        class_code(self.class())
    }

    /// Decode a broadcast code back into an error; `0` means success.
    pub(crate) fn from_code(code: i32) -> Option<Error> {
        code_class(code).map(Error::Peer)
    }
}

fn class_code(class: ErrorClass) -> i32 {
    match class {
        ErrorClass::Io => 1,
        ErrorClass::Count => 2,
        ErrorClass::Sys(kind) => match kind {
            io::ErrorKind::NotFound => 10,
            io::ErrorKind::PermissionDenied => 11,
            io::ErrorKind::AlreadyExists => 12,
            io::ErrorKind::InvalidInput => 13,
            io::ErrorKind::UnexpectedEof => 14,
            io::ErrorKind::WriteZero => 15,
            _ => 16,
        },
    }
}

fn code_class(code: i32) -> Option<ErrorClass> {
    match code {
        0 => None,
        1 => Some(ErrorClass::Io),
        2 => Some(ErrorClass::Count),
        10 => Some(ErrorClass::Sys(io::ErrorKind::NotFound)),
        11 => Some(ErrorClass::Sys(io::ErrorKind::PermissionDenied)),
        12 => Some(ErrorClass::Sys(io::ErrorKind::AlreadyExists)),
        13 => Some(ErrorClass::Sys(io::ErrorKind::InvalidInput)),
        14 => Some(ErrorClass::Sys(io::ErrorKind::UnexpectedEof)),
        15 => Some(ErrorClass::Sys(io::ErrorKind::WriteZero)),
        _ => Some(ErrorClass::Sys(io::ErrorKind::Other)),
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Format(e) => write!(f, "file format error: {e}"),
            Error::Count => write!(f, "read or write count error"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Peer(class) => write!(f, "error on a peer rank: {class}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Format(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Format(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
