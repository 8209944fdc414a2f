//! Error types for index building and lookup.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while building or querying an index.
///
/// Lookup misses ([`Error::NoSuchKey`]) are ordinary, recoverable outcomes;
/// nothing here terminates the process.
#[derive(Error, Debug)]
pub enum Error {
    /// The index (or spill) file could not be opened
    #[error("file not found: {}: {source}", .path.display())]
    FileNotFound { path: PathBuf, source: io::Error },

    /// The leading magic word is neither the canonical value nor its
    /// byte-swapped counterpart
    #[error("not an index file (bad magic {0:#010x})")]
    BadMagic(u32),

    /// Structurally inconsistent index
    #[error("corrupt index: {0}")]
    BadFormat(&'static str),

    /// An offset too wide for the 32-bit offset mode of this build
    #[error("offset {0} does not fit a 32-bit offset index")]
    UnsupportedWidth(u64),

    /// Repositioning a stream failed
    #[error("seek failed: {0}")]
    Seek(#[source] io::Error),

    /// Querying a stream position failed
    #[error("file position query failed: {0}")]
    PositionQuery(#[source] io::Error),

    /// A read came up short (truncated index)
    #[error("short read: {0}")]
    ShortRead(#[source] io::Error),

    /// A write to the index or spill stream failed
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// The key is in neither the primary nor the secondary section
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// More files than 16-bit handles can address
    #[error("too many files in one index")]
    TooManyFiles,

    /// More keys than 32-bit counts can address
    #[error("too many keys in one index")]
    TooManyKeys,

    /// The file owning the key was not indexed with a constant line layout
    #[error("no fast subsequence support for this file")]
    SubseqUnsupported,

    /// A position or ordinal outside its valid range
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// An argument failed validation
    #[error("bad argument: {0}")]
    BadArgument(String),
}

impl Error {
    /// Lookup miss for `key` (lossily decoded for display).
    pub(crate) fn no_such_key(key: &[u8]) -> Self {
        Error::NoSuchKey(String::from_utf8_lossy(key).into_owned())
    }

    pub(crate) fn out_of_range(msg: impl Into<String>) -> Self {
        Error::OutOfRange(msg.into())
    }

    pub(crate) fn bad_argument(msg: impl Into<String>) -> Self {
        Error::BadArgument(msg.into())
    }
}
