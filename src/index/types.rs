//! On-disk layout constants and core types for the index format.
//!
//! An index file is a fixed header, a file table, and two sorted
//! fixed-record-size key sections:
//!
//! ```text
//! magic(4) flags(4) fileCount(2) primaryCount(4) secondaryCount(4)
//! fileNameLen(4) primaryKeyLen(4) secondaryKeyLen(4)
//! fileRecSize(4) primaryRecSize(4) secondaryRecSize(4)
//! fileSection(4|8) primarySection(4|8) secondarySection(4|8)
//!
//! file record:      name[fileNameLen] format(4) flags(4) bpl(4) rpl(4)
//! primary record:   key[primaryKeyLen] fileHandle(2) recordOffset(4|8)
//!                   dataOffset(4|8) length(4)
//! secondary record: key[secondaryKeyLen] primaryKey[primaryKeyLen]
//! ```
//!
//! Name and key fields are NUL-terminated and zero-padded to their field
//! width, which is the longest stored value plus one. Section offsets use
//! the index-offset width flag; record/data offsets use the data-offset
//! width flag. The two are independent: an index over >2 GiB files can
//! itself stay 32-bit.

use std::path::Path;

use crate::error::{Error, Result};

/// Magic number at the start of every index file.
pub const MAGIC: u32 = 0xF3F3_E9B1;

/// How [`MAGIC`] reads from a file written in the opposite byte order.
pub(crate) const MAGIC_SWAPPED: u32 = MAGIC.swap_bytes();

/// Header flag: record/data offsets into indexed files are 64-bit.
pub const FLAG_DATA_OFFSET_64: u32 = 1 << 0;

/// Header flag: section offsets within the index file itself are 64-bit.
pub const FLAG_INDEX_OFFSET_64: u32 = 1 << 1;

/// File flag: constant line layout; subsequence offsets can be computed.
pub const FILE_FLAG_FAST_SUBSEQ: u32 = 1 << 0;

/// Header size in bytes with 32-bit section offsets.
pub(crate) const HEADER_SIZE_32: u64 = 54;

/// Header size in bytes with 64-bit section offsets.
pub(crate) const HEADER_SIZE_64: u64 = 66;

/// Most files one index can register; handles are 16-bit.
pub const MAX_FILES: usize = u16::MAX as usize;

/// Most keys one section can hold; counts are 32-bit.
pub const MAX_KEYS: u64 = u32::MAX as u64;

/// Widest accepted key or file name, in bytes. Fields this wide multiply
/// into every record of a section, so an oversized width is treated as
/// caller error on build and as corruption on read.
pub const MAX_KEY_WIDTH: u32 = 1 << 20;

/// Width of file positions stored in an index: 32-bit for ordinary files,
/// 64-bit for large ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetMode {
    U32,
    U64,
}

impl OffsetMode {
    /// Serialized width in bytes.
    pub(crate) fn width(self) -> u32 {
        match self {
            OffsetMode::U32 => 4,
            OffsetMode::U64 => 8,
        }
    }

    /// Fail with [`Error::UnsupportedWidth`] if `value` cannot be stored at
    /// this width.
    pub(crate) fn check(self, value: u64) -> Result<()> {
        Offset::new(self, value).map(|_| ())
    }

    /// The narrowest mode able to address every byte of `path`: [`U32`] up
    /// to 2^31−1 bytes, [`U64`] beyond.
    ///
    /// [`U32`]: OffsetMode::U32
    /// [`U64`]: OffsetMode::U64
    pub fn recommended(path: &Path) -> Result<OffsetMode> {
        let meta = std::fs::metadata(path).map_err(|source| Error::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(if meta.len() <= i32::MAX as u64 {
            OffsetMode::U32
        } else {
            OffsetMode::U64
        })
    }
}

/// A file position tagged with its serialized width.
///
/// An offset is always read and written at the width its own tag dictates,
/// never at a width assumed from context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    U32(u32),
    U64(u64),
}

impl Offset {
    /// Wrap `value` for storage at `mode` width.
    pub(crate) fn new(mode: OffsetMode, value: u64) -> Result<Offset> {
        match mode {
            OffsetMode::U32 => u32::try_from(value)
                .map(Offset::U32)
                .map_err(|_| Error::UnsupportedWidth(value)),
            OffsetMode::U64 => Ok(Offset::U64(value)),
        }
    }

    /// The position as a plain integer, whatever its stored width.
    pub fn value(self) -> u64 {
        match self {
            Offset::U32(v) => v as u64,
            Offset::U64(v) => v,
        }
    }

    /// The width this offset was (or will be) stored at.
    pub fn mode(self) -> OffsetMode {
        match self {
            Offset::U32(_) => OffsetMode::U32,
            Offset::U64(_) => OffsetMode::U64,
        }
    }
}

/// Serialized size of one file-table record.
pub(crate) fn file_record_size(name_len: u32) -> u32 {
    name_len + 16
}

/// Serialized size of one primary-key record.
pub(crate) fn primary_record_size(key_len: u32, data_mode: OffsetMode) -> u32 {
    key_len + 2 + 2 * data_mode.width() + 4
}

/// Serialized size of one secondary-key record.
pub(crate) fn secondary_record_size(key_len: u32, primary_key_len: u32) -> u32 {
    key_len + primary_key_len
}

/// Header size for the given index-offset width.
pub(crate) fn header_size(index_mode: OffsetMode) -> u64 {
    match index_mode {
        OffsetMode::U32 => HEADER_SIZE_32,
        OffsetMode::U64 => HEADER_SIZE_64,
    }
}

/// Decoded index header: counts, field widths, record sizes, and section
/// base offsets.
#[derive(Debug, Clone)]
pub(crate) struct Header {
    pub flags: u32,
    pub file_count: u16,
    pub primary_count: u32,
    pub secondary_count: u32,
    pub file_name_len: u32,
    pub primary_key_len: u32,
    pub secondary_key_len: u32,
    pub file_rec_size: u32,
    pub primary_rec_size: u32,
    pub secondary_rec_size: u32,
    pub file_section: u64,
    pub primary_section: u64,
    pub secondary_section: u64,
}

impl Header {
    /// Width of record/data offsets into the indexed files.
    pub fn data_mode(&self) -> OffsetMode {
        if self.flags & FLAG_DATA_OFFSET_64 != 0 {
            OffsetMode::U64
        } else {
            OffsetMode::U32
        }
    }

    /// Width of section offsets within the index file itself.
    pub fn index_mode(&self) -> OffsetMode {
        if self.flags & FLAG_INDEX_OFFSET_64 != 0 {
            OffsetMode::U64
        } else {
            OffsetMode::U32
        }
    }
}

/// A data file registered in the index.
#[derive(Debug, Clone)]
pub struct IndexedFile {
    /// Path as registered at build time.
    pub name: String,
    /// Opaque format tag supplied at registration.
    pub format: u32,
    /// Per-file flag bits ([`FILE_FLAG_FAST_SUBSEQ`]).
    pub flags: u32,
    /// Bytes per data line, 0 when no constant layout was declared.
    pub bytes_per_line: u32,
    /// Residues per data line, 0 when no constant layout was declared.
    pub residues_per_line: u32,
}

impl IndexedFile {
    /// Whether subsequence offsets can be computed for records in this file.
    pub fn fast_subseq(&self) -> bool {
        self.flags & FILE_FLAG_FAST_SUBSEQ != 0
    }
}

/// Where a key's record lives: which file, and at what byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLocation {
    /// Handle of the owning file, for [`file_info`](crate::IndexReader::file_info).
    pub file_handle: u16,
    /// Offset of the start of the record in that file.
    pub record_offset: Offset,
}

/// Resolved position for a subsequence request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubseqLocation {
    /// Handle of the owning file.
    pub file_handle: u16,
    /// Offset of the start of the whole record.
    pub record_offset: Offset,
    /// Offset of the requested residue, or of the start of the line holding
    /// it when the layout carries non-sequence bytes per line.
    pub data_offset: Offset,
    /// Coordinate (1..=L) of the first residue at `data_offset`; always at
    /// most the requested start.
    pub actual_start: u32,
}
