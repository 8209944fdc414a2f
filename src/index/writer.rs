//! Index construction: accumulate key records in memory, spill oversized
//! builds to temporary chunks, and serialize the final sorted index.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};
use crate::index::merge::merge_spilled;
use crate::index::types::{
    FILE_FLAG_FAST_SUBSEQ, FLAG_DATA_OFFSET_64, FLAG_INDEX_OFFSET_64, HEADER_SIZE_32,
    HEADER_SIZE_64, MAGIC, MAX_FILES, MAX_KEY_WIDTH, MAX_KEYS, Offset, OffsetMode,
    file_record_size, header_size, primary_record_size, secondary_record_size,
};
use crate::utils::encoding::{write_offset, write_u16, write_u32};

/// In-memory section size (bytes) past which a build spills to disk.
pub const DEFAULT_SPILL_THRESHOLD: u64 = 1 << 30;

/// A registered data file.
pub(crate) struct FileEntry {
    pub name: String,
    pub format: u32,
    pub bytes_per_line: u32,
    pub residues_per_line: u32,
}

/// One primary-key record awaiting serialization.
pub(crate) struct PrimaryKey {
    pub key: Vec<u8>,
    pub file_handle: u16,
    pub record_offset: u64,
    pub data_offset: u64,
    pub length: u32,
}

/// One secondary-key record awaiting serialization.
pub(crate) struct SecondaryKey {
    pub key: Vec<u8>,
    pub primary_key: Vec<u8>,
}

/// Spill state for a build too large to sort in one pass: sorted,
/// self-contained chunks appended to one temp file at recorded offsets.
pub(crate) struct Spill {
    pub file: NamedTempFile,
    pub chunk_offsets: Vec<u64>,
    pub primary_total: u64,
    pub secondary_total: u64,
}

/// Accumulates primary/secondary key records and writes them out as one
/// sorted binary index.
///
/// A builder is a single-use session: register files, add keys, then call
/// [`finalize`](IndexBuilder::finalize) exactly once. Duplicate primary
/// keys are accepted and preserved; name lookups on a duplicated key are
/// ambiguous (all copies stay reachable by ordinal).
pub struct IndexBuilder {
    data_mode: OffsetMode,
    spill_threshold: u64,
    pub(crate) files: Vec<FileEntry>,
    primary: Vec<PrimaryKey>,
    secondary: Vec<SecondaryKey>,
    // Serialized field widths: max stored length + 1 for the terminator.
    // Global across spill chunks (never reset), so the final header's
    // geometry is known without a second pass.
    pub(crate) file_name_len: u32,
    pub(crate) primary_key_len: u32,
    pub(crate) secondary_key_len: u32,
    spill: Option<Spill>,
}

impl IndexBuilder {
    /// New build session. `data_mode` fixes the width of record/data
    /// offsets into the indexed files for the whole build; see
    /// [`OffsetMode::recommended`].
    pub fn new(data_mode: OffsetMode) -> IndexBuilder {
        IndexBuilder::with_spill_threshold(data_mode, DEFAULT_SPILL_THRESHOLD)
    }

    /// New build session that spills once the estimated serialized size
    /// reaches `threshold` bytes.
    pub fn with_spill_threshold(data_mode: OffsetMode, threshold: u64) -> IndexBuilder {
        IndexBuilder {
            data_mode,
            spill_threshold: threshold,
            files: Vec::new(),
            primary: Vec::new(),
            secondary: Vec::new(),
            file_name_len: 0,
            primary_key_len: 0,
            secondary_key_len: 0,
            spill: None,
        }
    }

    /// Register a data file, returning its stable handle (the registration
    /// index). `format` is an opaque tag stored for the retrieval tools.
    pub fn register_file(&mut self, name: &str, format: u32) -> Result<u16> {
        if self.files.len() >= MAX_FILES {
            return Err(Error::TooManyFiles);
        }
        let width = field_width(name.as_bytes())?;
        self.file_name_len = self.file_name_len.max(width);

        let handle = self.files.len() as u16;
        self.files.push(FileEntry {
            name: name.to_owned(),
            format,
            bytes_per_line: 0,
            residues_per_line: 0,
        });
        Ok(handle)
    }

    /// Declare a constant line layout for `handle`, enabling subsequence
    /// lookups into that file. The caller must be sure `bytes_per_line`
    /// and `residues_per_line` hold on every data line of every record in
    /// the file, except possibly each record's last line; this is not
    /// checked here.
    pub fn set_fast_subseq(
        &mut self,
        handle: u16,
        bytes_per_line: u32,
        residues_per_line: u32,
    ) -> Result<()> {
        if bytes_per_line == 0 || residues_per_line == 0 {
            return Err(Error::bad_argument("line layout parameters must be positive"));
        }
        let entry = self
            .files
            .get_mut(handle as usize)
            .ok_or_else(|| Error::bad_argument(format!("no file with handle {handle}")))?;
        entry.bytes_per_line = bytes_per_line;
        entry.residues_per_line = residues_per_line;
        Ok(())
    }

    /// Add a primary key: `record_offset` is the start of the record in the
    /// file behind `handle`. `data` optionally carries the offset of the
    /// first data line and the record's residue count, used only for
    /// subsequence lookups on files with a declared line layout.
    pub fn add_primary_key(
        &mut self,
        key: &[u8],
        handle: u16,
        record_offset: u64,
        data: Option<(u64, u32)>,
    ) -> Result<()> {
        if handle as usize >= self.files.len() {
            return Err(Error::bad_argument(format!("no file with handle {handle}")));
        }
        let width = field_width(key)?;
        if self.primary_count_total() >= MAX_KEYS {
            return Err(Error::TooManyKeys);
        }
        self.data_mode.check(record_offset)?;
        if let Some((data_offset, _)) = data {
            self.data_mode.check(data_offset)?;
        }

        if self.estimated_size() >= self.spill_threshold {
            self.write_chunk()?;
        }

        self.primary_key_len = self.primary_key_len.max(width);
        // Without subsequence data the record still needs a valid-looking
        // offset field; the record offset with length 0 marks "none".
        let (data_offset, length) = data.unwrap_or((record_offset, 0));
        self.primary.push(PrimaryKey {
            key: key.to_vec(),
            file_handle: handle,
            record_offset,
            data_offset,
            length,
        });
        Ok(())
    }

    /// Add a secondary key: an alias resolving to `primary_key` by name at
    /// lookup time. The reference is not validated against the primary set;
    /// a dangling alias simply misses.
    pub fn add_secondary_key(&mut self, key: &[u8], primary_key: &[u8]) -> Result<()> {
        let key_width = field_width(key)?;
        let referenced_width = field_width(primary_key)?;
        if self.secondary_count_total() >= MAX_KEYS {
            return Err(Error::TooManyKeys);
        }

        self.secondary_key_len = self.secondary_key_len.max(key_width);
        // The referenced name is serialized at primary-key width, so it
        // must count toward that width too.
        self.primary_key_len = self.primary_key_len.max(referenced_width);
        self.secondary.push(SecondaryKey {
            key: key.to_vec(),
            primary_key: primary_key.to_vec(),
        });
        Ok(())
    }

    /// Sort, serialize, and write the complete index to `path`, consuming
    /// the builder. Spilled builds are merged chunk-wise; the output is
    /// byte-identical either way.
    pub fn finalize(mut self, path: &Path) -> Result<()> {
        if self.spill.is_some() {
            if !self.primary.is_empty() || !self.secondary.is_empty() {
                self.write_chunk()?;
            }
            if let Some(spill) = self.spill.take() {
                return merge_spilled(&self, &spill, path);
            }
        }

        self.primary.sort_by(|a, b| a.key.cmp(&b.key));
        self.secondary.sort_by(|a, b| a.key.cmp(&b.key));

        let file = File::create(path).map_err(Error::Write)?;
        let mut out = BufWriter::new(file);
        write_index(
            &mut out,
            &self.files,
            &self.primary,
            &self.secondary,
            self.file_name_len,
            self.primary_key_len,
            self.secondary_key_len,
            self.data_mode,
        )?;
        out.flush().map_err(Error::Write)
    }

    /// Width of record/data offsets for this build.
    pub fn data_mode(&self) -> OffsetMode {
        self.data_mode
    }

    fn primary_count_total(&self) -> u64 {
        self.primary.len() as u64 + self.spill.as_ref().map_or(0, |s| s.primary_total)
    }

    fn secondary_count_total(&self) -> u64 {
        self.secondary.len() as u64 + self.spill.as_ref().map_or(0, |s| s.secondary_total)
    }

    /// Serialized size of the sections as they stand, assuming the wide
    /// header. Drives the spill decision.
    fn estimated_size(&self) -> u64 {
        let file_rec = file_record_size(self.file_name_len) as u64;
        let primary_rec = primary_record_size(self.primary_key_len, self.data_mode) as u64;
        let secondary_rec =
            secondary_record_size(self.secondary_key_len, self.primary_key_len) as u64;
        HEADER_SIZE_64
            + file_rec * self.files.len() as u64
            + primary_rec * self.primary.len() as u64
            + secondary_rec * self.secondary.len() as u64
    }

    /// Sort the in-memory key buffers and append them to the spill file as
    /// a self-contained chunk, then reset the buffers. The file table and
    /// field widths persist across chunks.
    fn write_chunk(&mut self) -> Result<()> {
        self.primary.sort_by(|a, b| a.key.cmp(&b.key));
        self.secondary.sort_by(|a, b| a.key.cmp(&b.key));

        let mut spill = match self.spill.take() {
            Some(spill) => spill,
            None => Spill {
                file: NamedTempFile::new().map_err(Error::Write)?,
                chunk_offsets: Vec::new(),
                primary_total: 0,
                secondary_total: 0,
            },
        };

        let start = spill
            .file
            .as_file_mut()
            .stream_position()
            .map_err(Error::PositionQuery)?;
        debug!(
            chunk = spill.chunk_offsets.len(),
            primary = self.primary.len(),
            secondary = self.secondary.len(),
            "spilling index chunk"
        );
        spill.chunk_offsets.push(start);

        let mut out = BufWriter::new(spill.file.as_file_mut());
        write_index(
            &mut out,
            &self.files,
            &self.primary,
            &self.secondary,
            self.file_name_len,
            self.primary_key_len,
            self.secondary_key_len,
            self.data_mode,
        )?;
        out.flush().map_err(Error::Write)?;
        drop(out);

        spill.primary_total += self.primary.len() as u64;
        spill.secondary_total += self.secondary.len() as u64;
        self.primary.clear();
        self.secondary.clear();
        self.spill = Some(spill);
        Ok(())
    }
}

/// Validate a key or name and return its serialized field width
/// (length + 1 for the terminator).
fn field_width(bytes: &[u8]) -> Result<u32> {
    if bytes.contains(&0) {
        return Err(Error::bad_argument("keys and names cannot contain NUL bytes"));
    }
    let width = u32::try_from(bytes.len() + 1)
        .map_err(|_| Error::bad_argument("key or name too long"))?;
    if width > MAX_KEY_WIDTH {
        return Err(Error::bad_argument("key or name too long"));
    }
    Ok(width)
}

/// Section geometry for one serialized index.
pub(crate) struct SectionLayout {
    pub flags: u32,
    pub index_mode: OffsetMode,
    pub file_rec_size: u32,
    pub primary_rec_size: u32,
    pub secondary_rec_size: u32,
    pub file_section: u64,
    pub primary_section: u64,
    pub secondary_section: u64,
}

/// Compute record sizes, flags, and section offsets. The index-offset
/// width is 64-bit only when the serialized index itself would extend past
/// the 32-bit range; it is independent of the data-offset width.
pub(crate) fn compute_layout(
    file_count: usize,
    primary_count: u64,
    secondary_count: u64,
    file_name_len: u32,
    primary_key_len: u32,
    secondary_key_len: u32,
    data_mode: OffsetMode,
) -> SectionLayout {
    let file_rec_size = file_record_size(file_name_len);
    let primary_rec_size = primary_record_size(primary_key_len, data_mode);
    let secondary_rec_size = secondary_record_size(secondary_key_len, primary_key_len);

    let body = file_rec_size as u64 * file_count as u64
        + primary_rec_size as u64 * primary_count
        + secondary_rec_size as u64 * secondary_count;
    let index_mode = if HEADER_SIZE_32 + body > u32::MAX as u64 {
        OffsetMode::U64
    } else {
        OffsetMode::U32
    };

    let mut flags = 0;
    if data_mode == OffsetMode::U64 {
        flags |= FLAG_DATA_OFFSET_64;
    }
    if index_mode == OffsetMode::U64 {
        flags |= FLAG_INDEX_OFFSET_64;
    }

    let file_section = header_size(index_mode);
    let primary_section = file_section + file_rec_size as u64 * file_count as u64;
    let secondary_section = primary_section + primary_rec_size as u64 * primary_count;

    SectionLayout {
        flags,
        index_mode,
        file_rec_size,
        primary_rec_size,
        secondary_rec_size,
        file_section,
        primary_section,
        secondary_section,
    }
}

/// Write the fixed header.
pub(crate) fn write_header<W: Write>(
    out: &mut W,
    layout: &SectionLayout,
    file_count: u16,
    primary_count: u32,
    secondary_count: u32,
    file_name_len: u32,
    primary_key_len: u32,
    secondary_key_len: u32,
) -> Result<()> {
    write_u32(out, MAGIC).map_err(Error::Write)?;
    write_u32(out, layout.flags).map_err(Error::Write)?;
    write_u16(out, file_count).map_err(Error::Write)?;
    write_u32(out, primary_count).map_err(Error::Write)?;
    write_u32(out, secondary_count).map_err(Error::Write)?;
    write_u32(out, file_name_len).map_err(Error::Write)?;
    write_u32(out, primary_key_len).map_err(Error::Write)?;
    write_u32(out, secondary_key_len).map_err(Error::Write)?;
    write_u32(out, layout.file_rec_size).map_err(Error::Write)?;
    write_u32(out, layout.primary_rec_size).map_err(Error::Write)?;
    write_u32(out, layout.secondary_rec_size).map_err(Error::Write)?;
    write_offset(out, Offset::new(layout.index_mode, layout.file_section)?)
        .map_err(Error::Write)?;
    write_offset(out, Offset::new(layout.index_mode, layout.primary_section)?)
        .map_err(Error::Write)?;
    write_offset(out, Offset::new(layout.index_mode, layout.secondary_section)?)
        .map_err(Error::Write)?;
    Ok(())
}

/// Write the file table.
pub(crate) fn write_file_section<W: Write>(
    out: &mut W,
    files: &[FileEntry],
    file_name_len: u32,
) -> Result<()> {
    let zeros = vec![0u8; file_name_len as usize];
    for entry in files {
        write_padded(out, entry.name.as_bytes(), file_name_len, &zeros)?;
        let mut file_flags = 0;
        if entry.bytes_per_line > 0 && entry.residues_per_line > 0 {
            file_flags |= FILE_FLAG_FAST_SUBSEQ;
        }
        write_u32(out, entry.format).map_err(Error::Write)?;
        write_u32(out, file_flags).map_err(Error::Write)?;
        write_u32(out, entry.bytes_per_line).map_err(Error::Write)?;
        write_u32(out, entry.residues_per_line).map_err(Error::Write)?;
    }
    Ok(())
}

/// Write one primary-key record at the given field width.
pub(crate) fn write_primary_record<W: Write>(
    out: &mut W,
    record: &PrimaryKey,
    primary_key_len: u32,
    data_mode: OffsetMode,
    zeros: &[u8],
) -> Result<()> {
    write_padded(out, &record.key, primary_key_len, zeros)?;
    write_u16(out, record.file_handle).map_err(Error::Write)?;
    write_offset(out, Offset::new(data_mode, record.record_offset)?).map_err(Error::Write)?;
    write_offset(out, Offset::new(data_mode, record.data_offset)?).map_err(Error::Write)?;
    write_u32(out, record.length).map_err(Error::Write)?;
    Ok(())
}

/// Write one secondary-key record at the given field widths.
pub(crate) fn write_secondary_record<W: Write>(
    out: &mut W,
    record: &SecondaryKey,
    secondary_key_len: u32,
    primary_key_len: u32,
    zeros: &[u8],
) -> Result<()> {
    write_padded(out, &record.key, secondary_key_len, zeros)?;
    write_padded(out, &record.primary_key, primary_key_len, zeros)?;
    Ok(())
}

/// Serialize one complete index: header, file table, and the two key
/// sections, which the caller has already sorted. Used both for the final
/// output and for each spilled chunk.
fn write_index<W: Write>(
    out: &mut W,
    files: &[FileEntry],
    primary: &[PrimaryKey],
    secondary: &[SecondaryKey],
    file_name_len: u32,
    primary_key_len: u32,
    secondary_key_len: u32,
    data_mode: OffsetMode,
) -> Result<()> {
    let layout = compute_layout(
        files.len(),
        primary.len() as u64,
        secondary.len() as u64,
        file_name_len,
        primary_key_len,
        secondary_key_len,
        data_mode,
    );
    write_header(
        out,
        &layout,
        files.len() as u16,
        primary.len() as u32,
        secondary.len() as u32,
        file_name_len,
        primary_key_len,
        secondary_key_len,
    )?;
    write_file_section(out, files, file_name_len)?;

    let zeros = vec![0u8; primary_key_len.max(secondary_key_len) as usize];
    for record in primary {
        write_primary_record(out, record, primary_key_len, data_mode, &zeros)?;
    }
    for record in secondary {
        write_secondary_record(out, record, secondary_key_len, primary_key_len, &zeros)?;
    }
    Ok(())
}

/// Write `bytes` NUL-terminated and zero-padded to `width`.
fn write_padded<W: Write>(out: &mut W, bytes: &[u8], width: u32, zeros: &[u8]) -> Result<()> {
    out.write_all(bytes).map_err(Error::Write)?;
    out.write_all(&zeros[..width as usize - bytes.len()])
        .map_err(Error::Write)
}
