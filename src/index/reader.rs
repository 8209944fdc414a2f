//! Read-only access to a serialized index: the header and file table are
//! loaded eagerly; the key sections stay on disk and are binary searched
//! in place, one seek-and-compare per probe.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::index::types::{
    FLAG_INDEX_OFFSET_64, Header, IndexedFile, KeyLocation, MAGIC, MAGIC_SWAPPED, MAX_KEY_WIDTH,
    Offset, OffsetMode, SubseqLocation, file_record_size, primary_record_size,
    secondary_record_size,
};
use crate::utils::encoding::{ByteOrder, read_offset, read_u16, read_u32};

/// Reader over one index file.
///
/// Any number of independent readers may hold the same index open; each
/// owns its own stream position. Dropping the reader releases the stream
/// and all loaded state.
pub struct IndexReader {
    file: File,
    order: ByteOrder,
    header: Header,
    files: Vec<IndexedFile>,
}

impl IndexReader {
    /// Open an index, detect its byte order and offset widths, and load
    /// the header and file table. The key sections are not materialized.
    pub fn open(path: &Path) -> Result<IndexReader> {
        let mut file = File::open(path).map_err(|source| Error::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let (header, order) = read_header(&mut file)?;
        if header.file_count == 0 {
            return Err(Error::BadFormat("index registers no files"));
        }

        // The file count is expected to be small; read the table once up
        // front rather than on demand.
        let mut files = Vec::with_capacity(header.file_count as usize);
        let mut name_field = vec![0u8; header.file_name_len as usize];
        for n in 0..header.file_count {
            seek_record(
                &mut file,
                header.file_section,
                header.file_rec_size,
                n as u32,
            )?;
            file.read_exact(&mut name_field).map_err(Error::ShortRead)?;
            let name = String::from_utf8_lossy(trim_nul(&name_field)).into_owned();
            let format = read_u32(&mut file, order).map_err(Error::ShortRead)?;
            let flags = read_u32(&mut file, order).map_err(Error::ShortRead)?;
            let bytes_per_line = read_u32(&mut file, order).map_err(Error::ShortRead)?;
            let residues_per_line = read_u32(&mut file, order).map_err(Error::ShortRead)?;
            files.push(IndexedFile {
                name,
                format,
                flags,
                bytes_per_line,
                residues_per_line,
            });
        }

        debug!(
            files = files.len(),
            primary = header.primary_count,
            secondary = header.secondary_count,
            "opened index"
        );
        Ok(IndexReader {
            file,
            order,
            header,
            files,
        })
    }

    /// Number of registered data files.
    pub fn file_count(&self) -> u16 {
        self.header.file_count
    }

    /// Number of primary keys.
    pub fn primary_count(&self) -> u32 {
        self.header.primary_count
    }

    /// Number of secondary keys.
    pub fn secondary_count(&self) -> u32 {
        self.header.secondary_count
    }

    /// Path and format metadata for a file handle.
    pub fn file_info(&self, handle: u16) -> Result<&IndexedFile> {
        self.files
            .get(handle as usize)
            .ok_or_else(|| Error::bad_argument(format!("no file with handle {handle}")))
    }

    /// Find `key` among the primary keys, falling back to the secondary
    /// section with one level of name indirection. Misses are the ordinary
    /// [`Error::NoSuchKey`], including an alias whose referenced primary
    /// does not exist.
    pub fn lookup_by_name(&mut self, key: &[u8]) -> Result<KeyLocation> {
        let record = self.resolve(key)?;
        Ok(KeyLocation {
            file_handle: record.file_handle,
            record_offset: record.record_offset,
        })
    }

    /// Fetch primary key `n` (0-based, in sorted key order) by direct
    /// addressing, returning the key alongside its location. With
    /// duplicated primary keys this reaches every copy, where a name
    /// lookup reaches only one.
    pub fn lookup_by_ordinal(&mut self, n: u32) -> Result<(Vec<u8>, KeyLocation)> {
        if n >= self.header.primary_count {
            return Err(Error::out_of_range(format!(
                "ordinal {n} not in 0..{}",
                self.header.primary_count
            )));
        }
        let record = self.read_primary_at(n)?;
        Ok((
            record.key,
            KeyLocation {
                file_handle: record.file_handle,
                record_offset: record.record_offset,
            },
        ))
    }

    /// Byte position of residue `requested_start` (1..=L) of the record
    /// named `key`, computed from the owning file's constant line layout.
    ///
    /// With `bytes_per_line == residues_per_line + 1` every line is pure
    /// sequence plus its terminator and the residue is addressed exactly;
    /// otherwise the offset points at the start of the line holding it and
    /// `actual_start` reports the coordinate actually reached.
    pub fn lookup_subseq_offset(
        &mut self,
        key: &[u8],
        requested_start: u32,
    ) -> Result<SubseqLocation> {
        let record = self.resolve(key)?;
        let info = self
            .files
            .get(record.file_handle as usize)
            .ok_or(Error::BadFormat("record references an unregistered file"))?;
        if !info.fast_subseq() {
            return Err(Error::SubseqUnsupported);
        }
        let residues = info.residues_per_line;
        let bytes = info.bytes_per_line;
        if residues == 0 || bytes == 0 {
            return Err(Error::SubseqUnsupported);
        }
        if requested_start < 1 || requested_start > record.length {
            return Err(Error::out_of_range(format!(
                "start {requested_start} not in 1..={}",
                record.length
            )));
        }

        let line = ((requested_start - 1) / residues) as u64;
        let exact = bytes as u64 == residues as u64 + 1;
        let within_line = if exact {
            ((requested_start - 1) % residues) as u64
        } else {
            0
        };
        let position = record
            .data_offset
            .value()
            .checked_add(line * bytes as u64 + within_line)
            .ok_or(Error::BadFormat("data offset overflows"))?;
        let actual_start = if exact {
            requested_start
        } else {
            1 + line as u32 * residues
        };
        let data_offset =
            Offset::new(record.data_offset.mode(), position).unwrap_or(Offset::U64(position));

        Ok(SubseqLocation {
            file_handle: record.file_handle,
            record_offset: record.record_offset,
            data_offset,
            actual_start,
        })
    }

    fn resolve(&mut self, key: &[u8]) -> Result<RawPrimary> {
        if let Some(n) = self.search_primary(key)? {
            return self.read_primary_at(n);
        }
        // One level of alias indirection; a dangling alias is a miss.
        if self.header.secondary_count > 0 {
            if let Some(n) = self.search_secondary(key)? {
                let (_alias, referenced) = self.read_secondary_at(n)?;
                if let Some(p) = self.search_primary(&referenced)? {
                    return self.read_primary_at(p);
                }
            }
        }
        Err(Error::no_such_key(key))
    }

    fn search_primary(&mut self, key: &[u8]) -> Result<Option<u32>> {
        self.search_section(
            key,
            self.header.primary_section,
            self.header.primary_rec_size,
            self.header.primary_key_len,
            self.header.primary_count,
        )
    }

    fn search_secondary(&mut self, key: &[u8]) -> Result<Option<u32>> {
        self.search_section(
            key,
            self.header.secondary_section,
            self.header.secondary_rec_size,
            self.header.secondary_key_len,
            self.header.secondary_count,
        )
    }

    /// Binary search over a sorted fixed-record-size section, one on-disk
    /// key probe per step. The bounds are a half-open interval, so
    /// narrowing the lower half at index 0 cannot underflow.
    fn search_section(
        &mut self,
        key: &[u8],
        base: u64,
        rec_size: u32,
        key_len: u32,
        count: u32,
    ) -> Result<Option<u32>> {
        let mut field = vec![0u8; key_len as usize];
        let mut lo = 0u32;
        let mut hi = count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            seek_record(&mut self.file, base, rec_size, mid)?;
            self.file.read_exact(&mut field).map_err(Error::ShortRead)?;
            match trim_nul(&field).cmp(key) {
                Ordering::Equal => return Ok(Some(mid)),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        Ok(None)
    }

    fn read_primary_at(&mut self, n: u32) -> Result<RawPrimary> {
        seek_record(
            &mut self.file,
            self.header.primary_section,
            self.header.primary_rec_size,
            n,
        )?;
        read_primary_record(&mut self.file, self.order, &self.header)
    }

    fn read_secondary_at(&mut self, n: u32) -> Result<(Vec<u8>, Vec<u8>)> {
        seek_record(
            &mut self.file,
            self.header.secondary_section,
            self.header.secondary_rec_size,
            n,
        )?;
        read_secondary_record(&mut self.file, &self.header)
    }
}

/// The fields of one primary record as stored on disk.
pub(crate) struct RawPrimary {
    pub key: Vec<u8>,
    pub file_handle: u16,
    pub record_offset: Offset,
    pub data_offset: Offset,
    pub length: u32,
}

/// Strip the terminator and padding from a fixed-width field.
pub(crate) fn trim_nul(field: &[u8]) -> &[u8] {
    match memchr::memchr(0, field) {
        Some(end) => &field[..end],
        None => field,
    }
}

/// Position `file` at record `n` of a section starting at `base`.
fn seek_record(file: &mut File, base: u64, rec_size: u32, n: u32) -> Result<()> {
    let pos = base
        .checked_add(n as u64 * rec_size as u64)
        .ok_or(Error::BadFormat("section offset overflows"))?;
    file.seek(SeekFrom::Start(pos)).map_err(Error::Seek)?;
    Ok(())
}

/// Parse the fixed header and detect the file's byte order from the magic
/// word. Record sizes are validated against the minimum their known fields
/// require; larger sizes are legal (fields may be appended by newer
/// writers) and readers position by the recorded sizes throughout.
pub(crate) fn read_header<R: Read>(input: &mut R) -> Result<(Header, ByteOrder)> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic).map_err(Error::ShortRead)?;
    let order = match u32::from_be_bytes(magic) {
        MAGIC => ByteOrder::Big,
        MAGIC_SWAPPED => ByteOrder::Little,
        other => return Err(Error::BadMagic(other)),
    };

    let flags = read_u32(input, order).map_err(Error::ShortRead)?;
    let file_count = read_u16(input, order).map_err(Error::ShortRead)?;
    let primary_count = read_u32(input, order).map_err(Error::ShortRead)?;
    let secondary_count = read_u32(input, order).map_err(Error::ShortRead)?;
    let file_name_len = read_u32(input, order).map_err(Error::ShortRead)?;
    let primary_key_len = read_u32(input, order).map_err(Error::ShortRead)?;
    let secondary_key_len = read_u32(input, order).map_err(Error::ShortRead)?;
    let file_rec_size = read_u32(input, order).map_err(Error::ShortRead)?;
    let primary_rec_size = read_u32(input, order).map_err(Error::ShortRead)?;
    let secondary_rec_size = read_u32(input, order).map_err(Error::ShortRead)?;

    let index_mode = if flags & FLAG_INDEX_OFFSET_64 != 0 {
        OffsetMode::U64
    } else {
        OffsetMode::U32
    };
    let file_section = read_offset(input, order, index_mode)
        .map_err(Error::ShortRead)?
        .value();
    let primary_section = read_offset(input, order, index_mode)
        .map_err(Error::ShortRead)?
        .value();
    let secondary_section = read_offset(input, order, index_mode)
        .map_err(Error::ShortRead)?
        .value();

    let header = Header {
        flags,
        file_count,
        primary_count,
        secondary_count,
        file_name_len,
        primary_key_len,
        secondary_key_len,
        file_rec_size,
        primary_rec_size,
        secondary_rec_size,
        file_section,
        primary_section,
        secondary_section,
    };
    validate_header(&header)?;
    Ok((header, order))
}

fn validate_header(header: &Header) -> Result<()> {
    if header.file_name_len > MAX_KEY_WIDTH
        || header.primary_key_len > MAX_KEY_WIDTH
        || header.secondary_key_len > MAX_KEY_WIDTH
    {
        return Err(Error::BadFormat("implausible key field width"));
    }
    if header.file_rec_size < file_record_size(header.file_name_len) {
        return Err(Error::BadFormat("file record size below minimum"));
    }
    if header.primary_rec_size < primary_record_size(header.primary_key_len, header.data_mode()) {
        return Err(Error::BadFormat("primary record size below minimum"));
    }
    if header.secondary_rec_size
        < secondary_record_size(header.secondary_key_len, header.primary_key_len)
    {
        return Err(Error::BadFormat("secondary record size below minimum"));
    }
    Ok(())
}

/// Parse the known fields of one primary record; the caller positions the
/// stream and accounts for any trailing record bytes.
pub(crate) fn read_primary_record<R: Read>(
    input: &mut R,
    order: ByteOrder,
    header: &Header,
) -> Result<RawPrimary> {
    let mut key_field = vec![0u8; header.primary_key_len as usize];
    input.read_exact(&mut key_field).map_err(Error::ShortRead)?;
    let key = trim_nul(&key_field).to_vec();
    let file_handle = read_u16(input, order).map_err(Error::ShortRead)?;
    let data_mode = header.data_mode();
    let record_offset = read_offset(input, order, data_mode).map_err(Error::ShortRead)?;
    let data_offset = read_offset(input, order, data_mode).map_err(Error::ShortRead)?;
    let length = read_u32(input, order).map_err(Error::ShortRead)?;
    Ok(RawPrimary {
        key,
        file_handle,
        record_offset,
        data_offset,
        length,
    })
}

/// Parse one secondary record into (alias, referenced primary name).
pub(crate) fn read_secondary_record<R: Read>(
    input: &mut R,
    header: &Header,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut key_field = vec![0u8; header.secondary_key_len as usize];
    input.read_exact(&mut key_field).map_err(Error::ShortRead)?;
    let mut referenced_field = vec![0u8; header.primary_key_len as usize];
    input
        .read_exact(&mut referenced_field)
        .map_err(Error::ShortRead)?;
    Ok((
        trim_nul(&key_field).to_vec(),
        trim_nul(&referenced_field).to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn trim_nul_stops_at_terminator() {
        assert_eq!(trim_nul(b"abc\0\0\0"), b"abc");
        assert_eq!(trim_nul(b"abc"), b"abc");
        assert_eq!(trim_nul(b"\0\0"), b"");
        assert_eq!(trim_nul(b""), b"");
    }

    #[test]
    fn header_rejects_unknown_magic() {
        let mut cursor = Cursor::new(0xDEAD_BEEF_u32.to_be_bytes());
        assert!(matches!(
            read_header(&mut cursor),
            Err(Error::BadMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn header_rejects_truncation() {
        let mut cursor = Cursor::new(MAGIC.to_be_bytes());
        assert!(matches!(read_header(&mut cursor), Err(Error::ShortRead(_))));
    }
}
