//! Sorted merge of spilled chunks into the final index.
//!
//! An oversized build appends self-contained sorted chunks (each a complete
//! mini-index) to one temp file at recorded offsets. Finalizing such a
//! build streams all chunks back in a k-way merge, one pass per key
//! section, preserving global byte-wise key order. Ties go to the earliest
//! chunk; chunks are written in insertion order and each one is stably
//! sorted, so duplicate keys keep their insertion order and the result is
//! byte-identical to a single-pass build over the same inputs.

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::index::reader::{read_header, read_primary_record, read_secondary_record};
use crate::index::types::{Header, primary_record_size, secondary_record_size};
use crate::index::writer::{
    IndexBuilder, PrimaryKey, SecondaryKey, Spill, compute_layout, write_file_section,
    write_header, write_primary_record, write_secondary_record,
};
use crate::utils::encoding::ByteOrder;

/// Merge every spilled chunk into the complete index at `path`. The file
/// table and field widths come from the builder (they persist across
/// spills); only the key sections are merged from the chunks.
pub(crate) fn merge_spilled(builder: &IndexBuilder, spill: &Spill, path: &Path) -> Result<()> {
    let primary_count = u32::try_from(spill.primary_total).map_err(|_| Error::TooManyKeys)?;
    let secondary_count = u32::try_from(spill.secondary_total).map_err(|_| Error::TooManyKeys)?;
    let layout = compute_layout(
        builder.files.len(),
        spill.primary_total,
        spill.secondary_total,
        builder.file_name_len,
        builder.primary_key_len,
        builder.secondary_key_len,
        builder.data_mode(),
    );
    debug!(
        chunks = spill.chunk_offsets.len(),
        primary = primary_count,
        secondary = secondary_count,
        "merging spilled index chunks"
    );

    let out_file = File::create(path).map_err(Error::Write)?;
    let mut out = BufWriter::new(out_file);
    write_header(
        &mut out,
        &layout,
        builder.files.len() as u16,
        primary_count,
        secondary_count,
        builder.file_name_len,
        builder.primary_key_len,
        builder.secondary_key_len,
    )?;
    write_file_section(&mut out, &builder.files, builder.file_name_len)?;

    let zeros = vec![0u8; builder.primary_key_len.max(builder.secondary_key_len) as usize];
    let spill_path = spill.file.path();

    let mut primaries = Vec::with_capacity(spill.chunk_offsets.len());
    for &start in &spill.chunk_offsets {
        primaries.push(PrimaryCursor::open(spill_path, start)?);
    }
    while let Some(idx) = smallest_primary(&primaries) {
        let record = match primaries[idx].current.take() {
            Some(record) => record,
            None => break,
        };
        primaries[idx].advance()?;
        write_primary_record(
            &mut out,
            &record,
            builder.primary_key_len,
            builder.data_mode(),
            &zeros,
        )?;
    }
    drop(primaries);

    let mut secondaries = Vec::with_capacity(spill.chunk_offsets.len());
    for &start in &spill.chunk_offsets {
        secondaries.push(SecondaryCursor::open(spill_path, start)?);
    }
    while let Some(idx) = smallest_secondary(&secondaries) {
        let record = match secondaries[idx].current.take() {
            Some(record) => record,
            None => break,
        };
        secondaries[idx].advance()?;
        write_secondary_record(
            &mut out,
            &record,
            builder.secondary_key_len,
            builder.primary_key_len,
            &zeros,
        )?;
    }
    drop(secondaries);

    out.flush().map_err(Error::Write)
}

/// An independent buffered handle on the spill file, positioned inside one
/// chunk. Chunks are self-describing: records are parsed with the chunk's
/// own header, which may use narrower fields than the final index.
struct ChunkStream {
    reader: BufReader<File>,
    order: ByteOrder,
    header: Header,
    start: u64,
}

impl ChunkStream {
    fn open(path: &Path, start: u64) -> Result<ChunkStream> {
        let mut file = File::open(path).map_err(|source| Error::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        file.seek(SeekFrom::Start(start)).map_err(Error::Seek)?;
        let mut reader = BufReader::new(file);
        let (header, order) = read_header(&mut reader)?;
        Ok(ChunkStream {
            reader,
            order,
            header,
            start,
        })
    }

    /// Position at a section offset, which chunk headers store relative to
    /// the chunk start.
    fn seek_section(&mut self, section: u64) -> Result<()> {
        let pos = self
            .start
            .checked_add(section)
            .ok_or(Error::BadFormat("section offset overflows"))?;
        self.reader
            .seek(SeekFrom::Start(pos))
            .map_err(Error::Seek)?;
        Ok(())
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        if n > 0 {
            self.reader.seek_relative(n as i64).map_err(Error::Seek)?;
        }
        Ok(())
    }
}

struct PrimaryCursor {
    stream: ChunkStream,
    /// Trailing bytes per record beyond the fields this version knows.
    trailing: u64,
    remaining: u32,
    current: Option<PrimaryKey>,
}

impl PrimaryCursor {
    fn open(path: &Path, start: u64) -> Result<PrimaryCursor> {
        let mut stream = ChunkStream::open(path, start)?;
        stream.seek_section(stream.header.primary_section)?;
        let trailing = (stream.header.primary_rec_size
            - primary_record_size(stream.header.primary_key_len, stream.header.data_mode()))
            as u64;
        let remaining = stream.header.primary_count;
        let mut cursor = PrimaryCursor {
            stream,
            trailing,
            remaining,
            current: None,
        };
        cursor.advance()?;
        Ok(cursor)
    }

    fn advance(&mut self) -> Result<()> {
        self.current = if self.remaining == 0 {
            None
        } else {
            self.remaining -= 1;
            let raw = read_primary_record(
                &mut self.stream.reader,
                self.stream.order,
                &self.stream.header,
            )?;
            self.stream.skip(self.trailing)?;
            Some(PrimaryKey {
                key: raw.key,
                file_handle: raw.file_handle,
                record_offset: raw.record_offset.value(),
                data_offset: raw.data_offset.value(),
                length: raw.length,
            })
        };
        Ok(())
    }
}

struct SecondaryCursor {
    stream: ChunkStream,
    trailing: u64,
    remaining: u32,
    current: Option<SecondaryKey>,
}

impl SecondaryCursor {
    fn open(path: &Path, start: u64) -> Result<SecondaryCursor> {
        let mut stream = ChunkStream::open(path, start)?;
        stream.seek_section(stream.header.secondary_section)?;
        let trailing = (stream.header.secondary_rec_size
            - secondary_record_size(
                stream.header.secondary_key_len,
                stream.header.primary_key_len,
            )) as u64;
        let remaining = stream.header.secondary_count;
        let mut cursor = SecondaryCursor {
            stream,
            trailing,
            remaining,
            current: None,
        };
        cursor.advance()?;
        Ok(cursor)
    }

    fn advance(&mut self) -> Result<()> {
        self.current = if self.remaining == 0 {
            None
        } else {
            self.remaining -= 1;
            let (key, primary_key) =
                read_secondary_record(&mut self.stream.reader, &self.stream.header)?;
            self.stream.skip(self.trailing)?;
            Some(SecondaryKey { key, primary_key })
        };
        Ok(())
    }
}

/// Index of the cursor holding the smallest current key, scanning in chunk
/// order so that strict comparison keeps the earliest chunk on ties.
fn smallest_primary(cursors: &[PrimaryCursor]) -> Option<usize> {
    let mut best: Option<(usize, &[u8])> = None;
    for (idx, cursor) in cursors.iter().enumerate() {
        if let Some(record) = &cursor.current {
            if best.map_or(true, |(_, key)| record.key.as_slice() < key) {
                best = Some((idx, record.key.as_slice()));
            }
        }
    }
    best.map(|(idx, _)| idx)
}

fn smallest_secondary(cursors: &[SecondaryCursor]) -> Option<usize> {
    let mut best: Option<(usize, &[u8])> = None;
    for (idx, cursor) in cursors.iter().enumerate() {
        if let Some(record) = &cursor.current {
            if best.map_or(true, |(_, key)| record.key.as_slice() < key) {
                best = Some((idx, record.key.as_slice()));
            }
        }
    }
    best.map(|(idx, _)| idx)
}
