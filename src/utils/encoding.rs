//! Fixed-width integer codec for the on-disk index format.
//!
//! Everything in an index file is written in one canonical byte order
//! (big-endian), independent of the host. Readers that encounter an index
//! whose magic word arrives byte-swapped read every fixed-width field
//! little-endian instead, so a file is readable wherever it was written.

use std::io::{self, Read, Write};

use crate::index::types::{Offset, OffsetMode};

/// Byte order of an index file, detected from its magic word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Canonical order; every index is written this way.
    Big,
    /// Foreign order; seen when reading a byte-swapped index.
    Little,
}

/// Read a u16 in the given byte order.
pub fn read_u16<R: Read>(reader: &mut R, order: ByteOrder) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(match order {
        ByteOrder::Big => u16::from_be_bytes(buf),
        ByteOrder::Little => u16::from_le_bytes(buf),
    })
}

/// Read a u32 in the given byte order.
pub fn read_u32<R: Read>(reader: &mut R, order: ByteOrder) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(match order {
        ByteOrder::Big => u32::from_be_bytes(buf),
        ByteOrder::Little => u32::from_le_bytes(buf),
    })
}

/// Read a u64 in the given byte order.
pub fn read_u64<R: Read>(reader: &mut R, order: ByteOrder) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(match order {
        ByteOrder::Big => u64::from_be_bytes(buf),
        ByteOrder::Little => u64::from_le_bytes(buf),
    })
}

/// Write a u16 in canonical byte order.
pub fn write_u16<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

/// Write a u32 in canonical byte order.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

/// Write a u64 in canonical byte order.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

/// Read an offset at the width dictated by `mode`.
pub fn read_offset<R: Read>(
    reader: &mut R,
    order: ByteOrder,
    mode: OffsetMode,
) -> io::Result<Offset> {
    Ok(match mode {
        OffsetMode::U32 => Offset::U32(read_u32(reader, order)?),
        OffsetMode::U64 => Offset::U64(read_u64(reader, order)?),
    })
}

/// Write an offset at the width carried by its own tag.
pub fn write_offset<W: Write>(writer: &mut W, offset: Offset) -> io::Result<()> {
    match offset {
        Offset::U32(v) => write_u32(writer, v),
        Offset::U64(v) => write_u64(writer, v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn int_roundtrip_canonical() {
        let mut buf = Vec::new();
        write_u16(&mut buf, 0xBEEF).unwrap();
        write_u32(&mut buf, 0xDEAD_BEEF).unwrap();
        write_u64(&mut buf, 0x0123_4567_89AB_CDEF).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_u16(&mut cursor, ByteOrder::Big).unwrap(), 0xBEEF);
        assert_eq!(read_u32(&mut cursor, ByteOrder::Big).unwrap(), 0xDEAD_BEEF);
        assert_eq!(
            read_u64(&mut cursor, ByteOrder::Big).unwrap(),
            0x0123_4567_89AB_CDEF
        );
    }

    #[test]
    fn swapped_reads_undo_foreign_order() {
        let mut cursor = Cursor::new(0xDEAD_BEEF_u32.to_le_bytes());
        assert_eq!(
            read_u32(&mut cursor, ByteOrder::Little).unwrap(),
            0xDEAD_BEEF
        );
    }

    #[test]
    fn offset_roundtrip_keeps_width() {
        let mut buf = Vec::new();
        write_offset(&mut buf, Offset::U32(77)).unwrap();
        write_offset(&mut buf, Offset::U64(5_000_000_000)).unwrap();
        assert_eq!(buf.len(), 12);

        let mut cursor = Cursor::new(buf);
        assert_eq!(
            read_offset(&mut cursor, ByteOrder::Big, OffsetMode::U32).unwrap(),
            Offset::U32(77)
        );
        assert_eq!(
            read_offset(&mut cursor, ByteOrder::Big, OffsetMode::U64).unwrap(),
            Offset::U64(5_000_000_000)
        );
    }

    #[test]
    fn short_input_is_an_error() {
        let mut cursor = Cursor::new([0u8; 3]);
        assert!(read_u32(&mut cursor, ByteOrder::Big).is_err());
    }
}
