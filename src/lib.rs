//! # ssi: sorted sequence index
//!
//! `ssi` builds and reads disk-resident indexes over large sequence files.
//! An index maps primary keys (record names) and secondary keys (aliases
//! resolving to a primary key) to byte offsets inside one or more external
//! data files, so a record can be fetched with a handful of seeks instead of
//! a scan; the key sections stay on disk and are binary searched in place.
//!
//! ## Architecture
//!
//! - [`index::writer`] - [`IndexBuilder`]: accumulate keys, spill oversized
//!   builds to temporary chunks, serialize the sorted index
//! - [`index::reader`] - [`IndexReader`]: open an index and answer
//!   by-name, by-ordinal, and subsequence lookups
//! - [`index::merge`] - sorted merge of spilled chunks at finalize time
//! - [`utils`] - fixed-width integer codec (canonical byte order, tagged
//!   offset widths)
//!
//! ## Quick start
//!
//! ```ignore
//! use ssi::{IndexBuilder, IndexReader, OffsetMode};
//!
//! // Build: one pass over the data files, done by an external scanner.
//! let mut builder = IndexBuilder::new(OffsetMode::U32);
//! let fh = builder.register_file("seqs.fa", 1)?;
//! builder.add_primary_key(b"chr1", fh, 0, Some((6, 248_956_422)))?;
//! builder.add_secondary_key(b"NC_000001", b"chr1")?;
//! builder.finalize(std::path::Path::new("seqs.fa.ssi"))?;
//!
//! // Read: seek straight to the record in the data file.
//! let mut reader = IndexReader::open(std::path::Path::new("seqs.fa.ssi"))?;
//! let loc = reader.lookup_by_name(b"NC_000001")?;
//! println!("record starts at byte {}", loc.record_offset.value());
//! ```
//!
//! ## Format
//!
//! A single binary file: a fixed header, a file table, and two sorted
//! fixed-record-size key sections. All integers are stored in a canonical
//! byte order; record and section offsets are 32- or 64-bit per two
//! independent header flags, so an index can stay compact even when the
//! files it indexes need 64-bit positions. See [`index::types`] for the
//! layout constants.

pub mod error;
pub mod index;
pub mod utils;

pub use error::{Error, Result};
pub use index::reader::IndexReader;
pub use index::types::{IndexedFile, KeyLocation, Offset, OffsetMode, SubseqLocation};
pub use index::writer::IndexBuilder;
