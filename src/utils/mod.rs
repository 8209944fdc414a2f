pub mod encoding;

pub use encoding::{ByteOrder, read_offset, read_u16, read_u32, read_u64};
pub use encoding::{write_offset, write_u16, write_u32, write_u64};
