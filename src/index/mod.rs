pub mod merge;
pub mod reader;
pub mod types;
pub mod writer;

pub use reader::IndexReader;
pub use types::*;
pub use writer::IndexBuilder;
