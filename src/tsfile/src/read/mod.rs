//! The read pipeline: footer discovery, metadata-index descent, chunk and
//! page decoding, and the block readers that align columns into rows.

pub mod cache;
pub mod chunk_reader;
pub mod device_reader;
pub mod filter;
pub mod io_reader;
pub mod reader;
pub mod result_set;
pub mod tsblock;

pub use reader::{Order, ReaderOptions, TsFileReader};
pub use result_set::TableResultSet;
pub use tsblock::TsBlock;
