//! TsFile: a self-describing, append-only, columnar on-disk file format for
//! time-series data.  A file holds an ordered stream of chunk groups (one
//! per device), each containing columnar chunks of encoded, compressed
//! pages, followed by a hierarchical metadata index and a footer.

#[macro_use]
extern crate async_trait;

pub mod codec;
pub mod compress;
pub mod config;
pub mod data;
pub mod error;
pub mod file;
pub mod read;
pub mod schema;
pub mod write;

pub use config::ConfigValue;
pub use data::{DeviceId, Tablet};
pub use error::{Result, TsFileError};
pub use read::{Order, ReaderOptions, TableResultSet, TsBlock, TsFileReader};
pub use schema::{ColumnSchema, MeasurementSchema, TableSchema};
pub use write::TsFileWriter;

pub use tsfile_common::datatype::{ColumnCategory, CompressionType, TSDataType, TSEncoding};
pub use tsfile_common::record::{DataPoint, TsRecord};
pub use tsfile_common::value::Value;
