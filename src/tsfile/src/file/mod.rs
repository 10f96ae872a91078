//! On-disk structures of a TsFile and their serialization.

pub mod bloom;
pub mod chunk;
pub mod marshal;
pub mod metadata;
pub mod page;
pub mod statistics;

/// Magic string at both ends of every TsFile.
pub const MAGIC_STRING: &[u8; 6] = b"TsFile";
/// Format version byte following the head magic.
pub const VERSION_NUMBER: u8 = 0x04;

/// Marker preceding a chunk group header.
pub const CHUNK_GROUP_HEADER_MARKER: u8 = 0x00;
/// Marker preceding a multi-page chunk header.
pub const CHUNK_HEADER_MARKER: u8 = 0x01;
/// Marker preceding a single-page chunk header.
pub const ONLY_ONE_PAGE_CHUNK_HEADER_MARKER: u8 = 0x05;
/// Section separator marker.
pub const SEPARATOR_MARKER: u8 = 0x02;
/// Operation-index-range marker.
pub const OPERATION_INDEX_RANGE_MARKER: u8 = 0x04;

/// Mask OR-ed into chunk markers and timeseries-index types for the time
/// column of an aligned group.
pub const TIME_COLUMN_MASK: u8 = 0x80;
/// Mask OR-ed into chunk markers and timeseries-index types for a value
/// column of an aligned group.
pub const VALUE_COLUMN_MASK: u8 = 0x40;

/// Encoding of the time stream inside an unaligned data page.  The page
/// body carries no tag for it, so it is fixed by the format.
pub const PAGE_TIME_STREAM_ENCODING: tsfile_common::datatype::TSEncoding =
    tsfile_common::datatype::TSEncoding::Ts2Diff;
