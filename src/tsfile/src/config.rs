use serde::{Deserialize, Serialize};
use tsfile_common::datatype::{CompressionType, TSEncoding};

/// Tunables of the writer and index builder.  A value is read at the point it
/// takes effect; changing the config of a live writer mid-stream is not
/// supported.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigValue {
    /// Rows per page before a forced page seal.
    pub page_max_point_count: u32,
    /// Estimated bytes per page before a forced page seal.
    pub page_max_memory_bytes: u32,
    /// Total pending bytes across open chunks before an automatic flush.
    pub chunk_group_size_threshold: u64,
    /// Fan-out cap of every metadata index node.
    pub max_degree_of_index_node: u32,
    /// Target false-positive rate of the footer bloom filter.
    pub bloom_filter_error_rate: f64,
    /// Encoding of aligned-group time chunks.
    pub time_encoding: TSEncoding,
    /// Compression of aligned-group time chunks.
    pub time_compression: CompressionType,
}

impl Default for ConfigValue {
    fn default() -> Self {
        Self {
            page_max_point_count: 10_240,
            page_max_memory_bytes: 64 * 1024,
            chunk_group_size_threshold: 128 * 1024 * 1024,
            max_degree_of_index_node: 256,
            bloom_filter_error_rate: 0.05,
            time_encoding: TSEncoding::Ts2Diff,
            time_compression: CompressionType::Uncompressed,
        }
    }
}
