//! File-level metadata: per-series chunk lists, the hierarchical metadata
//! index tree, and the footer.

use std::collections::BTreeMap;

use tsfile_common::datatype::TSDataType;

use crate::data::device::DeviceId;
use crate::error::{Result, TsFileError};
use crate::file::bloom::BloomFilter;
use crate::file::marshal::{
    write_i64_le, write_var_str, write_var_u32, ByteReader,
};
use crate::file::statistics::Statistics;
use crate::schema::TableSchema;

/// Low bit of `ts_meta_type`: set when the series has more than one chunk
/// (and per-chunk statistics are serialized).
pub const TS_META_MULTI_CHUNK: u8 = 0x01;

/// Write-side record of one flushed chunk.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub measurement_name: String,
    pub offset_of_chunk_header: i64,
    pub data_type: TSDataType,
    /// Aligned column mask (`TIME_COLUMN_MASK` / `VALUE_COLUMN_MASK` or 0).
    pub mask: u8,
    pub statistics: Statistics,
}

/// Write-side record of one flushed chunk group.
#[derive(Debug, Clone)]
pub struct ChunkGroupMeta {
    pub device_id: DeviceId,
    pub chunk_metas: Vec<ChunkMeta>,
}

/// On-disk location of one chunk inside a TimeseriesIndex; statistics are
/// elided when the series has exactly one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMetaLoc {
    pub offset_of_chunk_header: i64,
    pub statistics: Option<Statistics>,
}

/// Per-(device, measurement) index record: merged statistics plus the list
/// of chunk locations.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesIndex {
    pub ts_meta_type: u8,
    pub measurement_name: String,
    pub data_type: TSDataType,
    pub statistics: Statistics,
    pub chunk_metas: Vec<ChunkMetaLoc>,
}

impl TimeseriesIndex {
    pub fn is_multi_chunk(&self) -> bool {
        self.ts_meta_type & TS_META_MULTI_CHUNK != 0
    }

    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        out.push(self.ts_meta_type);
        write_var_str(&self.measurement_name, out);
        out.push(self.data_type.to_u8());
        self.statistics.serialize_to(out);

        let mut list_buf = Vec::new();
        for cm in &self.chunk_metas {
            write_i64_le(cm.offset_of_chunk_header, &mut list_buf);
            if let Some(stats) = &cm.statistics {
                stats.serialize_to(&mut list_buf);
            }
        }
        write_var_u32(list_buf.len() as u32, out);
        out.extend_from_slice(&list_buf);
    }

    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let ts_meta_type = reader.read_u8()?;
        let measurement_name = reader.read_var_str()?;
        let data_type = TSDataType::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::corrupted("unknown data type tag in timeseries index"))?;
        let statistics = Statistics::deserialize_from(reader, data_type)?;
        let list_size = reader.read_var_u32()? as usize;
        let list_bytes = reader.read_slice(list_size)?;
        let mut list_reader = ByteReader::new(list_bytes);
        let multi = ts_meta_type & TS_META_MULTI_CHUNK != 0;
        let mut chunk_metas = Vec::new();
        while list_reader.has_remaining() {
            let offset = list_reader.read_i64_le()?;
            let statistics = if multi {
                Some(Statistics::deserialize_from(&mut list_reader, data_type)?)
            } else {
                None
            };
            chunk_metas.push(ChunkMetaLoc {
                offset_of_chunk_header: offset,
                statistics,
            });
        }
        Ok(Self {
            ts_meta_type,
            measurement_name,
            data_type,
            statistics,
            chunk_metas,
        })
    }
}

/// Node types of the metadata index tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetaIndexNodeType {
    InternalDevice = 0,
    LeafDevice = 1,
    InternalMeasurement = 2,
    LeafMeasurement = 3,
}

impl MetaIndexNodeType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::InternalDevice),
            1 => Some(Self::LeafDevice),
            2 => Some(Self::InternalMeasurement),
            3 => Some(Self::LeafMeasurement),
            _ => None,
        }
    }

    pub fn is_device(self) -> bool {
        matches!(self, Self::InternalDevice | Self::LeafDevice)
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, Self::LeafDevice | Self::LeafMeasurement)
    }
}

/// Key of a metadata index entry: a device id in device nodes, a measurement
/// name in measurement nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexKey {
    Device(DeviceId),
    Measurement(String),
}

impl IndexKey {
    pub fn as_measurement(&self) -> Option<&str> {
        match self {
            IndexKey::Measurement(s) => Some(s.as_str()),
            IndexKey::Device(_) => None,
        }
    }

    pub fn as_device(&self) -> Option<&DeviceId> {
        match self {
            IndexKey::Device(d) => Some(d),
            IndexKey::Measurement(_) => None,
        }
    }
}

/// One child pointer of a metadata index node.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaIndexEntry {
    pub key: IndexKey,
    pub offset: i64,
}

/// A node of the metadata index tree.  Children are kept in strictly
/// ascending key order; `end_offset` is the exclusive upper bound of the
/// last child's byte region.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaIndexNode {
    pub children: Vec<MetaIndexEntry>,
    pub end_offset: i64,
    pub node_type: MetaIndexNodeType,
}

impl MetaIndexNode {
    /// Binary search for the child with the largest key `<= key`, returning
    /// the child and the exclusive end of its byte region (the next child's
    /// offset, or this node's `end_offset` for the last child).
    ///
    /// With `exact` the key must match; otherwise the search is the prefix
    /// descent used on internal and leaf-measurement nodes.  A leaf
    /// measurement node whose sole child has an empty name addresses an
    /// aligned device: every lookup lands on that child.
    pub fn binary_search_children(
        &self,
        key: &IndexKey,
        exact: bool,
    ) -> Result<(MetaIndexEntry, i64)> {
        let aligned_leaf = self.node_type == MetaIndexNodeType::LeafMeasurement
            && self.children.len() == 1
            && self.children[0].key.as_measurement() == Some("");

        let idx = if aligned_leaf {
            0
        } else {
            // children[idx] <= key < children[idx + 1]
            let mut lo: isize = -1;
            let mut hi = self.children.len() as isize;
            let mut found = false;
            while lo < hi - 1 {
                let mid = (lo + hi) / 2;
                match self.children[mid as usize].key.cmp(key) {
                    std::cmp::Ordering::Equal => {
                        lo = mid;
                        found = true;
                        break;
                    }
                    std::cmp::Ordering::Greater => hi = mid,
                    std::cmp::Ordering::Less => lo = mid,
                }
            }
            if lo < 0 || (exact && !found) {
                return Err(TsFileError::NotExist(format!("{:?}", key)));
            }
            lo as usize
        };

        let end = if idx + 1 == self.children.len() {
            self.end_offset
        } else {
            self.children[idx + 1].offset
        };
        Ok((self.children[idx].clone(), end))
    }

    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        out.push(self.node_type as u8);
        write_var_u32(self.children.len() as u32, out);
        for child in &self.children {
            match &child.key {
                IndexKey::Device(d) => d.serialize_to(out),
                IndexKey::Measurement(name) => write_var_str(name, out),
            }
            write_i64_le(child.offset, out);
        }
        write_i64_le(self.end_offset, out);
    }

    /// Parses one node from the front of the buffer; trailing bytes are left
    /// unread (a node region may be followed by sibling-tree bytes).
    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let node_type = MetaIndexNodeType::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::corrupted("unknown metadata index node type"))?;
        let child_count = reader.read_var_u32()? as usize;
        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            let key = if node_type.is_device() {
                IndexKey::Device(DeviceId::deserialize_from(reader)?)
            } else {
                IndexKey::Measurement(reader.read_var_str()?)
            };
            let offset = reader.read_i64_le()?;
            children.push(MetaIndexEntry { key, offset });
        }
        let end_offset = reader.read_i64_le()?;
        Ok(Self {
            children,
            end_offset,
            node_type,
        })
    }
}

/// The footer: per-table index roots and schemas, the offset where the index
/// region starts, the bloom filter and free-form properties.
#[derive(Debug, Clone, PartialEq)]
pub struct TsFileMeta {
    pub table_index_roots: BTreeMap<String, MetaIndexNode>,
    pub table_schemas: BTreeMap<String, TableSchema>,
    pub meta_offset: i64,
    pub bloom_filter: Option<BloomFilter>,
    pub properties: Vec<(String, String)>,
}

impl TsFileMeta {
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u32(self.table_index_roots.len() as u32, out);
        for (table, node) in &self.table_index_roots {
            write_var_str(table, out);
            node.serialize_to(out);
        }
        write_var_u32(self.table_schemas.len() as u32, out);
        for (table, schema) in &self.table_schemas {
            write_var_str(table, out);
            schema.serialize_to(out);
        }
        write_i64_le(self.meta_offset, out);
        match &self.bloom_filter {
            Some(bloom) => bloom.serialize_to(out),
            None => out.push(0),
        }
        write_var_u32(self.properties.len() as u32, out);
        for (k, v) in &self.properties {
            write_var_str(k, out);
            write_var_str(v, out);
        }
    }

    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let num_tables = reader.read_var_u32()? as usize;
        let mut table_index_roots = BTreeMap::new();
        for _ in 0..num_tables {
            let table = reader.read_var_str()?;
            let node = MetaIndexNode::deserialize_from(reader)?;
            table_index_roots.insert(table, node);
        }
        let num_schemas = reader.read_var_u32()? as usize;
        let mut table_schemas = BTreeMap::new();
        for _ in 0..num_schemas {
            let table = reader.read_var_str()?;
            let schema = TableSchema::deserialize_from(reader)?;
            table_schemas.insert(table, schema);
        }
        let meta_offset = reader.read_i64_le()?;
        let bloom_filter = BloomFilter::deserialize_from(reader)?;
        let num_properties = reader.read_var_u32()? as usize;
        let mut properties = Vec::with_capacity(num_properties);
        for _ in 0..num_properties {
            let k = reader.read_var_str()?;
            let v = reader.read_var_str()?;
            properties.push((k, v));
        }
        Ok(Self {
            table_index_roots,
            table_schemas,
            meta_offset,
            bloom_filter,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use tsfile_common::value::Value;

    use super::*;

    fn int32_stats(points: &[(i64, i32)]) -> Statistics {
        let mut s = Statistics::new(TSDataType::Int32);
        for (t, v) in points {
            s.update(*t, &Value::Int32(*v)).unwrap();
        }
        s
    }

    #[test]
    fn test_timeseries_index_single_chunk_round_trip() {
        let idx = TimeseriesIndex {
            ts_meta_type: 0,
            measurement_name: "s1".to_string(),
            data_type: TSDataType::Int32,
            statistics: int32_stats(&[(1, 10), (3, 30)]),
            chunk_metas: vec![ChunkMetaLoc {
                offset_of_chunk_header: 13,
                statistics: None,
            }],
        };
        let mut out = Vec::new();
        idx.serialize_to(&mut out);
        let mut r = ByteReader::new(&out);
        let back = TimeseriesIndex::deserialize_from(&mut r).unwrap();
        assert_eq!(back, idx);
        assert!(!back.is_multi_chunk());
    }

    #[test]
    fn test_timeseries_index_multi_chunk_round_trip() {
        let idx = TimeseriesIndex {
            ts_meta_type: TS_META_MULTI_CHUNK,
            measurement_name: "s1".to_string(),
            data_type: TSDataType::Int32,
            statistics: int32_stats(&[(1, 10), (9, 30)]),
            chunk_metas: vec![
                ChunkMetaLoc {
                    offset_of_chunk_header: 13,
                    statistics: Some(int32_stats(&[(1, 10)])),
                },
                ChunkMetaLoc {
                    offset_of_chunk_header: 200,
                    statistics: Some(int32_stats(&[(9, 30)])),
                },
            ],
        };
        let mut out = Vec::new();
        idx.serialize_to(&mut out);
        let mut r = ByteReader::new(&out);
        let back = TimeseriesIndex::deserialize_from(&mut r).unwrap();
        assert_eq!(back, idx);
        assert!(back.is_multi_chunk());
    }

    fn measurement_node(names: &[(&str, i64)], end: i64) -> MetaIndexNode {
        MetaIndexNode {
            children: names
                .iter()
                .map(|(n, o)| MetaIndexEntry {
                    key: IndexKey::Measurement(n.to_string()),
                    offset: *o,
                })
                .collect(),
            end_offset: end,
            node_type: MetaIndexNodeType::LeafMeasurement,
        }
    }

    #[test]
    fn test_binary_search_prefix_and_exact() {
        let node = measurement_node(&[("a", 10), ("m", 20), ("z", 30)], 40);

        let (e, end) = node
            .binary_search_children(&IndexKey::Measurement("m".to_string()), true)
            .unwrap();
        assert_eq!(e.offset, 20);
        assert_eq!(end, 30);

        // prefix match lands on the largest key <= target
        let (e, end) = node
            .binary_search_children(&IndexKey::Measurement("p".to_string()), false)
            .unwrap();
        assert_eq!(e.offset, 20);
        assert_eq!(end, 30);

        // last child is bounded by the node end offset
        let (e, end) = node
            .binary_search_children(&IndexKey::Measurement("zz".to_string()), false)
            .unwrap();
        assert_eq!(e.offset, 30);
        assert_eq!(end, 40);

        // below the first key
        assert!(node
            .binary_search_children(&IndexKey::Measurement("0".to_string()), false)
            .is_err());
        // exact miss
        assert!(node
            .binary_search_children(&IndexKey::Measurement("p".to_string()), true)
            .is_err());
    }

    #[test]
    fn test_aligned_leaf_matches_everything() {
        let node = measurement_node(&[("", 10)], 90);
        let (e, end) = node
            .binary_search_children(&IndexKey::Measurement("s1".to_string()), false)
            .unwrap();
        assert_eq!(e.offset, 10);
        assert_eq!(end, 90);
    }

    #[test]
    fn test_node_round_trip_ignores_trailing_bytes() {
        let node = MetaIndexNode {
            children: vec![MetaIndexEntry {
                key: IndexKey::Device(DeviceId::from_path("t1.d1")),
                offset: 77,
            }],
            end_offset: 99,
            node_type: MetaIndexNodeType::LeafDevice,
        };
        let mut out = Vec::new();
        node.serialize_to(&mut out);
        out.extend_from_slice(&[0xAB; 16]);
        let mut r = ByteReader::new(&out);
        let back = MetaIndexNode::deserialize_from(&mut r).unwrap();
        assert_eq!(back, node);
        assert_eq!(r.remaining(), 16);
    }

    #[test]
    fn test_footer_round_trip() {
        let mut roots = BTreeMap::new();
        roots.insert(
            "t1".to_string(),
            MetaIndexNode {
                children: vec![MetaIndexEntry {
                    key: IndexKey::Device(DeviceId::from_path("t1.d1")),
                    offset: 42,
                }],
                end_offset: 100,
                node_type: MetaIndexNodeType::LeafDevice,
            },
        );
        let mut bloom = BloomFilter::with_target(10, 0.05);
        bloom.add(b"t1.d1.s1");
        let meta = TsFileMeta {
            table_index_roots: roots,
            table_schemas: BTreeMap::new(),
            meta_offset: 13,
            bloom_filter: Some(bloom),
            properties: vec![("generator".to_string(), "test".to_string())],
        };
        let mut out = Vec::new();
        meta.serialize_to(&mut out);
        let mut r = ByteReader::new(&out);
        let back = TsFileMeta::deserialize_from(&mut r).unwrap();
        assert_eq!(back, meta);
        assert!(!r.has_remaining());
    }
}
