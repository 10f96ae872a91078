//! Close-time metadata construction: the TSM iterator that folds recorded
//! chunk-group metas into TimeseriesIndex records, and the bottom-up builder
//! of the metadata index tree.

use std::collections::{BTreeMap, VecDeque};

use crate::data::device::DeviceId;
use crate::error::Result;
use crate::file::metadata::{
    ChunkGroupMeta, ChunkMetaLoc, IndexKey, MetaIndexEntry, MetaIndexNode, MetaIndexNodeType,
    TimeseriesIndex, TS_META_MULTI_CHUNK,
};
use crate::file::statistics::Statistics;

/// TsmIterator yields one TimeseriesIndex per (device, measurement), devices
/// in device-id order and measurements in name order.  Chunk metas of one
/// series keep their file order (ascending header offsets).
pub struct TsmIterator {
    items: VecDeque<(DeviceId, String, TimeseriesIndex)>,
}

impl TsmIterator {
    pub fn new(groups: &[ChunkGroupMeta]) -> Result<Self> {
        let mut per_series: BTreeMap<DeviceId, BTreeMap<String, Vec<usize>>> = BTreeMap::new();
        let mut flat = Vec::new();
        for group in groups {
            for cm in &group.chunk_metas {
                let idx = flat.len();
                flat.push(cm);
                per_series
                    .entry(group.device_id.clone())
                    .or_default()
                    .entry(cm.measurement_name.clone())
                    .or_default()
                    .push(idx);
            }
        }

        let mut items = VecDeque::new();
        for (device, measurements) in per_series {
            for (name, mut metas) in measurements {
                metas.sort_by_key(|&i| flat[i].offset_of_chunk_header);
                let multi = metas.len() > 1;
                let first = flat[metas[0]];
                let ts_meta_type = if multi { TS_META_MULTI_CHUNK } else { 0 } | first.mask;

                let mut statistics = Statistics::new(first.data_type);
                let mut chunk_metas = Vec::with_capacity(metas.len());
                for &i in &metas {
                    let cm = flat[i];
                    statistics.merge(&cm.statistics)?;
                    chunk_metas.push(ChunkMetaLoc {
                        offset_of_chunk_header: cm.offset_of_chunk_header,
                        statistics: multi.then(|| cm.statistics.clone()),
                    });
                }
                items.push_back((
                    device.clone(),
                    name.clone(),
                    TimeseriesIndex {
                        ts_meta_type,
                        measurement_name: name,
                        data_type: first.data_type,
                        statistics,
                        chunk_metas,
                    },
                ));
            }
        }
        Ok(Self { items })
    }

    pub fn next(&mut self) -> Option<(DeviceId, String, TimeseriesIndex)> {
        self.items.pop_front()
    }
}

/// A written node: its first child key, the file offset of the node bytes
/// and the exclusive end of those bytes.
struct WrittenNode {
    first_key: IndexKey,
    offset: i64,
    byte_end: i64,
}

/// Everything the footer needs out of the index region.
pub struct IndexRegion {
    pub table_roots: BTreeMap<String, MetaIndexNode>,
    pub bloom_keys: Vec<String>,
}

/// Serializes every TimeseriesIndex record and the metadata index tree into
/// `out` (positions are `base + out.len()`), returning per-table roots for
/// the footer.  Tree nodes are written children-first, so every child offset
/// is final by the time its parent goes out.
pub fn build_index_region(
    out: &mut Vec<u8>,
    base: u64,
    groups: &[ChunkGroupMeta],
    max_degree: usize,
) -> Result<IndexRegion> {
    let pos = |out: &Vec<u8>| (base + out.len() as u64) as i64;

    // 1. timeseries index records, grouped per device
    let mut iter = TsmIterator::new(groups)?;
    let mut per_device: BTreeMap<DeviceId, Vec<(String, i64, i64)>> = BTreeMap::new();
    let mut bloom_keys = Vec::new();
    while let Some((device, name, ts_index)) = iter.next() {
        let start = pos(out);
        ts_index.serialize_to(out);
        let end = pos(out);
        if !name.is_empty() {
            bloom_keys.push(format!("{}.{}", device, name));
        }
        per_device.entry(device).or_default().push((name, start, end));
    }

    // 2. per-device measurement trees
    let mut device_roots: Vec<(DeviceId, i64, i64)> = Vec::new();
    for (device, entries) in &per_device {
        let aligned = entries.first().map(|(n, _, _)| n.is_empty()).unwrap_or(false);
        let region_end = entries.last().map(|(_, _, e)| *e).unwrap_or(0);

        let mut level: Vec<WrittenNode> = Vec::new();
        if aligned {
            // one leaf whose empty-named entry covers the whole record run
            let node = MetaIndexNode {
                children: vec![MetaIndexEntry {
                    key: IndexKey::Measurement(String::new()),
                    offset: entries[0].1,
                }],
                end_offset: region_end,
                node_type: MetaIndexNodeType::LeafMeasurement,
            };
            level.push(write_node(out, base, node));
        } else {
            for chunk in entries.chunks(max_degree) {
                let node = MetaIndexNode {
                    children: chunk
                        .iter()
                        .map(|(name, offset, _)| MetaIndexEntry {
                            key: IndexKey::Measurement(name.clone()),
                            offset: *offset,
                        })
                        .collect(),
                    end_offset: chunk.last().map(|(_, _, e)| *e).unwrap_or(0),
                    node_type: MetaIndexNodeType::LeafMeasurement,
                };
                level.push(write_node(out, base, node));
            }
        }

        while level.len() > 1 {
            let mut next = Vec::new();
            for chunk in level.chunks(max_degree) {
                let node = MetaIndexNode {
                    children: chunk
                        .iter()
                        .map(|n| MetaIndexEntry {
                            key: n.first_key.clone(),
                            offset: n.offset,
                        })
                        .collect(),
                    end_offset: chunk.last().map(|n| n.byte_end).unwrap_or(0),
                    node_type: MetaIndexNodeType::InternalMeasurement,
                };
                next.push(write_node(out, base, node));
            }
            level = next;
        }
        let root = level.pop().expect("device has at least one index node");
        device_roots.push((device.clone(), root.offset, root.byte_end));
    }

    // 3. per-table device trees; the final root stays in the footer
    let mut by_table: BTreeMap<String, Vec<(DeviceId, i64, i64)>> = BTreeMap::new();
    for (device, offset, end) in device_roots {
        by_table
            .entry(device.table_name().to_string())
            .or_default()
            .push((device, offset, end));
    }

    let mut table_roots = BTreeMap::new();
    for (table, devices) in by_table {
        let make_leaf = |chunk: &[(DeviceId, i64, i64)]| MetaIndexNode {
            children: chunk
                .iter()
                .map(|(d, o, _)| MetaIndexEntry {
                    key: IndexKey::Device(d.clone()),
                    offset: *o,
                })
                .collect(),
            end_offset: chunk.last().map(|(_, _, e)| *e).unwrap_or(0),
            node_type: MetaIndexNodeType::LeafDevice,
        };

        if devices.len() <= max_degree {
            table_roots.insert(table, make_leaf(&devices));
            continue;
        }

        let mut level: Vec<WrittenNode> = devices
            .chunks(max_degree)
            .map(|chunk| write_node(out, base, make_leaf(chunk)))
            .collect();
        loop {
            let mut parents = Vec::new();
            for chunk in level.chunks(max_degree) {
                let node = MetaIndexNode {
                    children: chunk
                        .iter()
                        .map(|n| MetaIndexEntry {
                            key: n.first_key.clone(),
                            offset: n.offset,
                        })
                        .collect(),
                    end_offset: chunk.last().map(|n| n.byte_end).unwrap_or(0),
                    node_type: MetaIndexNodeType::InternalDevice,
                };
                parents.push((node, chunk.last().map(|n| n.byte_end).unwrap_or(0)));
            }
            if parents.len() == 1 {
                table_roots.insert(table, parents.pop().expect("single root").0);
                break;
            }
            level = parents
                .into_iter()
                .map(|(node, _)| write_node(out, base, node))
                .collect();
        }
    }

    Ok(IndexRegion {
        table_roots,
        bloom_keys,
    })
}

fn write_node(out: &mut Vec<u8>, base: u64, node: MetaIndexNode) -> WrittenNode {
    let offset = (base + out.len() as u64) as i64;
    node.serialize_to(out);
    let byte_end = (base + out.len() as u64) as i64;
    let first_key = node
        .children
        .first()
        .map(|c| c.key.clone())
        .expect("index node has children");
    WrittenNode {
        first_key,
        offset,
        byte_end,
    }
}
