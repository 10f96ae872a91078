//! TsFileIoReader: footer discovery, metadata-index descent and chunk
//! loading over one open file.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::data::device::DeviceId;
use crate::error::{Result, TsFileError};
use crate::file::chunk::ChunkHeader;
use crate::file::marshal::ByteReader;
use crate::file::metadata::{
    IndexKey, MetaIndexEntry, MetaIndexNode, MetaIndexNodeType, TimeseriesIndex, TsFileMeta,
};
use crate::file::{MAGIC_STRING, VERSION_NUMBER};
use crate::read::cache::{CachedChunk, ChunkCache};

/// Bytes of the initial tail read used for footer discovery.
const TAIL_READ_SIZE: u64 = 1024;
/// Tail layout: footer size (4) plus magic (6).
const TAIL_MAGIC_AND_META_SIZE: u64 = 10;
/// Smallest possible file: head magic + version + tail.
const MIN_FILE_SIZE: u64 = 6 + 1 + TAIL_MAGIC_AND_META_SIZE;

/// Window read when a chunk header is parsed; covers any sane measurement
/// name plus the fixed header fields.
const CHUNK_HEADER_READ_SIZE: usize = 4096;

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct FileHandle {
    file: File,
    pub size: u64,
}

impl FileHandle {
    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(TsFileError::file_read)?;
        let mut buf = vec![0u8; len];
        self.file
            .read_exact(&mut buf)
            .await
            .map_err(TsFileError::file_read)?;
        Ok(buf)
    }
}

/// The series index loaded for one (device, measurement): a plain series or
/// an aligned pair of time and value indexes.
#[derive(Debug, Clone)]
pub enum LoadedSeries {
    Single(TimeseriesIndex),
    Aligned {
        time: TimeseriesIndex,
        value: TimeseriesIndex,
    },
}

pub struct TsFileIoReader {
    handle: Mutex<FileHandle>,
    meta: TsFileMeta,
    file_id: u64,
    cache: Option<Arc<ChunkCache>>,
}

impl TsFileIoReader {
    pub async fn open(path: impl AsRef<Path>, cache: Option<Arc<ChunkCache>>) -> Result<Self> {
        let file = File::open(path).await.map_err(TsFileError::file_read)?;
        let size = file
            .metadata()
            .await
            .map_err(TsFileError::file_read)?
            .len();
        if size < MIN_FILE_SIZE {
            return Err(TsFileError::corrupted(format!(
                "file of {} bytes is too small for a TsFile",
                size
            )));
        }
        let mut handle = FileHandle { file, size };

        let head = handle.read_at(0, 7).await?;
        if &head[..6] != MAGIC_STRING {
            return Err(TsFileError::corrupted("head magic mismatch"));
        }
        if head[6] != VERSION_NUMBER {
            return Err(TsFileError::corrupted(format!(
                "unsupported version byte 0x{:02x}",
                head[6]
            )));
        }

        let meta = Self::load_tsfile_meta(&mut handle).await?;
        debug!(tables = meta.table_index_roots.len(), size, "tsfile opened");
        Ok(Self {
            handle: Mutex::new(handle),
            meta,
            file_id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
            cache,
        })
    }

    /// Footer discovery: one tail read of `min(fileSize, 1024)` bytes; when
    /// the footer is larger than the buffer a second exact read follows.
    async fn load_tsfile_meta(handle: &mut FileHandle) -> Result<TsFileMeta> {
        let size = handle.size;
        let read_size = TAIL_READ_SIZE.min(size);
        let tail = handle.read_at(size - read_size, read_size as usize).await?;

        let magic_at = tail.len() - 6;
        if &tail[magic_at..] != MAGIC_STRING {
            return Err(TsFileError::corrupted("tail magic mismatch"));
        }
        let size_at = tail.len() - TAIL_MAGIC_AND_META_SIZE as usize;
        let footer_size = u32::from_le_bytes(
            tail[size_at..size_at + 4]
                .try_into()
                .map_err(|_| TsFileError::corrupted("short footer size field"))?,
        ) as u64;
        if footer_size + TAIL_MAGIC_AND_META_SIZE > size {
            return Err(TsFileError::corrupted(format!(
                "footer size {} exceeds file size {}",
                footer_size, size
            )));
        }

        let footer_bytes = if footer_size + TAIL_MAGIC_AND_META_SIZE > read_size {
            handle
                .read_at(
                    size - footer_size - TAIL_MAGIC_AND_META_SIZE,
                    footer_size as usize,
                )
                .await?
        } else {
            let start = tail.len() - (footer_size + TAIL_MAGIC_AND_META_SIZE) as usize;
            tail[start..size_at].to_vec()
        };

        let mut reader = ByteReader::new(&footer_bytes);
        let meta = TsFileMeta::deserialize_from(&mut reader)?;
        if reader.has_remaining() {
            return Err(TsFileError::corrupted("trailing bytes after footer"));
        }
        Ok(meta)
    }

    pub fn meta(&self) -> &TsFileMeta {
        &self.meta
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub async fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut handle = self.handle.lock().await;
        handle.read_at(offset, len).await
    }

    async fn read_region(&self, start: i64, end: i64) -> Result<Vec<u8>> {
        if end <= start || start < 0 {
            return Err(TsFileError::corrupted(format!(
                "impossible index region [{}, {})",
                start, end
            )));
        }
        self.read_at(start as u64, (end - start) as usize).await
    }

    /// Descends the device index of the device's table down to its
    /// measurement-index root region.
    pub async fn load_device_index_entry(
        &self,
        device: &DeviceId,
    ) -> Result<(MetaIndexEntry, i64)> {
        let root = self
            .meta
            .table_index_roots
            .get(device.table_name())
            .ok_or_else(|| TsFileError::DeviceNotExist(device.to_string()))?;
        let key = IndexKey::Device(device.clone());
        let result = if root.node_type == MetaIndexNodeType::LeafDevice {
            root.binary_search_children(&key, true)
        } else {
            self.search_from_internal_node(&key, root).await
        };
        result.map_err(|e| match e {
            TsFileError::NotExist(_) => TsFileError::DeviceNotExist(device.to_string()),
            other => other,
        })
    }

    /// Descends a measurement index whose root occupies `[start, end)`.
    pub async fn load_measurement_index_entry(
        &self,
        measurement: &str,
        start: i64,
        end: i64,
    ) -> Result<(MetaIndexEntry, i64)> {
        let bytes = self.read_region(start, end).await?;
        let mut reader = ByteReader::new(&bytes);
        let top = MetaIndexNode::deserialize_from(&mut reader)?;
        let key = IndexKey::Measurement(measurement.to_string());
        let result = if top.node_type == MetaIndexNodeType::LeafMeasurement {
            top.binary_search_children(&key, false)
        } else {
            self.search_from_internal_node(&key, &top).await
        };
        result.map_err(|e| match e {
            TsFileError::NotExist(_) => TsFileError::MeasurementNotExist(measurement.to_string()),
            other => other,
        })
    }

    /// Iterative top-down search: prefix descent through internal nodes,
    /// exact match on leaf-device nodes, prefix match on leaf-measurement
    /// nodes.
    async fn search_from_internal_node(
        &self,
        key: &IndexKey,
        node: &MetaIndexNode,
    ) -> Result<(MetaIndexEntry, i64)> {
        let (mut entry, mut end) = node.binary_search_children(key, false)?;
        loop {
            let bytes = self.read_region(entry.offset, end).await?;
            let mut reader = ByteReader::new(&bytes);
            let child = MetaIndexNode::deserialize_from(&mut reader)?;
            match child.node_type {
                MetaIndexNodeType::LeafDevice => {
                    return child.binary_search_children(key, true);
                }
                MetaIndexNodeType::LeafMeasurement => {
                    return child.binary_search_children(key, false);
                }
                MetaIndexNodeType::InternalDevice | MetaIndexNodeType::InternalMeasurement => {
                    let (next_entry, next_end) = child.binary_search_children(key, false)?;
                    entry = next_entry;
                    end = next_end;
                }
            }
        }
    }

    /// Reads `[start, end)` and scans the TimeseriesIndex records inside for
    /// `measurement`.  A leading VECTOR record marks an aligned device; the
    /// time index is then paired with the matching value index.
    pub async fn load_timeseries_index(
        &self,
        device: &DeviceId,
        measurement: &str,
    ) -> Result<LoadedSeries> {
        let (device_entry, device_end) = self.load_device_index_entry(device).await?;
        let (entry, end) = self
            .load_measurement_index_entry(measurement, device_entry.offset, device_end)
            .await?;
        self.scan_timeseries_index(measurement, entry.offset, end)
            .await
    }

    async fn scan_timeseries_index(
        &self,
        measurement: &str,
        start: i64,
        end: i64,
    ) -> Result<LoadedSeries> {
        let bytes = self.read_region(start, end).await?;
        let mut reader = ByteReader::new(&bytes);
        let mut time_index: Option<TimeseriesIndex> = None;
        while reader.has_remaining() {
            let ts_index = TimeseriesIndex::deserialize_from(&mut reader)?;
            if ts_index.data_type == tsfile_common::datatype::TSDataType::Vector {
                time_index = Some(ts_index);
                continue;
            }
            if ts_index.measurement_name == measurement {
                return Ok(match time_index {
                    Some(time) => LoadedSeries::Aligned {
                        time,
                        value: ts_index,
                    },
                    None => LoadedSeries::Single(ts_index),
                });
            }
        }
        Err(TsFileError::MeasurementNotExist(measurement.to_string()))
    }

    /// Every TimeseriesIndex of one device, without touching chunk data.
    pub async fn device_timeseries_indexes(
        &self,
        device: &DeviceId,
    ) -> Result<Vec<TimeseriesIndex>> {
        let (entry, end) = self.load_device_index_entry(device).await?;
        let mut leaves = Vec::new();
        self.collect_measurement_leaves(entry.offset, end, &mut leaves)
            .await?;
        let mut result = Vec::new();
        for (start, end) in leaves {
            let bytes = self.read_region(start, end).await?;
            let mut reader = ByteReader::new(&bytes);
            while reader.has_remaining() {
                result.push(TimeseriesIndex::deserialize_from(&mut reader)?);
            }
        }
        Ok(result)
    }

    /// Walks a measurement tree and collects the record regions of its leaf
    /// entries in key order.
    fn collect_measurement_leaves<'a>(
        &'a self,
        start: i64,
        end: i64,
        out: &'a mut Vec<(i64, i64)>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let bytes = self.read_region(start, end).await?;
            let mut reader = ByteReader::new(&bytes);
            let node = MetaIndexNode::deserialize_from(&mut reader)?;
            for (i, child) in node.children.iter().enumerate() {
                let child_end = if i + 1 < node.children.len() {
                    node.children[i + 1].offset
                } else {
                    node.end_offset
                };
                if node.node_type == MetaIndexNodeType::LeafMeasurement {
                    out.push((child.offset, child_end));
                } else {
                    self.collect_measurement_leaves(child.offset, child_end, out)
                        .await?;
                }
            }
            Ok(())
        })
    }

    /// All devices of one table in ascending device-id order, walking the
    /// device index from the footer root.
    pub async fn all_devices(&self, table: &str) -> Result<Vec<DeviceId>> {
        let Some(root) = self.meta.table_index_roots.get(table) else {
            return Ok(Vec::new());
        };
        let mut devices = Vec::new();
        self.collect_devices(root, &mut devices).await?;
        Ok(devices)
    }

    fn collect_devices<'a>(
        &'a self,
        node: &'a MetaIndexNode,
        out: &'a mut Vec<DeviceId>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match node.node_type {
                MetaIndexNodeType::LeafDevice => {
                    for child in &node.children {
                        if let Some(device) = child.key.as_device() {
                            out.push(device.clone());
                        }
                    }
                    Ok(())
                }
                MetaIndexNodeType::InternalDevice => {
                    for (i, child) in node.children.iter().enumerate() {
                        let child_end = if i + 1 < node.children.len() {
                            node.children[i + 1].offset
                        } else {
                            node.end_offset
                        };
                        let bytes = self.read_region(child.offset, child_end).await?;
                        let mut reader = ByteReader::new(&bytes);
                        let child_node = MetaIndexNode::deserialize_from(&mut reader)?;
                        self.collect_devices(&child_node, out).await?;
                    }
                    Ok(())
                }
                _ => Err(TsFileError::corrupted(
                    "measurement node in the device index",
                )),
            }
        })
    }

    /// Reads one chunk (header plus body), going through the shared cache
    /// when one is attached.
    pub async fn read_chunk(&self, offset: i64) -> Result<CachedChunk> {
        let key = (self.file_id, offset);
        if let Some(cache) = &self.cache {
            if let Some(chunk) = cache.get(key) {
                return Ok(chunk);
            }
        }

        let size = { self.handle.lock().await.size };
        let window_len = CHUNK_HEADER_READ_SIZE.min((size as i64 - offset).max(0) as usize);
        let window = self.read_at(offset as u64, window_len).await?;
        let mut reader = ByteReader::new(&window);
        let header = ChunkHeader::deserialize_from(&mut reader)?;
        let header_len = reader.pos();
        let data_len = header.data_size as usize;

        let data = if header_len + data_len <= window.len() {
            window[header_len..header_len + data_len].to_vec()
        } else {
            self.read_at(offset as u64 + header_len as u64, data_len)
                .await?
        };
        let chunk = CachedChunk { header, data };
        if let Some(cache) = &self.cache {
            cache.put(key, chunk.clone());
        }
        Ok(chunk)
    }
}
