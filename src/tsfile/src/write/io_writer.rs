//! TsFileIoWriter owns the output file and the byte-level framing: magic,
//! chunk group headers, chunk headers and bodies, and the close-time index
//! and footer emission.  Bytes are staged in memory and reach the file at
//! chunk-group granularity, so an aborted group never leaves a torn prefix.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::ConfigValue;
use crate::data::device::DeviceId;
use crate::error::{Result, TsFileError};
use crate::file::bloom::BloomFilter;
use crate::file::chunk::ChunkHeader;
use crate::file::marshal::write_u32_le;
use crate::file::metadata::{ChunkGroupMeta, ChunkMeta, TsFileMeta};
use crate::file::statistics::Statistics;
use crate::file::{CHUNK_GROUP_HEADER_MARKER, MAGIC_STRING, VERSION_NUMBER};
use crate::schema::TableSchema;
use crate::write::index_builder::build_index_region;

#[derive(Debug)]
pub struct TsFileIoWriter {
    file: File,
    /// Bytes staged since the last file write.
    out: Vec<u8>,
    /// Bytes already handed to the file.
    file_pos: u64,
    chunk_group_metas: Vec<ChunkGroupMeta>,
    current_group: Option<ChunkGroupMeta>,
    current_chunk_offset: i64,
    started: bool,
}

impl TsFileIoWriter {
    /// Creates the output file; an existing file is refused.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    TsFileError::AlreadyExists("output file".to_string())
                } else {
                    TsFileError::file_write(e)
                }
            })?;
        Ok(Self {
            file,
            out: Vec::with_capacity(1024 * 1024),
            file_pos: 0,
            chunk_group_metas: Vec::new(),
            current_group: None,
            current_chunk_offset: 0,
            started: false,
        })
    }

    /// Current logical write position: flushed bytes plus staged bytes.
    pub fn pos(&self) -> u64 {
        self.file_pos + self.out.len() as u64
    }

    /// Writes the head magic and version byte once.
    pub fn start_file(&mut self) {
        if !self.started {
            self.out.extend_from_slice(MAGIC_STRING);
            self.out.push(VERSION_NUMBER);
            self.started = true;
        }
    }

    pub fn start_chunk_group(&mut self, device_id: DeviceId) {
        self.start_file();
        self.out.push(CHUNK_GROUP_HEADER_MARKER);
        device_id.serialize_to(&mut self.out);
        self.current_group = Some(ChunkGroupMeta {
            device_id,
            chunk_metas: Vec::new(),
        });
    }

    /// Writes a chunk header, remembering its offset for the chunk meta.
    pub fn start_flush_chunk(&mut self, header: &ChunkHeader) {
        self.current_chunk_offset = self.pos() as i64;
        header.serialize_to(&mut self.out);
    }

    pub fn flush_chunk_data(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }

    pub fn end_flush_chunk(&mut self, header: &ChunkHeader, statistics: Statistics) {
        let group = self
            .current_group
            .as_mut()
            .expect("end_flush_chunk outside a chunk group");
        group.chunk_metas.push(ChunkMeta {
            measurement_name: header.measurement_name.clone(),
            offset_of_chunk_header: self.current_chunk_offset,
            data_type: header.data_type,
            mask: header.mask,
            statistics,
        });
    }

    /// Seals the group and pushes the staged bytes to the file.
    pub async fn end_chunk_group(&mut self) -> Result<()> {
        if let Some(group) = self.current_group.take() {
            debug!(
                device = %group.device_id,
                chunks = group.chunk_metas.len(),
                "chunk group flushed"
            );
            self.chunk_group_metas.push(group);
        }
        self.flush_buffer().await
    }

    async fn flush_buffer(&mut self) -> Result<()> {
        if !self.out.is_empty() {
            self.file
                .write_all(&self.out)
                .await
                .map_err(TsFileError::file_write)?;
            self.file_pos += self.out.len() as u64;
            self.out.clear();
        }
        Ok(())
    }

    /// Emits the index region, bloom filter, footer, footer size and tail
    /// magic, then syncs the file.
    pub async fn end_file(
        &mut self,
        table_schemas: &BTreeMap<String, TableSchema>,
        config: &ConfigValue,
    ) -> Result<()> {
        self.start_file();
        self.flush_buffer().await?;

        let meta_offset = self.file_pos as i64;
        let region = build_index_region(
            &mut self.out,
            self.file_pos,
            &self.chunk_group_metas,
            config.max_degree_of_index_node as usize,
        )?;

        let mut bloom = BloomFilter::with_target(
            region.bloom_keys.len(),
            config.bloom_filter_error_rate,
        );
        for key in &region.bloom_keys {
            bloom.add(key.as_bytes());
        }

        let meta = TsFileMeta {
            table_index_roots: region.table_roots,
            table_schemas: table_schemas.clone(),
            meta_offset,
            bloom_filter: Some(bloom),
            properties: Vec::new(),
        };
        let mut footer = Vec::new();
        meta.serialize_to(&mut footer);
        self.out.extend_from_slice(&footer);
        write_u32_le(footer.len() as u32, &mut self.out);
        self.out.extend_from_slice(MAGIC_STRING);

        self.flush_buffer().await?;
        self.file
            .sync_all()
            .await
            .map_err(TsFileError::file_write)?;
        debug!(
            footer_bytes = footer.len(),
            file_bytes = self.file_pos,
            "tsfile sealed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.tsfile");
        let _w = TsFileIoWriter::create(&path).await.unwrap();
        let err = TsFileIoWriter::create(&path).await.unwrap_err();
        assert!(matches!(err, TsFileError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_empty_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.tsfile");
        let mut w = TsFileIoWriter::create(&path).await.unwrap();
        w.end_file(&BTreeMap::new(), &ConfigValue::default())
            .await
            .unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[..6], MAGIC_STRING);
        assert_eq!(data[6], VERSION_NUMBER);
        assert_eq!(&data[data.len() - 6..], MAGIC_STRING);
        let size_pos = data.len() - 10;
        let footer_size = u32::from_le_bytes(data[size_pos..size_pos + 4].try_into().unwrap());
        // footer spans everything between head magic+version and its size
        assert_eq!(7 + footer_size as usize, size_pos);
    }
}
