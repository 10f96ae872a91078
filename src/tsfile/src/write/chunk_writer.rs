//! Chunk writers: accumulate sealed pages into a chunk body, maintaining
//! the single-page-elides-statistics rule through a staged first page.

use tsfile_common::datatype::{CompressionType, TSDataType, TSEncoding};
use tsfile_common::value::Value;

use crate::config::ConfigValue;
use crate::error::Result;
use crate::file::chunk::ChunkHeader;
use crate::file::page::PageHeader;
use crate::file::statistics::Statistics;
use crate::file::{TIME_COLUMN_MASK, VALUE_COLUMN_MASK};
use crate::write::page_writer::{PageWriter, SealedPage, TimePageWriter, ValuePageWriter};

/// Accumulates sealed pages.  The first page is staged aside: if it stays
/// the only page its statistics are elided, and only when a second page
/// arrives is it committed with a full header.
struct ChunkBuffer {
    data: Vec<u8>,
    num_pages: u32,
    first_page: Option<SealedPage>,
}

impl ChunkBuffer {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            num_pages: 0,
            first_page: None,
        }
    }

    fn write_page(&mut self, page: &SealedPage, with_statistics: bool) {
        page.header(with_statistics).serialize_to(&mut self.data);
        self.data.extend_from_slice(&page.compressed);
    }

    fn push_page(&mut self, page: SealedPage) {
        if self.num_pages == 0 {
            self.first_page = Some(page);
        } else {
            if let Some(first) = self.first_page.take() {
                // a second page arrived: the staged page keeps its
                // statistics after all
                self.write_page(&first, true);
            }
            self.write_page(&page, true);
        }
        self.num_pages += 1;
    }

    /// Commits a still-staged single page without statistics.
    fn end(&mut self) {
        if let Some(first) = self.first_page.take() {
            self.write_page(&first, false);
        }
    }

    fn staged_size(&self) -> usize {
        let staged = self
            .first_page
            .as_ref()
            .map(|p| p.compressed.len() + PageHeader::max_size_without_statistics())
            .unwrap_or(0);
        self.data.len() + staged
    }
}

/// Chunk writer of an unaligned series.
pub struct ChunkWriter {
    measurement_name: String,
    data_type: TSDataType,
    encoding: TSEncoding,
    compression: CompressionType,
    page_writer: PageWriter,
    chunk_statistics: Statistics,
    buffer: ChunkBuffer,
    page_max_point_count: u32,
    page_max_memory_bytes: u32,
}

impl ChunkWriter {
    pub fn new(
        measurement_name: &str,
        data_type: TSDataType,
        encoding: TSEncoding,
        compression: CompressionType,
        config: &ConfigValue,
    ) -> Result<Self> {
        Ok(Self {
            measurement_name: measurement_name.to_string(),
            data_type,
            encoding,
            compression,
            page_writer: PageWriter::new(data_type, encoding, compression)?,
            chunk_statistics: Statistics::new(data_type),
            buffer: ChunkBuffer::new(),
            page_max_point_count: config.page_max_point_count,
            page_max_memory_bytes: config.page_max_memory_bytes,
        })
    }

    pub fn write(&mut self, time: i64, value: &Value) -> Result<()> {
        self.page_writer.write(time, value)?;
        if self.page_writer.point_count() >= self.page_max_point_count as usize
            || self.page_writer.estimate_size() >= self.page_max_memory_bytes as usize
        {
            self.seal_current_page()?;
        }
        Ok(())
    }

    fn seal_current_page(&mut self) -> Result<()> {
        let page = self.page_writer.seal()?;
        self.chunk_statistics.merge(&page.statistics)?;
        self.buffer.push_page(page);
        Ok(())
    }

    /// Seals the open page and commits any staged page; afterwards the chunk
    /// body and header are final.
    pub fn end_encode_chunk(&mut self) -> Result<()> {
        if self.page_writer.point_count() > 0 {
            self.seal_current_page()?;
        }
        self.buffer.end();
        Ok(())
    }

    pub fn chunk_header(&self) -> ChunkHeader {
        ChunkHeader {
            measurement_name: self.measurement_name.clone(),
            data_size: self.buffer.data.len() as u32,
            data_type: self.data_type,
            compression: self.compression,
            encoding: self.encoding,
            num_pages: self.buffer.num_pages,
            mask: 0,
        }
    }

    pub fn chunk_data(&self) -> &[u8] {
        &self.buffer.data
    }

    pub fn statistics(&self) -> &Statistics {
        &self.chunk_statistics
    }

    pub fn num_pages(&self) -> u32 {
        self.buffer.num_pages
    }

    pub fn has_data(&self) -> bool {
        self.buffer.num_pages > 0 || self.page_writer.point_count() > 0
    }

    pub fn estimate_max_series_mem_size(&self) -> usize {
        self.buffer.staged_size()
            + self.page_writer.estimate_size()
            + PageHeader::max_size_without_statistics()
            + Statistics::max_serialized_size(self.data_type)
    }
}

/// Chunk writer of the time column of an aligned group.  Pages are sealed by
/// the owning group so value columns stay row-aligned.
pub struct TimeChunkWriter {
    data_type: TSDataType,
    encoding: TSEncoding,
    compression: CompressionType,
    page_writer: TimePageWriter,
    chunk_statistics: Statistics,
    buffer: ChunkBuffer,
}

impl TimeChunkWriter {
    pub fn new(config: &ConfigValue) -> Result<Self> {
        Ok(Self {
            data_type: TSDataType::Vector,
            encoding: config.time_encoding,
            compression: config.time_compression,
            page_writer: TimePageWriter::new(config.time_encoding, config.time_compression)?,
            chunk_statistics: Statistics::new(TSDataType::Vector),
            buffer: ChunkBuffer::new(),
        })
    }

    pub fn write(&mut self, time: i64) -> Result<()> {
        self.page_writer.write(time)
    }

    pub fn page_point_count(&self) -> usize {
        self.page_writer.point_count()
    }

    pub fn page_estimate_size(&self) -> usize {
        self.page_writer.estimate_size()
    }

    pub fn seal_current_page(&mut self) -> Result<()> {
        let page = self.page_writer.seal()?;
        self.chunk_statistics.merge(&page.statistics)?;
        self.buffer.push_page(page);
        Ok(())
    }

    pub fn end_encode_chunk(&mut self) -> Result<()> {
        if self.page_writer.point_count() > 0 {
            self.seal_current_page()?;
        }
        self.buffer.end();
        Ok(())
    }

    pub fn chunk_header(&self) -> ChunkHeader {
        ChunkHeader {
            measurement_name: String::new(),
            data_size: self.buffer.data.len() as u32,
            data_type: self.data_type,
            compression: self.compression,
            encoding: self.encoding,
            num_pages: self.buffer.num_pages,
            mask: TIME_COLUMN_MASK,
        }
    }

    pub fn chunk_data(&self) -> &[u8] {
        &self.buffer.data
    }

    pub fn statistics(&self) -> &Statistics {
        &self.chunk_statistics
    }

    pub fn has_data(&self) -> bool {
        self.buffer.num_pages > 0 || self.page_writer.point_count() > 0
    }

    pub fn estimate_max_series_mem_size(&self) -> usize {
        self.buffer.staged_size()
            + self.page_writer.estimate_size()
            + PageHeader::max_size_without_statistics()
    }
}

/// Chunk writer of a value column of an aligned group.
pub struct ValueChunkWriter {
    measurement_name: String,
    data_type: TSDataType,
    encoding: TSEncoding,
    compression: CompressionType,
    page_writer: ValuePageWriter,
    chunk_statistics: Statistics,
    buffer: ChunkBuffer,
}

impl ValueChunkWriter {
    pub fn new(
        measurement_name: &str,
        data_type: TSDataType,
        encoding: TSEncoding,
        compression: CompressionType,
    ) -> Result<Self> {
        Ok(Self {
            measurement_name: measurement_name.to_string(),
            data_type,
            encoding,
            compression,
            page_writer: ValuePageWriter::new(data_type, encoding, compression)?,
            chunk_statistics: Statistics::new(data_type),
            buffer: ChunkBuffer::new(),
        })
    }

    pub fn write(&mut self, time: i64, value: &Value, is_null: bool) -> Result<()> {
        self.page_writer.write(time, value, is_null)
    }

    pub fn page_row_count(&self) -> usize {
        self.page_writer.row_count()
    }

    pub fn seal_current_page(&mut self) -> Result<()> {
        let page = self.page_writer.seal()?;
        self.chunk_statistics.merge(&page.statistics)?;
        self.buffer.push_page(page);
        Ok(())
    }

    pub fn end_encode_chunk(&mut self) -> Result<()> {
        if self.page_writer.row_count() > 0 {
            self.seal_current_page()?;
        }
        self.buffer.end();
        Ok(())
    }

    pub fn chunk_header(&self) -> ChunkHeader {
        ChunkHeader {
            measurement_name: self.measurement_name.clone(),
            data_size: self.buffer.data.len() as u32,
            data_type: self.data_type,
            compression: self.compression,
            encoding: self.encoding,
            num_pages: self.buffer.num_pages,
            mask: VALUE_COLUMN_MASK,
        }
    }

    pub fn chunk_data(&self) -> &[u8] {
        &self.buffer.data
    }

    pub fn statistics(&self) -> &Statistics {
        &self.chunk_statistics
    }

    pub fn has_data(&self) -> bool {
        self.buffer.num_pages > 0 || self.page_writer.row_count() > 0
    }

    pub fn estimate_max_series_mem_size(&self) -> usize {
        self.buffer.staged_size()
            + self.page_writer.estimate_size()
            + PageHeader::max_size_without_statistics()
            + Statistics::max_serialized_size(self.data_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::marshal::ByteReader;
    use crate::file::ONLY_ONE_PAGE_CHUNK_HEADER_MARKER;

    fn config() -> ConfigValue {
        ConfigValue::default()
    }

    fn small_page_config() -> ConfigValue {
        ConfigValue {
            page_max_point_count: 2,
            ..ConfigValue::default()
        }
    }

    #[test]
    fn test_single_page_chunk_elides_page_statistics() {
        let mut cw = ChunkWriter::new(
            "s1",
            TSDataType::Int32,
            TSEncoding::Plain,
            CompressionType::Uncompressed,
            &config(),
        )
        .unwrap();
        for (t, v) in [(1i64, 10i32), (2, 20), (3, 30)] {
            cw.write(t, &Value::Int32(v)).unwrap();
        }
        cw.end_encode_chunk().unwrap();

        assert_eq!(cw.num_pages(), 1);
        assert_eq!(cw.chunk_header().marker(), ONLY_ONE_PAGE_CHUNK_HEADER_MARKER);
        assert_eq!(cw.statistics().count(), 3);

        // page header carries only the two size varints
        let mut r = ByteReader::new(cw.chunk_data());
        let header = PageHeader::deserialize_from(&mut r, TSDataType::Int32, false).unwrap();
        assert_eq!(header.statistics, None);
        assert_eq!(r.remaining(), header.compressed_size as usize);
    }

    #[test]
    fn test_second_page_commits_first_with_statistics() {
        let mut cw = ChunkWriter::new(
            "s1",
            TSDataType::Int32,
            TSEncoding::Plain,
            CompressionType::Uncompressed,
            &small_page_config(),
        )
        .unwrap();
        for (t, v) in [(1i64, 1i32), (2, 2), (3, 3), (4, 4), (5, 5)] {
            cw.write(t, &Value::Int32(v)).unwrap();
        }
        cw.end_encode_chunk().unwrap();

        assert_eq!(cw.num_pages(), 3);
        assert_eq!(cw.statistics().count(), 5);

        // every serialized page now carries statistics
        let mut r = ByteReader::new(cw.chunk_data());
        for page_idx in 0..3 {
            let header = PageHeader::deserialize_from(&mut r, TSDataType::Int32, true).unwrap();
            let stats = header.statistics.expect("page statistics present");
            assert!(stats.count() > 0, "page {} has empty statistics", page_idx);
            r.read_slice(header.compressed_size as usize).unwrap();
        }
        assert!(!r.has_remaining());
    }

    #[test]
    fn test_empty_chunk_has_no_data()  {
        let cw = ChunkWriter::new(
            "s1",
            TSDataType::Int32,
            TSEncoding::Plain,
            CompressionType::Uncompressed,
            &config(),
        )
        .unwrap();
        assert!(!cw.has_data());
    }

    #[test]
    fn test_aligned_writers_stay_row_aligned() {
        let cfg = config();
        let mut tw = TimeChunkWriter::new(&cfg).unwrap();
        let mut vw = ValueChunkWriter::new(
            "s1",
            TSDataType::Int64,
            TSEncoding::Plain,
            CompressionType::Uncompressed,
        )
        .unwrap();

        let rows: [(i64, Option<i64>); 3] = [(100, Some(1)), (101, None), (102, Some(3))];
        for (t, v) in rows {
            tw.write(t).unwrap();
            match v {
                Some(v) => vw.write(t, &Value::Int64(v), false).unwrap(),
                None => vw.write(t, &Value::Null, true).unwrap(),
            }
        }
        tw.end_encode_chunk().unwrap();
        vw.end_encode_chunk().unwrap();

        assert_eq!(tw.statistics().count(), 3);
        assert_eq!(vw.statistics().count(), 2);
        assert_eq!(tw.chunk_header().mask, TIME_COLUMN_MASK);
        assert_eq!(vw.chunk_header().mask, VALUE_COLUMN_MASK);
    }
}
