//! Page writers: per-column buffers that accumulate points under one
//! encoder and seal into a compressed page body plus statistics.

use tsfile_common::datatype::{CompressionType, TSDataType, TSEncoding};
use tsfile_common::value::Value;

use crate::codec::{new_encoder, Encoder};
use crate::compress::compress;
use crate::error::Result;
use crate::file::marshal::write_var_u32;
use crate::file::page::PageHeader;
use crate::file::statistics::Statistics;
use crate::file::PAGE_TIME_STREAM_ENCODING;

/// A sealed page: compressed body plus the statistics gathered while it was
/// open.
#[derive(Debug)]
pub struct SealedPage {
    pub uncompressed_size: u32,
    pub compressed: Vec<u8>,
    pub statistics: Statistics,
}

/// Page writer of an unaligned series.  The page body interleaves nothing:
/// it is `{timeLen uvarint, encoded times, encoded values}` compressed as a
/// whole.
pub struct PageWriter {
    data_type: TSDataType,
    compression: CompressionType,
    time_encoder: Box<dyn Encoder>,
    value_encoder: Box<dyn Encoder>,
    statistics: Statistics,
}

impl PageWriter {
    pub fn new(
        data_type: TSDataType,
        encoding: TSEncoding,
        compression: CompressionType,
    ) -> Result<Self> {
        Ok(Self {
            data_type,
            compression,
            time_encoder: new_encoder(PAGE_TIME_STREAM_ENCODING, TSDataType::Vector)?,
            value_encoder: new_encoder(encoding, data_type)?,
            statistics: Statistics::new(data_type),
        })
    }

    pub fn write(&mut self, time: i64, value: &Value) -> Result<()> {
        // the encoder rejects mismatched values before any state changes
        self.value_encoder.write(value)?;
        self.time_encoder.write(&Value::Int64(time))?;
        self.statistics.update(time, value)?;
        Ok(())
    }

    pub fn point_count(&self) -> usize {
        self.value_encoder.count()
    }

    pub fn estimate_size(&self) -> usize {
        5 + self.time_encoder.size() + self.value_encoder.size()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn seal(&mut self) -> Result<SealedPage> {
        let mut time_buf = Vec::new();
        self.time_encoder.flush_to(&mut time_buf)?;
        let mut body = Vec::new();
        write_var_u32(time_buf.len() as u32, &mut body);
        body.extend_from_slice(&time_buf);
        self.value_encoder.flush_to(&mut body)?;

        let compressed = compress(self.compression, &body)?;
        let statistics =
            std::mem::replace(&mut self.statistics, Statistics::new(self.data_type));
        Ok(SealedPage {
            uncompressed_size: body.len() as u32,
            compressed,
            statistics,
        })
    }
}

/// Page writer of the time column of an aligned group; the body is the
/// encoded timestamps alone.
pub struct TimePageWriter {
    compression: CompressionType,
    time_encoder: Box<dyn Encoder>,
    statistics: Statistics,
}

impl TimePageWriter {
    pub fn new(time_encoding: TSEncoding, compression: CompressionType) -> Result<Self> {
        Ok(Self {
            compression,
            time_encoder: new_encoder(time_encoding, TSDataType::Vector)?,
            statistics: Statistics::new(TSDataType::Vector),
        })
    }

    pub fn write(&mut self, time: i64) -> Result<()> {
        self.statistics.update_time(time)?;
        self.time_encoder.write(&Value::Int64(time))
    }

    pub fn point_count(&self) -> usize {
        self.time_encoder.count()
    }

    pub fn estimate_size(&self) -> usize {
        self.time_encoder.size()
    }

    pub fn seal(&mut self) -> Result<SealedPage> {
        let mut body = Vec::new();
        self.time_encoder.flush_to(&mut body)?;
        let compressed = compress(self.compression, &body)?;
        let statistics =
            std::mem::replace(&mut self.statistics, Statistics::new(TSDataType::Vector));
        Ok(SealedPage {
            uncompressed_size: body.len() as u32,
            compressed,
            statistics,
        })
    }
}

/// Page writer of a value column of an aligned group.  Rows are tracked in a
/// null bitmap (bit set = value present); the body is `{rowCount uvarint,
/// bitmap, encoded non-null values}`.
pub struct ValuePageWriter {
    data_type: TSDataType,
    compression: CompressionType,
    value_encoder: Box<dyn Encoder>,
    statistics: Statistics,
    bitmap: Vec<u8>,
    row_count: u32,
}

impl ValuePageWriter {
    pub fn new(
        data_type: TSDataType,
        encoding: TSEncoding,
        compression: CompressionType,
    ) -> Result<Self> {
        Ok(Self {
            data_type,
            compression,
            value_encoder: new_encoder(encoding, data_type)?,
            statistics: Statistics::new(data_type),
            bitmap: Vec::new(),
            row_count: 0,
        })
    }

    /// Appends one row.  Null rows advance the bitmap but touch neither the
    /// encoder nor the statistics.
    pub fn write(&mut self, time: i64, value: &Value, is_null: bool) -> Result<()> {
        if !is_null {
            self.value_encoder.write(value)?;
            self.statistics.update(time, value)?;
        }
        let bit = self.row_count as usize;
        if bit % 8 == 0 {
            self.bitmap.push(0);
        }
        if !is_null {
            self.bitmap[bit / 8] |= 1 << (7 - (bit % 8));
        }
        self.row_count += 1;
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.row_count as usize
    }

    pub fn estimate_size(&self) -> usize {
        5 + self.bitmap.len() + self.value_encoder.size()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn seal(&mut self) -> Result<SealedPage> {
        let mut body = Vec::new();
        write_var_u32(self.row_count, &mut body);
        body.extend_from_slice(&self.bitmap);
        self.value_encoder.flush_to(&mut body)?;

        let compressed = compress(self.compression, &body)?;
        let statistics =
            std::mem::replace(&mut self.statistics, Statistics::new(self.data_type));
        self.bitmap.clear();
        self.row_count = 0;
        Ok(SealedPage {
            uncompressed_size: body.len() as u32,
            compressed,
            statistics,
        })
    }
}

impl SealedPage {
    /// The page header this page serializes under.
    pub fn header(&self, with_statistics: bool) -> PageHeader {
        PageHeader {
            uncompressed_size: self.uncompressed_size,
            compressed_size: self.compressed.len() as u32,
            statistics: with_statistics.then(|| self.statistics.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::statistics::Summary;

    #[test]
    fn test_page_writer_seal_resets() {
        let mut pw = PageWriter::new(
            TSDataType::Int32,
            TSEncoding::Plain,
            CompressionType::Uncompressed,
        )
        .unwrap();
        for (t, v) in [(1i64, 10i32), (2, 20), (3, 30)] {
            pw.write(t, &Value::Int32(v)).unwrap();
        }
        assert_eq!(pw.point_count(), 3);
        let page = pw.seal().unwrap();
        assert_eq!(page.statistics.count(), 3);
        assert_eq!(page.compressed.len(), page.uncompressed_size as usize);
        assert_eq!(pw.point_count(), 0);
        assert_eq!(pw.statistics().count(), 0);
    }

    #[test]
    fn test_value_page_writer_nulls_count_rows_only() {
        let mut vw = ValuePageWriter::new(
            TSDataType::Int64,
            TSEncoding::Plain,
            CompressionType::Uncompressed,
        )
        .unwrap();
        vw.write(100, &Value::Int64(1), false).unwrap();
        vw.write(101, &Value::Null, true).unwrap();
        vw.write(102, &Value::Int64(3), false).unwrap();
        assert_eq!(vw.row_count(), 3);
        let page = vw.seal().unwrap();
        // two non-null points in statistics, three rows in the bitmap
        assert_eq!(page.statistics.count(), 2);
        match page.statistics.summary() {
            Summary::Int64 { first, last, .. } => assert_eq!((*first, *last), (1, 3)),
            other => panic!("unexpected summary {:?}", other),
        }
        // body: rowCount varint(1) + bitmap(1) + count varint(1) + 2x8 values
        assert_eq!(page.uncompressed_size, 19);
        // bitmap bits: present, null, present -> 0b1010_0000
        assert_eq!(page.compressed[1], 0b1010_0000);
    }

    #[test]
    fn test_time_page_writer() {
        let mut tw =
            TimePageWriter::new(TSEncoding::Ts2Diff, CompressionType::Uncompressed).unwrap();
        for t in [100, 101, 102] {
            tw.write(t).unwrap();
        }
        assert_eq!(tw.point_count(), 3);
        let page = tw.seal().unwrap();
        assert_eq!(page.statistics.count(), 3);
        assert_eq!(page.statistics.start_time(), 100);
        assert_eq!(page.statistics.end_time(), 102);
    }
}
