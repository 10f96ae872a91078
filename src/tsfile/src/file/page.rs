use tsfile_common::datatype::TSDataType;

use crate::error::Result;
use crate::file::marshal::{write_var_u32, ByteReader};
use crate::file::statistics::Statistics;

/// Header of one page: sizes, plus the page statistics when the owning chunk
/// holds more than one page (a single-page chunk elides them — the chunk
/// statistics are identical).
#[derive(Debug, Clone, PartialEq)]
pub struct PageHeader {
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    pub statistics: Option<Statistics>,
}

impl PageHeader {
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u32(self.uncompressed_size, out);
        write_var_u32(self.compressed_size, out);
        if let Some(stats) = &self.statistics {
            stats.serialize_to(out);
        }
    }

    pub fn deserialize_from(
        reader: &mut ByteReader<'_>,
        data_type: TSDataType,
        with_statistics: bool,
    ) -> Result<Self> {
        let uncompressed_size = reader.read_var_u32()?;
        let compressed_size = reader.read_var_u32()?;
        let statistics = if with_statistics {
            Some(Statistics::deserialize_from(reader, data_type)?)
        } else {
            None
        };
        Ok(Self {
            uncompressed_size,
            compressed_size,
            statistics,
        })
    }

    /// Worst-case header size without statistics.
    pub fn max_size_without_statistics() -> usize {
        10
    }
}

#[cfg(test)]
mod tests {
    use tsfile_common::value::Value;

    use super::*;

    #[test]
    fn test_round_trip_with_statistics() {
        let mut stats = Statistics::new(TSDataType::Int64);
        stats.update(1, &Value::Int64(42)).unwrap();
        let header = PageHeader {
            uncompressed_size: 300,
            compressed_size: 120,
            statistics: Some(stats),
        };
        let mut out = Vec::new();
        header.serialize_to(&mut out);
        let mut r = ByteReader::new(&out);
        let back = PageHeader::deserialize_from(&mut r, TSDataType::Int64, true).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn test_round_trip_without_statistics() {
        let header = PageHeader {
            uncompressed_size: 8,
            compressed_size: 8,
            statistics: None,
        };
        let mut out = Vec::new();
        header.serialize_to(&mut out);
        assert_eq!(out.len(), 2);
        let mut r = ByteReader::new(&out);
        let back = PageHeader::deserialize_from(&mut r, TSDataType::Int64, false).unwrap();
        assert_eq!(back, header);
    }
}
