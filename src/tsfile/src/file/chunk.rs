use tsfile_common::datatype::{CompressionType, TSDataType, TSEncoding};

use crate::error::{Result, TsFileError};
use crate::file::marshal::{write_var_str, write_var_u32, ByteReader};
use crate::file::{
    CHUNK_HEADER_MARKER, ONLY_ONE_PAGE_CHUNK_HEADER_MARKER, TIME_COLUMN_MASK, VALUE_COLUMN_MASK,
};

/// Header of one chunk.  `mask` carries the aligned-column bits
/// (`TIME_COLUMN_MASK` / `VALUE_COLUMN_MASK`, zero for an unaligned chunk)
/// and is OR-ed into the marker byte on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHeader {
    pub measurement_name: String,
    pub data_size: u32,
    pub data_type: TSDataType,
    pub compression: CompressionType,
    pub encoding: TSEncoding,
    pub num_pages: u32,
    pub mask: u8,
}

impl ChunkHeader {
    pub fn marker(&self) -> u8 {
        let base = if self.num_pages <= 1 {
            ONLY_ONE_PAGE_CHUNK_HEADER_MARKER
        } else {
            CHUNK_HEADER_MARKER
        };
        base | self.mask
    }

    pub fn is_single_page(&self) -> bool {
        self.num_pages <= 1
    }

    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        out.push(self.marker());
        write_var_str(&self.measurement_name, out);
        write_var_u32(self.data_size, out);
        out.push(self.data_type.to_u8());
        out.push(self.compression.to_u8());
        out.push(self.encoding.to_u8());
    }

    /// Parses a chunk header including its marker byte.  `num_pages` is
    /// recovered from the marker only as far as single/multi page.
    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let marker = reader.read_u8()?;
        let mask = marker & (TIME_COLUMN_MASK | VALUE_COLUMN_MASK);
        let base = marker & !(TIME_COLUMN_MASK | VALUE_COLUMN_MASK);
        let num_pages = match base {
            ONLY_ONE_PAGE_CHUNK_HEADER_MARKER => 1,
            CHUNK_HEADER_MARKER => 2,
            other => {
                return Err(TsFileError::corrupted(format!(
                    "unexpected chunk marker 0x{:02x}",
                    other
                )))
            }
        };
        let measurement_name = reader.read_var_str()?;
        let data_size = reader.read_var_u32()?;
        let data_type = TSDataType::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::corrupted("unknown data type tag in chunk header"))?;
        let compression = CompressionType::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::corrupted("unknown compression tag in chunk header"))?;
        let encoding = TSEncoding::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::corrupted("unknown encoding tag in chunk header"))?;
        Ok(Self {
            measurement_name,
            data_size,
            data_type,
            compression,
            encoding,
            num_pages,
            mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_reflects_page_count_and_mask() {
        let mut header = ChunkHeader {
            measurement_name: "s1".to_string(),
            data_size: 10,
            data_type: TSDataType::Int32,
            compression: CompressionType::Uncompressed,
            encoding: TSEncoding::Plain,
            num_pages: 1,
            mask: 0,
        };
        assert_eq!(header.marker(), ONLY_ONE_PAGE_CHUNK_HEADER_MARKER);
        header.num_pages = 3;
        assert_eq!(header.marker(), CHUNK_HEADER_MARKER);
        header.mask = TIME_COLUMN_MASK;
        assert_eq!(header.marker(), CHUNK_HEADER_MARKER | TIME_COLUMN_MASK);
    }

    #[test]
    fn test_round_trip() {
        let header = ChunkHeader {
            measurement_name: "speed".to_string(),
            data_size: 12345,
            data_type: TSDataType::Double,
            compression: CompressionType::Snappy,
            encoding: TSEncoding::Gorilla,
            num_pages: 4,
            mask: VALUE_COLUMN_MASK,
        };
        let mut out = Vec::new();
        header.serialize_to(&mut out);
        let mut r = ByteReader::new(&out);
        let back = ChunkHeader::deserialize_from(&mut r).unwrap();
        assert_eq!(back.measurement_name, header.measurement_name);
        assert_eq!(back.data_size, header.data_size);
        assert_eq!(back.data_type, header.data_type);
        assert_eq!(back.compression, header.compression);
        assert_eq!(back.encoding, header.encoding);
        assert_eq!(back.mask, header.mask);
        assert!(!back.is_single_page());
    }
}
