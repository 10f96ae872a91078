//! Block compressors behind the stable compression tag bytes.  Compressors
//! operate on already-encoded page bodies; UNCOMPRESSED is the identity.

use std::io::{Read, Write};

use tsfile_common::datatype::CompressionType;

use crate::error::{Result, TsFileError};

/// compress seals an encoded page body with the given compressor.
pub fn compress(kind: CompressionType, data: &[u8]) -> Result<Vec<u8>> {
    match kind {
        CompressionType::Uncompressed => Ok(data.to_vec()),
        CompressionType::Snappy => {
            let mut encoder = snap::raw::Encoder::new();
            encoder
                .compress_vec(data)
                .map_err(|e| TsFileError::InvalidArg(format!("snappy compress: {}", e)))
        }
        CompressionType::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| TsFileError::InvalidArg(format!("gzip compress: {}", e)))
        }
        CompressionType::Lz4 => Ok(lz4_flex::block::compress(data)),
        CompressionType::Zstd => zstd::stream::encode_all(data, 0)
            .map_err(|e| TsFileError::InvalidArg(format!("zstd compress: {}", e))),
        CompressionType::Lzo | CompressionType::Sdt | CompressionType::Paa | CompressionType::Pla => {
            Err(TsFileError::NotSupported(format!(
                "compression {:?} is reserved",
                kind
            )))
        }
    }
}

/// decompress recovers a page body; `uncompressed_size` comes from the page
/// header and is validated against the output.
pub fn decompress(kind: CompressionType, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
    let out = match kind {
        CompressionType::Uncompressed => data.to_vec(),
        CompressionType::Snappy => {
            let mut decoder = snap::raw::Decoder::new();
            decoder
                .decompress_vec(data)
                .map_err(|e| TsFileError::corrupted(format!("snappy decompress: {}", e)))?
        }
        CompressionType::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::with_capacity(uncompressed_size);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| TsFileError::corrupted(format!("gzip decompress: {}", e)))?;
            out
        }
        CompressionType::Lz4 => lz4_flex::block::decompress(data, uncompressed_size)
            .map_err(|e| TsFileError::corrupted(format!("lz4 decompress: {}", e)))?,
        CompressionType::Zstd => zstd::stream::decode_all(data)
            .map_err(|e| TsFileError::corrupted(format!("zstd decompress: {}", e)))?,
        CompressionType::Lzo | CompressionType::Sdt | CompressionType::Paa | CompressionType::Pla => {
            return Err(TsFileError::NotSupported(format!(
                "compression {:?} is reserved",
                kind
            )))
        }
    };
    if out.len() != uncompressed_size {
        return Err(TsFileError::corrupted(format!(
            "decompressed size mismatch: got {}, exp {}",
            out.len(),
            uncompressed_size
        )));
    }
    Ok(out)
}
