//! Value encoders and decoders behind the stable encoding tag bytes.
//!
//! Every payload an encoder seals is self-delimiting (a value count leads
//! each stream), so decoders never need external row counts.

pub mod bitpack;
pub mod dictionary;
pub mod gorilla;
pub mod plain;
pub mod rle;
pub mod ts2diff;
pub mod zigzag;

use tsfile_common::datatype::{TSDataType, TSEncoding};
use tsfile_common::value::Value;

use crate::error::{Result, TsFileError};

/// Encoder buffers typed values and seals them into a byte payload.
pub trait Encoder: Send {
    /// Appends one value.  The value's runtime kind must match the data type
    /// the encoder was built for.
    fn write(&mut self, value: &Value) -> Result<()>;

    /// Conservative upper bound of the sealed payload size for the values
    /// buffered so far.
    fn size(&self) -> usize;

    /// Number of buffered values.
    fn count(&self) -> usize;

    /// Seals the buffered values into `out` and resets the encoder.
    fn flush_to(&mut self, out: &mut Vec<u8>) -> Result<()>;
}

/// Decoder walks the values of one sealed payload.
pub trait Decoder: Send {
    fn has_next(&mut self) -> Result<bool>;
    fn next(&mut self) -> Result<Value>;
}

fn int_family(data_type: TSDataType) -> bool {
    matches!(
        data_type,
        TSDataType::Int32 | TSDataType::Int64 | TSDataType::Date | TSDataType::Timestamp
    )
}

/// Effective value type of a column; the time-only VECTOR surrogate stores
/// plain int64 timestamps.
fn storage_type(data_type: TSDataType) -> TSDataType {
    if data_type == TSDataType::Vector {
        TSDataType::Int64
    } else {
        data_type
    }
}

pub fn new_encoder(encoding: TSEncoding, data_type: TSDataType) -> Result<Box<dyn Encoder>> {
    let dt = storage_type(data_type);
    match encoding {
        TSEncoding::Plain => Ok(Box::new(plain::PlainEncoder::new(dt))),
        TSEncoding::Rle => {
            if dt == TSDataType::Boolean || int_family(dt) {
                Ok(Box::new(rle::RleEncoder::new(dt)))
            } else {
                Err(unsupported_pair(encoding, data_type))
            }
        }
        TSEncoding::Ts2Diff => {
            if int_family(dt) {
                Ok(Box::new(ts2diff::Ts2DiffEncoder::new(dt)))
            } else {
                Err(unsupported_pair(encoding, data_type))
            }
        }
        TSEncoding::Gorilla => {
            if matches!(dt, TSDataType::Float | TSDataType::Double) {
                Ok(Box::new(gorilla::GorillaEncoder::new(dt)))
            } else {
                Err(unsupported_pair(encoding, data_type))
            }
        }
        TSEncoding::GorillaV1 => {
            if matches!(dt, TSDataType::Float | TSDataType::Double) {
                Ok(Box::new(gorilla::GorillaV1Encoder::new(dt)))
            } else {
                Err(unsupported_pair(encoding, data_type))
            }
        }
        TSEncoding::Dictionary => {
            if dt.is_binary() {
                Ok(Box::new(dictionary::DictionaryEncoder::new()))
            } else {
                Err(unsupported_pair(encoding, data_type))
            }
        }
        TSEncoding::Zigzag => {
            if int_family(dt) {
                Ok(Box::new(zigzag::ZigzagEncoder::new(dt)))
            } else {
                Err(unsupported_pair(encoding, data_type))
            }
        }
        // Tags are reserved but their write-side emission is undefined.
        TSEncoding::Diff | TSEncoding::Bitmap | TSEncoding::Regular | TSEncoding::Freq => Err(
            TsFileError::NotSupported(format!("encoding {:?} is reserved", encoding)),
        ),
    }
}

pub fn new_decoder(
    encoding: TSEncoding,
    data_type: TSDataType,
    data: Vec<u8>,
) -> Result<Box<dyn Decoder>> {
    let dt = storage_type(data_type);
    match encoding {
        TSEncoding::Plain => Ok(Box::new(plain::PlainDecoder::new(dt, data))),
        TSEncoding::Rle => Ok(Box::new(rle::RleDecoder::new(dt, data)?)),
        TSEncoding::Ts2Diff => Ok(Box::new(ts2diff::Ts2DiffDecoder::new(dt, data)?)),
        TSEncoding::Gorilla => Ok(Box::new(gorilla::GorillaDecoder::new(dt, data)?)),
        TSEncoding::GorillaV1 => Ok(Box::new(gorilla::GorillaV1Decoder::new(dt, data))),
        TSEncoding::Dictionary => Ok(Box::new(dictionary::DictionaryDecoder::new(data)?)),
        TSEncoding::Zigzag => Ok(Box::new(zigzag::ZigzagDecoder::new(dt, data)?)),
        TSEncoding::Diff | TSEncoding::Bitmap | TSEncoding::Regular | TSEncoding::Freq => Err(
            TsFileError::NotSupported(format!("encoding {:?} is reserved", encoding)),
        ),
    }
}

/// Checks an (encoding, data type) pair at schema registration time.
pub fn check_encoding(encoding: TSEncoding, data_type: TSDataType) -> Result<()> {
    new_encoder(encoding, data_type).map(|_| ())
}

fn unsupported_pair(encoding: TSEncoding, data_type: TSDataType) -> TsFileError {
    TsFileError::InvalidArg(format!(
        "encoding {:?} does not support data type {:?}",
        encoding, data_type
    ))
}

pub(crate) fn type_mismatch(value: &Value, data_type: TSDataType) -> TsFileError {
    TsFileError::InvalidDataPoint(format!(
        "value {:?} does not match column type {:?}",
        value, data_type
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_encodings_not_supported() {
        for enc in [
            TSEncoding::Diff,
            TSEncoding::Bitmap,
            TSEncoding::Regular,
            TSEncoding::Freq,
        ] {
            assert!(matches!(
                new_encoder(enc, TSDataType::Int64),
                Err(TsFileError::NotSupported(_))
            ));
            assert!(matches!(
                new_decoder(enc, TSDataType::Int64, vec![]),
                Err(TsFileError::NotSupported(_))
            ));
        }
    }

    #[test]
    fn test_incompatible_pairs_rejected() {
        assert!(new_encoder(TSEncoding::Gorilla, TSDataType::Int64).is_err());
        assert!(new_encoder(TSEncoding::Ts2Diff, TSDataType::Double).is_err());
        assert!(new_encoder(TSEncoding::Dictionary, TSDataType::Int32).is_err());
        assert!(new_encoder(TSEncoding::Rle, TSDataType::Text).is_err());
    }

    #[test]
    fn test_vector_stores_timestamps() {
        // the time column of an aligned group encodes int64 under the hood
        let mut enc = new_encoder(TSEncoding::Ts2Diff, TSDataType::Vector).unwrap();
        enc.write(&Value::Int64(100)).unwrap();
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();
        let mut dec = new_decoder(TSEncoding::Ts2Diff, TSDataType::Vector, out).unwrap();
        assert!(dec.has_next().unwrap());
        assert_eq!(dec.next().unwrap(), Value::Int64(100));
    }
}
