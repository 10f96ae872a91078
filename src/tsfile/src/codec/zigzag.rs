//! Zigzag helpers plus the ZIGZAG column encoding (zigzag then varint per
//! value).

use integer_encoding::VarInt;
use tsfile_common::datatype::TSDataType;
use tsfile_common::value::Value;

use crate::codec::{type_mismatch, Decoder, Encoder};
use crate::error::{Result, TsFileError};
use crate::file::marshal::{write_var_u32, ByteReader};

/// zig_zag_encode folds negative and positive values across even and odd
/// numbers, e.g. [0, -1, 1, -2] becomes [0, 1, 2, 3].
#[inline]
pub fn zig_zag_encode(x: i64) -> u64 {
    ((x << 1) ^ (x >> 63)) as u64
}

/// zig_zag_decode reverses [`zig_zag_encode`].
#[inline]
pub fn zig_zag_decode(v: u64) -> i64 {
    ((v >> 1) ^ ((((v & 1) as i64) << 63) >> 63) as u64) as i64
}

pub(crate) fn int_value(value: &Value, data_type: TSDataType) -> Result<i64> {
    if !value.matches_type(data_type) {
        return Err(type_mismatch(value, data_type));
    }
    match value {
        Value::Int32(v) => Ok(*v as i64),
        Value::Int64(v) => Ok(*v),
        _ => Err(type_mismatch(value, data_type)),
    }
}

pub(crate) fn make_int_value(v: i64, data_type: TSDataType) -> Value {
    match data_type {
        TSDataType::Int32 | TSDataType::Date => Value::Int32(v as i32),
        _ => Value::Int64(v),
    }
}

pub struct ZigzagEncoder {
    data_type: TSDataType,
    count: u32,
    buf: Vec<u8>,
}

impl ZigzagEncoder {
    pub fn new(data_type: TSDataType) -> Self {
        Self {
            data_type,
            count: 0,
            buf: Vec::new(),
        }
    }
}

impl Encoder for ZigzagEncoder {
    fn write(&mut self, value: &Value) -> Result<()> {
        let v = int_value(value, self.data_type)?;
        let mut tmp = [0u8; 10];
        let n = zig_zag_encode(v).encode_var(&mut tmp);
        self.buf.extend_from_slice(&tmp[..n]);
        self.count += 1;
        Ok(())
    }

    fn size(&self) -> usize {
        5 + self.buf.len()
    }

    fn count(&self) -> usize {
        self.count as usize
    }

    fn flush_to(&mut self, out: &mut Vec<u8>) -> Result<()> {
        write_var_u32(self.count, out);
        out.extend_from_slice(&self.buf);
        self.count = 0;
        self.buf.clear();
        Ok(())
    }
}

pub struct ZigzagDecoder {
    data_type: TSDataType,
    data: Vec<u8>,
    pos: usize,
    remaining: u32,
}

impl ZigzagDecoder {
    pub fn new(data_type: TSDataType, data: Vec<u8>) -> Result<Self> {
        let mut r = ByteReader::new(&data);
        let remaining = r.read_var_u32()?;
        let pos = r.pos();
        Ok(Self {
            data_type,
            data,
            pos,
            remaining,
        })
    }
}

impl Decoder for ZigzagDecoder {
    fn has_next(&mut self) -> Result<bool> {
        Ok(self.remaining > 0)
    }

    fn next(&mut self) -> Result<Value> {
        if self.remaining == 0 {
            return Err(TsFileError::NoMoreData);
        }
        let mut r = ByteReader::new(&self.data[self.pos..]);
        let raw = r.read_var_u64()?;
        self.pos += r.pos();
        self.remaining -= 1;
        Ok(make_int_value(zig_zag_decode(raw), self.data_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zig_zag_pairs() {
        for (v, e) in [(0i64, 0u64), (-1, 1), (1, 2), (-2, 3), (i64::MAX, u64::MAX - 1)] {
            assert_eq!(zig_zag_encode(v), e, "encode {}", v);
            assert_eq!(zig_zag_decode(e), v, "decode {}", e);
        }
        assert_eq!(zig_zag_decode(zig_zag_encode(i64::MIN)), i64::MIN);
    }

    #[test]
    fn test_zigzag_codec_round_trip() {
        let values = vec![0i64, -1, 1, 500, -500, i64::MAX, i64::MIN];
        let mut enc = ZigzagEncoder::new(TSDataType::Int64);
        for v in &values {
            enc.write(&Value::Int64(*v)).unwrap();
        }
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();
        let mut dec = ZigzagDecoder::new(TSDataType::Int64, out).unwrap();
        for v in &values {
            assert!(dec.has_next().unwrap());
            assert_eq!(dec.next().unwrap(), Value::Int64(*v));
        }
        assert!(!dec.has_next().unwrap());
    }

    #[test]
    fn test_zigzag_int32() {
        let mut enc = ZigzagEncoder::new(TSDataType::Int32);
        enc.write(&Value::Int32(-7)).unwrap();
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();
        let mut dec = ZigzagDecoder::new(TSDataType::Int32, out).unwrap();
        assert_eq!(dec.next().unwrap(), Value::Int32(-7));
    }
}
