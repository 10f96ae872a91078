//! PLAIN encoding: fixed-width little-endian for numerics, one byte per
//! boolean, and `{length uvarint, bytes}` per binary value.

use tsfile_common::datatype::TSDataType;
use tsfile_common::value::Value;

use crate::codec::{type_mismatch, Decoder, Encoder};
use crate::error::{Result, TsFileError};
use crate::file::marshal::{write_var_bytes, write_var_u32, ByteReader};

pub struct PlainEncoder {
    data_type: TSDataType,
    count: u32,
    values: Vec<u8>,
}

impl PlainEncoder {
    pub fn new(data_type: TSDataType) -> Self {
        Self {
            data_type,
            count: 0,
            values: Vec::new(),
        }
    }
}

impl Encoder for PlainEncoder {
    fn write(&mut self, value: &Value) -> Result<()> {
        if !value.matches_type(self.data_type) || value.is_null() {
            return Err(type_mismatch(value, self.data_type));
        }
        match value {
            Value::Boolean(v) => self.values.push(*v as u8),
            Value::Int32(v) => self.values.extend_from_slice(&v.to_le_bytes()),
            Value::Int64(v) => self.values.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => self.values.extend_from_slice(&v.to_le_bytes()),
            Value::Double(v) => self.values.extend_from_slice(&v.to_le_bytes()),
            Value::Binary(v) => write_var_bytes(v, &mut self.values),
            Value::Null => unreachable!(),
        }
        self.count += 1;
        Ok(())
    }

    fn size(&self) -> usize {
        5 + self.values.len()
    }

    fn count(&self) -> usize {
        self.count as usize
    }

    fn flush_to(&mut self, out: &mut Vec<u8>) -> Result<()> {
        write_var_u32(self.count, out);
        out.extend_from_slice(&self.values);
        self.count = 0;
        self.values.clear();
        Ok(())
    }
}

pub struct PlainDecoder {
    data_type: TSDataType,
    data: Vec<u8>,
    pos: usize,
    remaining: u32,
    initialized: bool,
}

impl PlainDecoder {
    pub fn new(data_type: TSDataType, data: Vec<u8>) -> Self {
        Self {
            data_type,
            data,
            pos: 0,
            remaining: 0,
            initialized: false,
        }
    }

    fn init(&mut self) -> Result<()> {
        if !self.initialized {
            let mut r = ByteReader::new(&self.data);
            self.remaining = r.read_var_u32()?;
            self.pos = r.pos();
            self.initialized = true;
        }
        Ok(())
    }
}

impl Decoder for PlainDecoder {
    fn has_next(&mut self) -> Result<bool> {
        self.init()?;
        Ok(self.remaining > 0)
    }

    fn next(&mut self) -> Result<Value> {
        if !self.has_next()? {
            return Err(TsFileError::NoMoreData);
        }
        let mut r = ByteReader::new(&self.data[self.pos..]);
        let value = match self.data_type {
            TSDataType::Boolean => Value::Boolean(r.read_bool()?),
            TSDataType::Int32 | TSDataType::Date => Value::Int32(r.read_i32_le()?),
            TSDataType::Int64 | TSDataType::Timestamp => Value::Int64(r.read_i64_le()?),
            TSDataType::Float => Value::Float(r.read_f32_le()?),
            TSDataType::Double => Value::Double(r.read_f64_le()?),
            TSDataType::Text | TSDataType::String | TSDataType::Blob => {
                Value::Binary(r.read_var_bytes()?)
            }
            TSDataType::Vector => Value::Int64(r.read_i64_le()?),
        };
        self.pos += r.pos();
        self.remaining -= 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(data_type: TSDataType, values: Vec<Value>) {
        let mut enc = PlainEncoder::new(data_type);
        for v in &values {
            enc.write(v).unwrap();
        }
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();

        let mut dec = PlainDecoder::new(data_type, out);
        for (i, v) in values.iter().enumerate() {
            assert!(dec.has_next().unwrap(), "expected value at {}", i);
            assert_eq!(dec.next().unwrap(), *v, "value mismatch at {}", i);
        }
        assert!(!dec.has_next().unwrap(), "decoder not exhausted");
    }

    #[test]
    fn test_plain_int32() {
        round_trip(
            TSDataType::Int32,
            vec![Value::Int32(10), Value::Int32(-20), Value::Int32(i32::MAX)],
        );
    }

    #[test]
    fn test_plain_int64() {
        round_trip(
            TSDataType::Int64,
            vec![Value::Int64(i64::MIN), Value::Int64(0), Value::Int64(i64::MAX)],
        );
    }

    #[test]
    fn test_plain_floats_bit_exact() {
        round_trip(
            TSDataType::Float,
            vec![Value::Float(f32::MIN_POSITIVE), Value::Float(-0.0), Value::Float(3.5)],
        );
        round_trip(
            TSDataType::Double,
            vec![Value::Double(f64::MAX), Value::Double(-1.0e300)],
        );
    }

    #[test]
    fn test_plain_boolean_and_binary() {
        round_trip(
            TSDataType::Boolean,
            vec![Value::Boolean(true), Value::Boolean(false)],
        );
        round_trip(
            TSDataType::String,
            vec![
                Value::Binary(b"".to_vec()),
                Value::Binary(b"hello".to_vec()),
                Value::Binary(vec![0u8; 300]),
            ],
        );
    }

    #[test]
    fn test_plain_empty() {
        let mut enc = PlainEncoder::new(TSDataType::Int32);
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();
        let mut dec = PlainDecoder::new(TSDataType::Int32, out);
        assert!(!dec.has_next().unwrap());
    }

    #[test]
    fn test_type_mismatch() {
        let mut enc = PlainEncoder::new(TSDataType::Int32);
        assert!(enc.write(&Value::Int64(1)).is_err());
        assert!(enc.write(&Value::Null).is_err());
    }
}
