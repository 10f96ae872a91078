//! TS_2DIFF delta encoding for monotonic-ish integer streams: the first
//! value is stored raw, later values as bit-packed offsets of their delta
//! from the block's minimum delta.
//!
//! Payload: `{count uvarint, first zigzag-varint, [minDelta zigzag-varint,
//! bitWidth u8, packed residuals]}`; the bracketed part exists only when the
//! stream has two or more values.

use tsfile_common::datatype::TSDataType;
use tsfile_common::value::Value;

use crate::codec::bitpack::{bit_width, BitReader, BitWriter};
use crate::codec::zigzag::{int_value, make_int_value};
use crate::codec::{Decoder, Encoder};
use crate::error::{Result, TsFileError};
use crate::file::marshal::{write_var_i64, write_var_u32, ByteReader};

pub struct Ts2DiffEncoder {
    data_type: TSDataType,
    values: Vec<i64>,
}

impl Ts2DiffEncoder {
    pub fn new(data_type: TSDataType) -> Self {
        Self {
            data_type,
            values: Vec::new(),
        }
    }
}

impl Encoder for Ts2DiffEncoder {
    fn write(&mut self, value: &Value) -> Result<()> {
        self.values.push(int_value(value, self.data_type)?);
        Ok(())
    }

    fn size(&self) -> usize {
        16 + self.values.len() * 9
    }

    fn count(&self) -> usize {
        self.values.len()
    }

    fn flush_to(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let values = std::mem::take(&mut self.values);
        write_var_u32(values.len() as u32, out);
        if values.is_empty() {
            return Ok(());
        }
        write_var_i64(values[0], out);
        if values.len() == 1 {
            return Ok(());
        }

        let deltas: Vec<i64> = values
            .windows(2)
            .map(|w| w[1].wrapping_sub(w[0]))
            .collect();
        let min_delta = *deltas.iter().min().unwrap_or(&0);
        let max_residual = deltas
            .iter()
            .map(|d| d.wrapping_sub(min_delta) as u64)
            .max()
            .unwrap_or(0);
        let width = bit_width(max_residual);

        write_var_i64(min_delta, out);
        out.push(width as u8);
        let mut bw = BitWriter::new();
        for d in &deltas {
            bw.write_bits(d.wrapping_sub(min_delta) as u64, width);
        }
        out.extend_from_slice(&bw.into_vec());
        Ok(())
    }
}

pub struct Ts2DiffDecoder {
    data_type: TSDataType,
    remaining: u32,
    current: i64,
    min_delta: i64,
    residuals: Option<BitReader>,
    width: u32,
    first_delivered: bool,
}

impl Ts2DiffDecoder {
    pub fn new(data_type: TSDataType, data: Vec<u8>) -> Result<Self> {
        let mut r = ByteReader::new(&data);
        let remaining = r.read_var_u32()?;
        let mut current = 0;
        let mut min_delta = 0;
        let mut width = 0;
        let mut residuals = None;
        if remaining > 0 {
            current = r.read_var_i64()?;
            if remaining > 1 {
                min_delta = r.read_var_i64()?;
                width = r.read_u8()? as u32;
                if width > 64 {
                    return Err(TsFileError::corrupted("ts2diff bit width exceeds 64"));
                }
                residuals = Some(BitReader::new(data[r.pos()..].to_vec()));
            }
        }
        Ok(Self {
            data_type,
            remaining,
            current,
            min_delta,
            residuals,
            width,
            first_delivered: false,
        })
    }
}

impl Decoder for Ts2DiffDecoder {
    fn has_next(&mut self) -> Result<bool> {
        Ok(self.remaining > 0)
    }

    fn next(&mut self) -> Result<Value> {
        if self.remaining == 0 {
            return Err(TsFileError::NoMoreData);
        }
        if !self.first_delivered {
            self.first_delivered = true;
        } else {
            let reader = self
                .residuals
                .as_mut()
                .ok_or_else(|| TsFileError::corrupted("ts2diff residual stream missing"))?;
            let residual = reader.read_bits(self.width)? as i64;
            let delta = residual.wrapping_add(self.min_delta);
            self.current = self.current.wrapping_add(delta);
        }
        self.remaining -= 1;
        Ok(make_int_value(self.current, self.data_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(data_type: TSDataType, values: Vec<Value>) -> usize {
        let mut enc = Ts2DiffEncoder::new(data_type);
        for v in &values {
            enc.write(v).unwrap();
        }
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();
        let size = out.len();

        let mut dec = Ts2DiffDecoder::new(data_type, out).unwrap();
        for (i, v) in values.iter().enumerate() {
            assert!(dec.has_next().unwrap(), "expected value at {}", i);
            assert_eq!(dec.next().unwrap(), *v, "value mismatch at {}", i);
        }
        assert!(!dec.has_next().unwrap(), "decoder not exhausted");
        size
    }

    #[test]
    fn test_regular_interval_is_one_bit_per_point() {
        let values: Vec<Value> = (0..1000).map(|i| Value::Int64(1_000_000 + i * 10)).collect();
        let size = round_trip(TSDataType::Int64, values);
        // constant deltas pack at width 1
        assert!(size < 160, "regular stream too large: {} bytes", size);
    }

    #[test]
    fn test_irregular_and_negative_deltas() {
        round_trip(
            TSDataType::Int64,
            vec![
                Value::Int64(100),
                Value::Int64(90),
                Value::Int64(500),
                Value::Int64(-3),
                Value::Int64(-3),
            ],
        );
    }

    #[test]
    fn test_extremes() {
        round_trip(
            TSDataType::Int64,
            vec![Value::Int64(i64::MIN), Value::Int64(i64::MAX), Value::Int64(0)],
        );
    }

    #[test]
    fn test_int32() {
        let values: Vec<Value> = (0..100).map(|i| Value::Int32(i * i)).collect();
        round_trip(TSDataType::Int32, values);
    }

    #[test]
    fn test_empty_and_single() {
        round_trip(TSDataType::Int64, vec![]);
        round_trip(TSDataType::Int64, vec![Value::Int64(7)]);
    }
}
