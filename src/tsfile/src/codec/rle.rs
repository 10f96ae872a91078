//! Run-length / bit-packed hybrid encoding for booleans and integers.
//!
//! Payload: `{count uvarint, bitWidth u8, runs...}`.  Each run starts with a
//! header varint `h`: when `h & 1 == 0` it is a repeated run of `h >> 1`
//! copies of one fixed-width value; when `h & 1 == 1` it is `h >> 1` groups
//! of eight bit-packed values.  Integer values are zigzagged before packing;
//! booleans are stored raw at one bit.

use tsfile_common::datatype::TSDataType;
use tsfile_common::value::Value;

use crate::codec::bitpack::{bit_width, BitReader, BitWriter};
use crate::codec::zigzag::{int_value, make_int_value, zig_zag_decode, zig_zag_encode};
use crate::codec::{type_mismatch, Decoder, Encoder};
use crate::error::{Result, TsFileError};
use crate::file::marshal::{write_var_u32, write_var_u64, ByteReader};

/// Repeats shorter than this go through the bit-packed path.
const MIN_REPEAT: usize = 8;

pub struct RleEncoder {
    data_type: TSDataType,
    values: Vec<u64>,
}

impl RleEncoder {
    pub fn new(data_type: TSDataType) -> Self {
        Self {
            data_type,
            values: Vec::new(),
        }
    }

    fn raw_value(&self, value: &Value) -> Result<u64> {
        if self.data_type == TSDataType::Boolean {
            match value {
                Value::Boolean(v) => Ok(*v as u64),
                _ => Err(type_mismatch(value, self.data_type)),
            }
        } else {
            Ok(zig_zag_encode(int_value(value, self.data_type)?))
        }
    }

    fn flush_literals(out: &mut Vec<u8>, literals: &mut Vec<u64>, width: u32) {
        let full = literals.len() / 8 * 8;
        if full > 0 {
            let groups = (full / 8) as u64;
            write_var_u64(groups << 1 | 1, out);
            let mut bw = BitWriter::new();
            for v in &literals[..full] {
                bw.write_bits(*v, width);
            }
            out.extend_from_slice(&bw.into_vec());
        }
        // the tail that does not fill a group goes out as unit runs
        for v in &literals[full..] {
            write_var_u64(1 << 1, out);
            push_fixed(out, *v, width);
        }
        literals.clear();
    }
}

fn push_fixed(out: &mut Vec<u8>, v: u64, width: u32) {
    let bytes = ((width + 7) / 8) as usize;
    out.extend_from_slice(&v.to_le_bytes()[..bytes]);
}

fn read_fixed(reader: &mut ByteReader<'_>, width: u32) -> Result<u64> {
    let bytes = ((width + 7) / 8) as usize;
    let s = reader.read_slice(bytes)?;
    let mut tmp = [0u8; 8];
    tmp[..bytes].copy_from_slice(s);
    Ok(u64::from_le_bytes(tmp))
}

impl Encoder for RleEncoder {
    fn write(&mut self, value: &Value) -> Result<()> {
        let raw = self.raw_value(value)?;
        self.values.push(raw);
        Ok(())
    }

    fn size(&self) -> usize {
        // worst case: every value bit-packed at full width plus headers
        6 + self.values.len() * 9
    }

    fn count(&self) -> usize {
        self.values.len()
    }

    fn flush_to(&mut self, out: &mut Vec<u8>) -> Result<()> {
        write_var_u32(self.values.len() as u32, out);
        if self.values.is_empty() {
            return Ok(());
        }
        let width = if self.data_type == TSDataType::Boolean {
            1
        } else {
            self.values.iter().map(|v| bit_width(*v)).max().unwrap_or(1)
        };
        out.push(width as u8);

        let values = std::mem::take(&mut self.values);
        let mut literals: Vec<u64> = Vec::new();
        let mut i = 0;
        while i < values.len() {
            let mut j = i + 1;
            while j < values.len() && values[j] == values[i] {
                j += 1;
            }
            let run = j - i;
            if run >= MIN_REPEAT {
                Self::flush_literals(out, &mut literals, width);
                write_var_u64((run as u64) << 1, out);
                push_fixed(out, values[i], width);
            } else {
                literals.extend_from_slice(&values[i..j]);
            }
            i = j;
        }
        Self::flush_literals(out, &mut literals, width);
        Ok(())
    }
}

pub struct RleDecoder {
    data_type: TSDataType,
    data: Vec<u8>,
    pos: usize,
    remaining: u32,
    width: u32,
    /// Decoded values pending delivery from the current run.
    pending: Vec<u64>,
    pending_idx: usize,
}

impl RleDecoder {
    pub fn new(data_type: TSDataType, data: Vec<u8>) -> Result<Self> {
        let mut r = ByteReader::new(&data);
        let remaining = r.read_var_u32()?;
        let width = if remaining > 0 { r.read_u8()? as u32 } else { 0 };
        if width > 64 {
            return Err(TsFileError::corrupted("rle bit width exceeds 64"));
        }
        let pos = r.pos();
        Ok(Self {
            data_type,
            data,
            pos,
            remaining,
            width,
            pending: Vec::new(),
            pending_idx: 0,
        })
    }

    fn fill_pending(&mut self) -> Result<()> {
        let mut r = ByteReader::new(&self.data[self.pos..]);
        let header = r.read_var_u64()?;
        self.pending.clear();
        self.pending_idx = 0;
        if header & 1 == 0 {
            let run = (header >> 1) as usize;
            if run == 0 {
                return Err(TsFileError::corrupted("zero-length rle run"));
            }
            let v = read_fixed(&mut r, self.width)?;
            self.pending.resize(run, v);
        } else {
            let groups = (header >> 1) as usize;
            let byte_len = (groups * 8 * self.width as usize + 7) / 8;
            let packed = r.read_slice(byte_len)?.to_vec();
            let mut br = BitReader::new(packed);
            for _ in 0..groups * 8 {
                self.pending.push(br.read_bits(self.width)?);
            }
        }
        self.pos += r.pos();
        Ok(())
    }

    fn build_value(&self, raw: u64) -> Value {
        if self.data_type == TSDataType::Boolean {
            Value::Boolean(raw != 0)
        } else {
            make_int_value(zig_zag_decode(raw), self.data_type)
        }
    }
}

impl Decoder for RleDecoder {
    fn has_next(&mut self) -> Result<bool> {
        Ok(self.remaining > 0)
    }

    fn next(&mut self) -> Result<Value> {
        if self.remaining == 0 {
            return Err(TsFileError::NoMoreData);
        }
        if self.pending_idx >= self.pending.len() {
            self.fill_pending()?;
        }
        let raw = self.pending[self.pending_idx];
        self.pending_idx += 1;
        self.remaining -= 1;
        Ok(self.build_value(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(data_type: TSDataType, values: Vec<Value>) -> usize {
        let mut enc = RleEncoder::new(data_type);
        for v in &values {
            enc.write(v).unwrap();
        }
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();
        let size = out.len();

        let mut dec = RleDecoder::new(data_type, out).unwrap();
        for (i, v) in values.iter().enumerate() {
            assert!(dec.has_next().unwrap(), "expected value at {}", i);
            assert_eq!(dec.next().unwrap(), *v, "value mismatch at {}", i);
        }
        assert!(!dec.has_next().unwrap(), "decoder not exhausted");
        size
    }

    #[test]
    fn test_long_run_compresses() {
        let values: Vec<Value> = (0..500).map(|_| Value::Int64(42)).collect();
        let size = round_trip(TSDataType::Int64, values);
        assert!(size < 16, "long run should stay tiny, got {} bytes", size);
    }

    #[test]
    fn test_mixed_runs_and_literals() {
        let mut values = Vec::new();
        for i in 0..13 {
            values.push(Value::Int64(i));
        }
        for _ in 0..20 {
            values.push(Value::Int64(-7));
        }
        for i in 0..5 {
            values.push(Value::Int64(i * 1000));
        }
        round_trip(TSDataType::Int64, values);
    }

    #[test]
    fn test_negative_and_extreme_values() {
        round_trip(
            TSDataType::Int64,
            vec![
                Value::Int64(i64::MIN),
                Value::Int64(i64::MAX),
                Value::Int64(0),
                Value::Int64(-1),
            ],
        );
    }

    #[test]
    fn test_int32_values() {
        let values: Vec<Value> = (0..100).map(|i| Value::Int32(i % 3 - 1)).collect();
        round_trip(TSDataType::Int32, values);
    }

    #[test]
    fn test_boolean_runs() {
        let mut values = vec![Value::Boolean(true); 100];
        values.extend(vec![Value::Boolean(false); 3]);
        values.push(Value::Boolean(true));
        round_trip(TSDataType::Boolean, values);
    }

    #[test]
    fn test_empty() {
        round_trip(TSDataType::Int64, vec![]);
    }

    #[test]
    fn test_single_value() {
        round_trip(TSDataType::Int64, vec![Value::Int64(99)]);
    }
}
