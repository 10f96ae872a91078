//! Gorilla XOR compression for floats, as presented in the Facebook Gorilla
//! paper: each value is XOR-ed with its predecessor and only the changed
//! significant bits are stored, together with leading/trailing zero counts.
//!
//! The current layout (`GORILLA`) leads with a value count, so any float
//! including NaN round-trips bit-exactly.  The legacy layout (`GORILLA_V1`)
//! has no count and terminates the stream with a NaN sentinel, which
//! consequently cannot be stored.

use tsfile_common::datatype::TSDataType;
use tsfile_common::value::Value;

use crate::codec::bitpack::{BitReader, BitWriter};
use crate::codec::{type_mismatch, Decoder, Encoder};
use crate::error::{Result, TsFileError};
use crate::file::marshal::{write_var_u32, ByteReader};

const F64_LENGTH_BITS: u32 = 64;
const F64_LEADING_BITS: u32 = 5;
const F64_SIGNIFICANT_BITS: u32 = 6;
const F32_LENGTH_BITS: u32 = 32;
const F32_LEADING_BITS: u32 = 5;
const F32_SIGNIFICANT_BITS: u32 = 6;

const F64_NAN_BITS: u64 = 0x7FF8000000000001;
const F32_NAN_BITS: u64 = 0x7FC00001;

struct XorState {
    length_bits: u32,
    leading_bits: u32,
    significant_bits: u32,
    value: u64,
    leading: u32,
    trailing: u32,
    first: bool,
}

impl XorState {
    fn new(data_type: TSDataType) -> Self {
        let (length_bits, leading_bits, significant_bits) = if data_type == TSDataType::Float {
            (F32_LENGTH_BITS, F32_LEADING_BITS, F32_SIGNIFICANT_BITS)
        } else {
            (F64_LENGTH_BITS, F64_LEADING_BITS, F64_SIGNIFICANT_BITS)
        };
        Self {
            length_bits,
            leading_bits,
            significant_bits,
            value: 0,
            leading: u32::MAX,
            trailing: 0,
            first: true,
        }
    }

    fn encode(&mut self, bits: u64, bw: &mut BitWriter) {
        if self.first {
            self.first = false;
            self.value = bits;
            bw.write_bits(bits, self.length_bits);
            return;
        }

        let xor = bits ^ self.value;
        self.value = bits;
        if xor == 0 {
            bw.write_bit(false);
            return;
        }
        bw.write_bit(true);

        let mut leading = xor.leading_zeros() - (64 - self.length_bits);
        let trailing = xor.trailing_zeros();
        let max_leading = (1 << self.leading_bits) - 1;
        if leading > max_leading {
            leading = max_leading;
        }

        if self.leading != u32::MAX && leading >= self.leading && trailing >= self.trailing {
            // the changed bits fit in the previous window
            bw.write_bit(false);
            bw.write_bits(
                xor >> self.trailing,
                self.length_bits - self.leading - self.trailing,
            );
        } else {
            self.leading = leading;
            self.trailing = trailing;
            let significant = self.length_bits - leading - trailing;
            bw.write_bit(true);
            bw.write_bits(leading as u64, self.leading_bits);
            // significant == length_bits cannot happen (xor != 0 keeps at
            // least one zero in leading+trailing is not guaranteed, but the
            // stored field is modulo the field width and restored as the
            // full width on read)
            bw.write_bits(
                (significant % (1 << self.significant_bits)) as u64,
                self.significant_bits,
            );
            bw.write_bits(xor >> trailing, significant);
        }
    }

    fn decode(&mut self, br: &mut BitReader) -> Result<u64> {
        if self.first {
            self.first = false;
            self.value = br.read_bits(self.length_bits)?;
            return Ok(self.value);
        }

        if !br.read_bit()? {
            return Ok(self.value);
        }
        if br.read_bit()? {
            self.leading = br.read_bits(self.leading_bits)? as u32;
            let mut significant = br.read_bits(self.significant_bits)? as u32;
            if significant == 0 {
                significant = 1 << self.significant_bits;
            }
            if self.leading + significant > self.length_bits {
                return Err(TsFileError::corrupted("gorilla window exceeds value width"));
            }
            self.trailing = self.length_bits - self.leading - significant;
        }
        let significant = self.length_bits - self.leading - self.trailing;
        let bits = br.read_bits(significant)?;
        self.value ^= bits << self.trailing;
        Ok(self.value)
    }
}

fn value_bits(value: &Value, data_type: TSDataType) -> Result<u64> {
    match (value, data_type) {
        (Value::Float(v), TSDataType::Float) => Ok(v.to_bits() as u64),
        (Value::Double(v), TSDataType::Double) => Ok(v.to_bits()),
        _ => Err(type_mismatch(value, data_type)),
    }
}

fn bits_value(bits: u64, data_type: TSDataType) -> Value {
    if data_type == TSDataType::Float {
        Value::Float(f32::from_bits(bits as u32))
    } else {
        Value::Double(f64::from_bits(bits))
    }
}

pub struct GorillaEncoder {
    data_type: TSDataType,
    state: XorState,
    count: u32,
    bw: BitWriter,
}

impl GorillaEncoder {
    pub fn new(data_type: TSDataType) -> Self {
        Self {
            data_type,
            state: XorState::new(data_type),
            count: 0,
            bw: BitWriter::new(),
        }
    }
}

impl Encoder for GorillaEncoder {
    fn write(&mut self, value: &Value) -> Result<()> {
        let bits = value_bits(value, self.data_type)?;
        self.state.encode(bits, &mut self.bw);
        self.count += 1;
        Ok(())
    }

    fn size(&self) -> usize {
        5 + self.bw.len() + 16
    }

    fn count(&self) -> usize {
        self.count as usize
    }

    fn flush_to(&mut self, out: &mut Vec<u8>) -> Result<()> {
        write_var_u32(self.count, out);
        let bw = std::mem::take(&mut self.bw);
        out.extend_from_slice(&bw.into_vec());
        self.state = XorState::new(self.data_type);
        self.count = 0;
        Ok(())
    }
}

pub struct GorillaDecoder {
    data_type: TSDataType,
    state: XorState,
    remaining: u32,
    br: BitReader,
}

impl GorillaDecoder {
    pub fn new(data_type: TSDataType, data: Vec<u8>) -> Result<Self> {
        let mut r = ByteReader::new(&data);
        let remaining = r.read_var_u32()?;
        let br = BitReader::new(data[r.pos()..].to_vec());
        Ok(Self {
            data_type,
            state: XorState::new(data_type),
            remaining,
            br,
        })
    }
}

impl Decoder for GorillaDecoder {
    fn has_next(&mut self) -> Result<bool> {
        Ok(self.remaining > 0)
    }

    fn next(&mut self) -> Result<Value> {
        if self.remaining == 0 {
            return Err(TsFileError::NoMoreData);
        }
        let bits = self.state.decode(&mut self.br)?;
        self.remaining -= 1;
        Ok(bits_value(bits, self.data_type))
    }
}

/// Legacy layout: no count prefix, NaN terminates the stream.
pub struct GorillaV1Encoder {
    data_type: TSDataType,
    state: XorState,
    count: u32,
    bw: BitWriter,
}

impl GorillaV1Encoder {
    pub fn new(data_type: TSDataType) -> Self {
        Self {
            data_type,
            state: XorState::new(data_type),
            count: 0,
            bw: BitWriter::new(),
        }
    }

    fn nan_bits(&self) -> u64 {
        if self.data_type == TSDataType::Float {
            F32_NAN_BITS
        } else {
            F64_NAN_BITS
        }
    }
}

impl Encoder for GorillaV1Encoder {
    fn write(&mut self, value: &Value) -> Result<()> {
        let bits = value_bits(value, self.data_type)?;
        let is_nan = match value {
            Value::Float(v) => v.is_nan(),
            Value::Double(v) => v.is_nan(),
            _ => false,
        };
        if is_nan {
            return Err(TsFileError::InvalidArg(
                "NaN is the stream terminator of GORILLA_V1".to_string(),
            ));
        }
        self.state.encode(bits, &mut self.bw);
        self.count += 1;
        Ok(())
    }

    fn size(&self) -> usize {
        self.bw.len() + 16
    }

    fn count(&self) -> usize {
        self.count as usize
    }

    fn flush_to(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.count > 0 {
            let sentinel = self.nan_bits();
            self.state.encode(sentinel, &mut self.bw);
        }
        let bw = std::mem::take(&mut self.bw);
        out.extend_from_slice(&bw.into_vec());
        self.state = XorState::new(self.data_type);
        self.count = 0;
        Ok(())
    }
}

pub struct GorillaV1Decoder {
    data_type: TSDataType,
    state: XorState,
    br: BitReader,
    peeked: Option<u64>,
    finished: bool,
}

impl GorillaV1Decoder {
    pub fn new(data_type: TSDataType, data: Vec<u8>) -> Self {
        let finished = data.is_empty();
        Self {
            data_type,
            state: XorState::new(data_type),
            br: BitReader::new(data),
            peeked: None,
            finished,
        }
    }

    fn nan_bits(&self) -> u64 {
        if self.data_type == TSDataType::Float {
            F32_NAN_BITS
        } else {
            F64_NAN_BITS
        }
    }
}

impl Decoder for GorillaV1Decoder {
    fn has_next(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        if self.peeked.is_none() {
            let bits = self.state.decode(&mut self.br)?;
            if bits == self.nan_bits() {
                self.finished = true;
                return Ok(false);
            }
            self.peeked = Some(bits);
        }
        Ok(true)
    }

    fn next(&mut self) -> Result<Value> {
        if !self.has_next()? {
            return Err(TsFileError::NoMoreData);
        }
        let bits = self.peeked.take().ok_or(TsFileError::NoMoreData)?;
        Ok(bits_value(bits, self.data_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_f64(values: Vec<f64>) -> usize {
        let mut enc = GorillaEncoder::new(TSDataType::Double);
        for v in &values {
            enc.write(&Value::Double(*v)).unwrap();
        }
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();
        let size = out.len();

        let mut dec = GorillaDecoder::new(TSDataType::Double, out).unwrap();
        for (i, v) in values.iter().enumerate() {
            assert!(dec.has_next().unwrap(), "expected value at {}", i);
            let got = dec.next().unwrap().as_f64().unwrap();
            assert_eq!(
                got.to_bits(),
                v.to_bits(),
                "bit mismatch at {}: got {}, exp {}",
                i,
                got,
                v
            );
        }
        assert!(!dec.has_next().unwrap());
        size
    }

    #[test]
    fn test_identical_values_compress_to_single_bits() {
        let size = round_trip_f64(vec![15.5; 300]);
        // one 64-bit first value, then one zero bit per repeat
        assert!(size < 64, "repeated values too large: {} bytes", size);
    }

    #[test]
    fn test_drifting_values() {
        let values: Vec<f64> = (0..500).map(|i| 20.0 + (i as f64) * 0.25).collect();
        round_trip_f64(values);
    }

    #[test]
    fn test_special_values_bit_exact() {
        round_trip_f64(vec![
            0.0,
            -0.0,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::MIN_POSITIVE,
            f64::MAX,
        ]);
    }

    #[test]
    fn test_f32_round_trip() {
        let values = vec![1.5f32, 1.5, -2.25, 1000.125, 0.0];
        let mut enc = GorillaEncoder::new(TSDataType::Float);
        for v in &values {
            enc.write(&Value::Float(*v)).unwrap();
        }
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();
        let mut dec = GorillaDecoder::new(TSDataType::Float, out).unwrap();
        for v in &values {
            assert_eq!(
                dec.next().unwrap().as_f32().unwrap().to_bits(),
                v.to_bits()
            );
        }
    }

    #[test]
    fn test_v1_round_trip_and_nan_rejected() {
        let values = vec![3.25f64, 3.25, 7.75, -0.5];
        let mut enc = GorillaV1Encoder::new(TSDataType::Double);
        for v in &values {
            enc.write(&Value::Double(*v)).unwrap();
        }
        assert!(enc.write(&Value::Double(f64::NAN)).is_err());
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();

        let mut dec = GorillaV1Decoder::new(TSDataType::Double, out);
        for v in &values {
            assert!(dec.has_next().unwrap());
            assert_eq!(dec.next().unwrap(), Value::Double(*v));
        }
        assert!(!dec.has_next().unwrap());
    }

    #[test]
    fn test_empty_streams() {
        let mut enc = GorillaEncoder::new(TSDataType::Double);
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();
        let mut dec = GorillaDecoder::new(TSDataType::Double, out).unwrap();
        assert!(!dec.has_next().unwrap());

        let mut dec = GorillaV1Decoder::new(TSDataType::Double, vec![]);
        assert!(!dec.has_next().unwrap());
    }
}
