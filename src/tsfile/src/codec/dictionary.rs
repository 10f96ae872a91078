//! DICTIONARY encoding for binary columns: distinct values are collected in
//! first-seen order, the column body is their id stream compressed with the
//! RLE hybrid.
//!
//! Payload: `{dictSize uvarint, entries varbytes..., rle-encoded id stream}`.

use std::collections::HashMap;

use tsfile_common::datatype::TSDataType;
use tsfile_common::value::Value;

use crate::codec::rle::{RleDecoder, RleEncoder};
use crate::codec::{Decoder, Encoder};
use crate::error::{Result, TsFileError};
use crate::file::marshal::{write_var_bytes, write_var_u32, ByteReader};

pub struct DictionaryEncoder {
    entry_ids: HashMap<Vec<u8>, i32>,
    entries: Vec<Vec<u8>>,
    ids: RleEncoder,
    entry_bytes: usize,
}

impl DictionaryEncoder {
    pub fn new() -> Self {
        Self {
            entry_ids: HashMap::new(),
            entries: Vec::new(),
            ids: RleEncoder::new(TSDataType::Int32),
            entry_bytes: 0,
        }
    }
}

impl Default for DictionaryEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for DictionaryEncoder {
    fn write(&mut self, value: &Value) -> Result<()> {
        let bytes = match value {
            Value::Binary(b) => b,
            _ => {
                return Err(TsFileError::InvalidDataPoint(format!(
                    "dictionary encoding expects binary values, got {:?}",
                    value
                )))
            }
        };
        let next_id = self.entries.len() as i32;
        let id = *self.entry_ids.entry(bytes.clone()).or_insert_with(|| {
            self.entries.push(bytes.clone());
            next_id
        });
        if id == next_id {
            self.entry_bytes += bytes.len() + 5;
        }
        self.ids.write(&Value::Int32(id))
    }

    fn size(&self) -> usize {
        5 + self.entry_bytes + self.ids.size()
    }

    fn count(&self) -> usize {
        self.ids.count()
    }

    fn flush_to(&mut self, out: &mut Vec<u8>) -> Result<()> {
        write_var_u32(self.entries.len() as u32, out);
        for e in &self.entries {
            write_var_bytes(e, out);
        }
        self.ids.flush_to(out)?;
        self.entry_ids.clear();
        self.entries.clear();
        self.entry_bytes = 0;
        Ok(())
    }
}

pub struct DictionaryDecoder {
    entries: Vec<Vec<u8>>,
    ids: RleDecoder,
}

impl DictionaryDecoder {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let mut r = ByteReader::new(&data);
        let dict_size = r.read_var_u32()? as usize;
        let mut entries = Vec::with_capacity(dict_size);
        for _ in 0..dict_size {
            entries.push(r.read_var_bytes()?);
        }
        let ids = RleDecoder::new(TSDataType::Int32, data[r.pos()..].to_vec())?;
        Ok(Self { entries, ids })
    }
}

impl Decoder for DictionaryDecoder {
    fn has_next(&mut self) -> Result<bool> {
        self.ids.has_next()
    }

    fn next(&mut self) -> Result<Value> {
        let id = match self.ids.next()? {
            Value::Int32(v) => v,
            other => {
                return Err(TsFileError::corrupted(format!(
                    "dictionary id stream yielded {:?}",
                    other
                )))
            }
        };
        let entry = self
            .entries
            .get(id as usize)
            .ok_or_else(|| TsFileError::corrupted(format!("dictionary id {} out of range", id)))?;
        Ok(Value::Binary(entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(values: Vec<&[u8]>) -> usize {
        let mut enc = DictionaryEncoder::new();
        for v in &values {
            enc.write(&Value::Binary(v.to_vec())).unwrap();
        }
        let mut out = Vec::new();
        enc.flush_to(&mut out).unwrap();
        let size = out.len();

        let mut dec = DictionaryDecoder::new(out).unwrap();
        for (i, v) in values.iter().enumerate() {
            assert!(dec.has_next().unwrap(), "expected value at {}", i);
            assert_eq!(
                dec.next().unwrap(),
                Value::Binary(v.to_vec()),
                "value mismatch at {}",
                i
            );
        }
        assert!(!dec.has_next().unwrap());
        size
    }

    #[test]
    fn test_low_cardinality_compresses() {
        let values: Vec<&[u8]> = (0..300)
            .map(|i| -> &[u8] {
                if i % 2 == 0 {
                    b"running"
                } else {
                    b"stopped"
                }
            })
            .collect();
        let size = round_trip(values);
        assert!(size < 120, "dictionary stream too large: {} bytes", size);
    }

    #[test]
    fn test_unique_values() {
        let owned: Vec<Vec<u8>> = (0..50).map(|i| format!("value-{}", i).into_bytes()).collect();
        round_trip(owned.iter().map(|v| v.as_slice()).collect());
    }

    #[test]
    fn test_empty_entry_and_empty_stream() {
        round_trip(vec![b"", b"a", b""]);
        round_trip(vec![]);
    }

    #[test]
    fn test_non_binary_rejected() {
        let mut enc = DictionaryEncoder::new();
        assert!(enc.write(&Value::Int32(1)).is_err());
    }
}
