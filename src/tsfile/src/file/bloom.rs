//! Footer bloom filter over every `(table, device, measurement)` path the
//! writer saw.  False positives are possible, false negatives are not.

use std::io::Cursor;

use crate::error::Result;
use crate::file::marshal::{write_var_u32, ByteReader};

/// Murmur seeds of the up-to-eight hash probes.
const SEEDS: [u32; 8] = [5, 7, 11, 19, 31, 37, 43, 59];

const MIN_BITS: u32 = 64;
const MAX_HASHES: u32 = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    num_bits: u32,
    num_hashes: u32,
    bits: Vec<u8>,
}

impl BloomFilter {
    /// Sizes the filter for `n` expected entries at false-positive rate `p`:
    /// `m = ceil(-n ln p / (ln 2)^2)`, `k = ceil((m/n) ln 2)`.
    pub fn with_target(n: usize, p: f64) -> Self {
        let n = n.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-n * p.ln() / (ln2 * ln2)).ceil() as u32;
        let num_bits = m.max(MIN_BITS);
        let k = ((num_bits as f64 / n) * ln2).ceil() as u32;
        let num_hashes = k.clamp(1, MAX_HASHES);
        Self {
            num_bits,
            num_hashes,
            bits: vec![0u8; ((num_bits + 7) / 8) as usize],
        }
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn probe(&self, key: &[u8], i: usize) -> u32 {
        // murmur3 over an in-memory slice cannot fail
        let h = murmur3::murmur3_x64_128(&mut Cursor::new(key), SEEDS[i]).unwrap_or(0);
        ((h as u64) % self.num_bits as u64) as u32
    }

    pub fn add(&mut self, key: &[u8]) {
        for i in 0..self.num_hashes as usize {
            let bit = self.probe(key, i);
            self.bits[(bit >> 3) as usize] |= 1 << (bit & 7);
        }
    }

    pub fn may_contain(&self, key: &[u8]) -> bool {
        for i in 0..self.num_hashes as usize {
            let bit = self.probe(key, i);
            if self.bits[(bit >> 3) as usize] & (1 << (bit & 7)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u32(self.num_bits, out);
        write_var_u32(self.num_hashes, out);
        out.extend_from_slice(&self.bits);
    }

    /// A leading zero bit count marks an absent filter.
    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Option<Self>> {
        let num_bits = reader.read_var_u32()?;
        if num_bits == 0 {
            return Ok(None);
        }
        let num_hashes = reader.read_var_u32()?;
        let byte_len = ((num_bits + 7) / 8) as usize;
        let bits = reader.read_slice(byte_len)?.to_vec();
        Ok(Some(Self {
            num_bits,
            num_hashes,
            bits,
        }))
    }
}
