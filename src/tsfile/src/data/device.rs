use std::fmt;

use crate::error::Result;
use crate::file::marshal::{write_var_str, write_var_u32, ByteReader};

/// Identifier of one device: an ordered, non-empty tuple of string segments.
/// The first segment is the owning table's name; for a table-model device the
/// remaining segments are the TAG column values in schema order.
///
/// Ordering and hashing consider the whole tuple, so `["a", "bc"]` and
/// `["ab", "c"]` are distinct devices.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    segments: Vec<String>,
}

impl DeviceId {
    pub fn new(segments: Vec<String>) -> Self {
        debug_assert!(!segments.is_empty());
        Self { segments }
    }

    /// Parses a dot-separated device path, e.g. `"root.sg.d1"`.
    pub fn from_path(path: &str) -> Self {
        Self {
            segments: path.split('.').map(|s| s.to_string()).collect(),
        }
    }

    /// Builds the device id of a table row: the table name followed by the
    /// TAG column values in schema order.
    pub fn from_table_tags(table_name: &str, tags: &[String]) -> Self {
        let mut segments = Vec::with_capacity(tags.len() + 1);
        segments.push(table_name.to_string());
        segments.extend(tags.iter().cloned());
        Self { segments }
    }

    pub fn table_name(&self) -> &str {
        &self.segments[0]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// TAG segments, i.e. everything after the table name.
    pub fn tag_segments(&self) -> &[String] {
        &self.segments[1..]
    }

    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u32(self.segments.len() as u32, out);
        for seg in &self.segments {
            write_var_str(seg, out);
        }
    }

    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let n = reader.read_var_u32()? as usize;
        let mut segments = Vec::with_capacity(n);
        for _ in 0..n {
            segments.push(reader.read_var_str()?);
        }
        Ok(Self { segments })
    }
}

// Display joins segments with dots; also the bloom-filter key form.
impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}
