use serde::{Deserialize, Serialize};

/// The primitive data types carried by a TsFile column.  The discriminant is
/// the stable on-disk tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TSDataType {
    Boolean = 0,
    Int32 = 1,
    Int64 = 2,
    Float = 3,
    Double = 4,
    /// Legacy byte-sequence type.
    Text = 5,
    /// Time-only surrogate used by the time column of an aligned group.
    Vector = 6,
    Timestamp = 8,
    Date = 9,
    Blob = 10,
    String = 11,
}

impl TSDataType {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Boolean),
            1 => Some(Self::Int32),
            2 => Some(Self::Int64),
            3 => Some(Self::Float),
            4 => Some(Self::Double),
            5 => Some(Self::Text),
            6 => Some(Self::Vector),
            8 => Some(Self::Timestamp),
            9 => Some(Self::Date),
            10 => Some(Self::Blob),
            11 => Some(Self::String),
            _ => None,
        }
    }

    /// True for TEXT, STRING and BLOB, which all carry byte sequences.
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Text | Self::String | Self::Blob)
    }
}

/// Value encodings.  The discriminant is the stable on-disk tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TSEncoding {
    Plain = 0,
    Dictionary = 1,
    Rle = 2,
    Diff = 3,
    Ts2Diff = 4,
    Bitmap = 5,
    GorillaV1 = 6,
    Regular = 7,
    Gorilla = 8,
    Zigzag = 9,
    Freq = 10,
}

impl TSEncoding {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Plain),
            1 => Some(Self::Dictionary),
            2 => Some(Self::Rle),
            3 => Some(Self::Diff),
            4 => Some(Self::Ts2Diff),
            5 => Some(Self::Bitmap),
            6 => Some(Self::GorillaV1),
            7 => Some(Self::Regular),
            8 => Some(Self::Gorilla),
            9 => Some(Self::Zigzag),
            10 => Some(Self::Freq),
            _ => None,
        }
    }
}

/// Block compressors.  The discriminant is the stable on-disk tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionType {
    Uncompressed = 0,
    Snappy = 1,
    Gzip = 2,
    Lzo = 3,
    Sdt = 4,
    Paa = 5,
    Pla = 6,
    Lz4 = 7,
    Zstd = 8,
}

impl CompressionType {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Uncompressed),
            1 => Some(Self::Snappy),
            2 => Some(Self::Gzip),
            3 => Some(Self::Lzo),
            4 => Some(Self::Sdt),
            5 => Some(Self::Paa),
            6 => Some(Self::Pla),
            7 => Some(Self::Lz4),
            8 => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// Role of a column inside a table: TAG columns identify the device, FIELD
/// columns carry measured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnCategory {
    Tag = 0,
    Field = 1,
}

impl ColumnCategory {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Tag),
            1 => Some(Self::Field),
            _ => None,
        }
    }
}
