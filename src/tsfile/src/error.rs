//! Error and Result types for TsFile operations.

use std::io;

use thiserror::Error;

/// A convenience `Result` type for TsFile operations.
pub type Result<T> = std::result::Result<T, TsFileError>;

/// The error type for TsFile operations.  Every variant carries a stable
/// integer tag (see [`TsFileError::code`]) so bindings can map errors without
/// string matching.
#[derive(Debug, Error)]
pub enum TsFileError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not exist: {0}")]
    NotExist(String),

    #[error("device not exist: {0}")]
    DeviceNotExist(String),

    #[error("measurement not exist: {0}")]
    MeasurementNotExist(String),

    #[error("table not exist: {0}")]
    TableNotExist(String),

    #[error("column not exist: {0}")]
    ColumnNotExist(String),

    #[error("invalid data point: {0}")]
    InvalidDataPoint(String),

    #[error("file read error: {0}")]
    FileRead(io::Error),

    #[error("file write error: {0}")]
    FileWrite(io::Error),

    #[error("tsfile corrupted: {0}")]
    TsFileCorrupted(String),

    #[error("out of memory: {0}")]
    Oom(String),

    /// Iterator sentinel; surfaced to users as `Ok(None)`, never as an error.
    #[error("no more data")]
    NoMoreData,

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("unsupported result order: {0}")]
    UnsupportedOrder(String),

    #[error("statistics class mismatch: {0}")]
    StatisticsClassMismatch(String),
}

impl TsFileError {
    /// The stable integer tag of this error kind.
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidArg(_) => 1,
            Self::InvalidState(_) => 2,
            Self::AlreadyExists(_) => 3,
            Self::NotExist(_) => 4,
            Self::DeviceNotExist(_) => 5,
            Self::MeasurementNotExist(_) => 6,
            Self::TableNotExist(_) => 7,
            Self::ColumnNotExist(_) => 8,
            Self::InvalidDataPoint(_) => 9,
            Self::FileRead(_) => 10,
            Self::FileWrite(_) => 11,
            Self::TsFileCorrupted(_) => 12,
            Self::Oom(_) => 13,
            Self::NoMoreData => 14,
            Self::NotSupported(_) => 15,
            Self::UnsupportedOrder(_) => 16,
            Self::StatisticsClassMismatch(_) => 17,
        }
    }

    pub fn file_read(e: io::Error) -> Self {
        Self::FileRead(e)
    }

    pub fn file_write(e: io::Error) -> Self {
        Self::FileWrite(e)
    }

    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::TsFileCorrupted(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_and_stable() {
        let errs: Vec<TsFileError> = vec![
            TsFileError::InvalidArg(String::new()),
            TsFileError::InvalidState(String::new()),
            TsFileError::AlreadyExists(String::new()),
            TsFileError::NotExist(String::new()),
            TsFileError::DeviceNotExist(String::new()),
            TsFileError::MeasurementNotExist(String::new()),
            TsFileError::TableNotExist(String::new()),
            TsFileError::ColumnNotExist(String::new()),
            TsFileError::InvalidDataPoint(String::new()),
            TsFileError::FileRead(io::Error::new(io::ErrorKind::Other, "x")),
            TsFileError::FileWrite(io::Error::new(io::ErrorKind::Other, "x")),
            TsFileError::TsFileCorrupted(String::new()),
            TsFileError::Oom(String::new()),
            TsFileError::NoMoreData,
            TsFileError::NotSupported(String::new()),
            TsFileError::UnsupportedOrder(String::new()),
            TsFileError::StatisticsClassMismatch(String::new()),
        ];
        let mut seen = std::collections::HashSet::new();
        for (i, e) in errs.iter().enumerate() {
            assert_eq!(e.code(), i as u32 + 1, "code drift for {:?}", e);
            assert!(seen.insert(e.code()));
        }
    }
}
