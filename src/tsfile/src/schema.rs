//! Measurement, column and table schemas plus their on-disk form.

use tsfile_common::datatype::{ColumnCategory, CompressionType, TSDataType, TSEncoding};

use crate::error::{Result, TsFileError};
use crate::file::marshal::{write_var_str, write_var_u32, ByteReader};

/// Schema of one measurement: name, data type, value encoding, block
/// compression and optional key/value properties.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSchema {
    pub measurement_name: String,
    pub data_type: TSDataType,
    pub encoding: TSEncoding,
    pub compression: CompressionType,
    pub props: Vec<(String, String)>,
}

impl MeasurementSchema {
    pub fn new(
        measurement_name: impl Into<String>,
        data_type: TSDataType,
        encoding: TSEncoding,
        compression: CompressionType,
    ) -> Self {
        Self {
            measurement_name: measurement_name.into(),
            data_type,
            encoding,
            compression,
            props: Vec::new(),
        }
    }
}

/// A table column: a measurement schema plus its category.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub measurement: MeasurementSchema,
    pub category: ColumnCategory,
}

impl ColumnSchema {
    pub fn new(measurement: MeasurementSchema, category: ColumnCategory) -> Self {
        Self {
            measurement,
            category,
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        // TAG columns are string-typed identifiers; their encoding never
        // reaches disk through a chunk.
        Self::new(
            MeasurementSchema::new(
                name,
                TSDataType::String,
                TSEncoding::Plain,
                CompressionType::Uncompressed,
            ),
            ColumnCategory::Tag,
        )
    }

    pub fn field(
        name: impl Into<String>,
        data_type: TSDataType,
        encoding: TSEncoding,
        compression: CompressionType,
    ) -> Self {
        Self::new(
            MeasurementSchema::new(name, data_type, encoding, compression),
            ColumnCategory::Field,
        )
    }

    pub fn name(&self) -> &str {
        &self.measurement.measurement_name
    }

    fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_str(self.name(), out);
        out.push(self.measurement.data_type.to_u8());
        out.push(self.measurement.encoding.to_u8());
        out.push(self.measurement.compression.to_u8());
        out.push(self.category.to_u8());
        write_var_u32(self.measurement.props.len() as u32, out);
        for (k, v) in &self.measurement.props {
            write_var_str(k, out);
            write_var_str(v, out);
        }
    }

    fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let name = reader.read_var_str()?;
        let data_type = TSDataType::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::corrupted("unknown data type tag in column schema"))?;
        let encoding = TSEncoding::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::corrupted("unknown encoding tag in column schema"))?;
        let compression = CompressionType::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::corrupted("unknown compression tag in column schema"))?;
        let category = ColumnCategory::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::corrupted("unknown column category tag"))?;
        let prop_count = reader.read_var_u32()? as usize;
        let mut props = Vec::with_capacity(prop_count);
        for _ in 0..prop_count {
            let k = reader.read_var_str()?;
            let v = reader.read_var_str()?;
            props.push((k, v));
        }
        let mut measurement = MeasurementSchema::new(name, data_type, encoding, compression);
        measurement.props = props;
        Ok(Self {
            measurement,
            category,
        })
    }
}

/// Schema of a table: an ordered list of columns.  The concatenation of the
/// TAG column values in schema order forms a device identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Fails with `InvalidArg` if two columns share a name.
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnSchema>) -> Result<Self> {
        let table_name = table_name.into();
        for (i, c) in columns.iter().enumerate() {
            if columns[..i].iter().any(|o| o.name() == c.name()) {
                return Err(TsFileError::InvalidArg(format!(
                    "duplicate column {} in table {}",
                    c.name(),
                    table_name
                )));
            }
        }
        Ok(Self {
            table_name,
            columns,
        })
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    pub fn tag_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns
            .iter()
            .filter(|c| c.category == ColumnCategory::Tag)
    }

    pub fn field_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns
            .iter()
            .filter(|c| c.category == ColumnCategory::Field)
    }

    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_str(&self.table_name, out);
        write_var_u32(self.columns.len() as u32, out);
        for c in &self.columns {
            c.serialize_to(out);
        }
    }

    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let table_name = reader.read_var_str()?;
        let column_count = reader.read_var_u32()? as usize;
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            columns.push(ColumnSchema::deserialize_from(reader)?);
        }
        Ok(Self {
            table_name,
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TableSchema {
        TableSchema::new(
            "vehicle",
            vec![
                ColumnSchema::tag("id1"),
                ColumnSchema::tag("id2"),
                ColumnSchema::field(
                    "s1",
                    TSDataType::Int32,
                    TSEncoding::Plain,
                    CompressionType::Uncompressed,
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let r = TableSchema::new(
            "t",
            vec![ColumnSchema::tag("a"), ColumnSchema::tag("a")],
        );
        assert!(matches!(r, Err(TsFileError::InvalidArg(_))));
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut schema = sample_table();
        schema.columns[2]
            .measurement
            .props
            .push(("unit".to_string(), "km/h".to_string()));

        let mut out = Vec::new();
        schema.serialize_to(&mut out);
        let mut r = ByteReader::new(&out);
        let back = TableSchema::deserialize_from(&mut r).unwrap();
        assert_eq!(back, schema);
        assert!(!r.has_remaining());
    }

    #[test]
    fn test_column_lookup() {
        let schema = sample_table();
        assert_eq!(schema.find_column_index("s1"), Some(2));
        assert_eq!(schema.find_column_index("nope"), None);
        assert_eq!(schema.tag_columns().count(), 2);
        assert_eq!(schema.field_columns().count(), 1);
    }
}
