use tsfile_common::datatype::ColumnCategory;
use tsfile_common::value::Value;

use crate::data::device::DeviceId;
use crate::error::{Result, TsFileError};
use crate::schema::{MeasurementSchema, TableSchema};

/// A columnar write batch: one timestamp column plus parallel value columns.
///
/// For the timeseries write paths (`write_tablet`) `target_name` is a device
/// path; for the table path (`write_table`) it is a table name and the
/// column categories are resolved against the registered `TableSchema`
/// before the tablet is split by device.
#[derive(Debug, Clone)]
pub struct Tablet {
    pub target_name: String,
    pub column_schemas: Vec<MeasurementSchema>,
    pub timestamps: Vec<i64>,
    /// Row-indexed values per column; `Value::Null` marks a null cell.
    pub columns: Vec<Vec<Value>>,
    /// Resolved per-column categories; empty until prepared for a table
    /// write.
    pub column_categories: Vec<ColumnCategory>,
    /// Indexes of the TAG columns within `column_schemas`, in schema order.
    pub tag_column_indexes: Vec<usize>,
}

impl Tablet {
    pub fn new(target_name: impl Into<String>, column_schemas: Vec<MeasurementSchema>) -> Self {
        let n = column_schemas.len();
        Self {
            target_name: target_name.into(),
            column_schemas,
            timestamps: Vec::new(),
            columns: vec![Vec::new(); n],
            column_categories: Vec::new(),
            tag_column_indexes: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn column_count(&self) -> usize {
        self.column_schemas.len()
    }

    /// Appends a row.  `values` must have one entry per column;
    /// `Value::Null` marks a null cell.
    pub fn add_row(&mut self, timestamp: i64, values: Vec<Value>) -> Result<()> {
        if values.len() != self.column_count() {
            return Err(TsFileError::InvalidArg(format!(
                "row has {} values, tablet has {} columns",
                values.len(),
                self.column_count()
            )));
        }
        self.timestamps.push(timestamp);
        for (col, v) in self.columns.iter_mut().zip(values) {
            col.push(v);
        }
        Ok(())
    }

    pub fn column_name(&self, idx: usize) -> &str {
        &self.column_schemas[idx].measurement_name
    }

    /// Resolves column categories against the table schema.  Idempotent.
    pub fn prepare_for_table(&mut self, table_schema: &TableSchema) -> Result<()> {
        if !self.column_categories.is_empty() {
            return Ok(());
        }
        for i in 0..self.column_count() {
            let name = self.column_name(i).to_string();
            let col_index = table_schema.find_column_index(&name).ok_or_else(|| {
                TsFileError::ColumnNotExist(format!(
                    "column {} not in table {}",
                    name, table_schema.table_name
                ))
            })?;
            let category = table_schema.columns[col_index].category;
            self.column_categories.push(category);
            if category == ColumnCategory::Tag {
                self.tag_column_indexes.push(i);
            }
        }
        Ok(())
    }

    /// The device id of one row: the table name followed by the TAG column
    /// values in schema order.  Null tags contribute empty segments.
    pub fn device_id(&self, row: usize) -> DeviceId {
        let tags: Vec<String> = self
            .tag_column_indexes
            .iter()
            .map(|&c| match &self.columns[c][row] {
                Value::Binary(b) => String::from_utf8_lossy(b).into_owned(),
                _ => String::new(),
            })
            .collect();
        DeviceId::from_table_tags(&self.target_name, &tags)
    }

    /// Splits the tablet rows into contiguous same-device runs, returning
    /// `(device, exclusive_end_row)` pairs in row order.
    pub fn split_by_device(&self) -> Vec<(DeviceId, usize)> {
        let mut result = Vec::new();
        let mut last: Option<DeviceId> = None;
        for row in 0..self.row_count() {
            let cur = self.device_id(row);
            match &last {
                Some(prev) if *prev == cur => {}
                Some(prev) => {
                    result.push((prev.clone(), row));
                    last = Some(cur);
                }
                None => last = Some(cur),
            }
        }
        if let Some(prev) = last {
            result.push((prev, self.row_count()));
        }
        result
    }
}
