//! TsBlock: the row batch the read pipeline materializes — one time column
//! plus the requested columns, nulls marked with `Value::Null`.

use tsfile_common::datatype::TSDataType;
use tsfile_common::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct TsBlockColumn {
    pub name: String,
    pub data_type: TSDataType,
    pub values: Vec<Value>,
}

impl TsBlockColumn {
    pub fn has_null_value(&self) -> bool {
        self.values.iter().any(|v| v.is_null())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TsBlock {
    pub times: Vec<i64>,
    pub columns: Vec<TsBlockColumn>,
}

impl TsBlock {
    pub fn new(column_specs: Vec<(String, TSDataType)>) -> Self {
        Self {
            times: Vec::new(),
            columns: column_specs
                .into_iter()
                .map(|(name, data_type)| TsBlockColumn {
                    name,
                    data_type,
                    values: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&TsBlockColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn value(&self, row: usize, column: usize) -> &Value {
        &self.columns[column].values[row]
    }

    pub fn push_row(&mut self, time: i64, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.times.push(time);
        for (col, v) in self.columns.iter_mut().zip(values) {
            col.values.push(v);
        }
    }
}
