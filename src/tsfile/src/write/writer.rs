//! TsFileWriter: schema registration, row/tablet/table write entry points,
//! the memory-threshold flush loop and the close sequence.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::warn;
use tsfile_common::record::TsRecord;
use tsfile_common::value::Value;

use crate::codec::check_encoding;
use crate::config::ConfigValue;
use crate::data::device::DeviceId;
use crate::data::tablet::Tablet;
use crate::error::{Result, TsFileError};
use crate::schema::{MeasurementSchema, TableSchema};
use crate::write::chunk_writer::{ChunkWriter, TimeChunkWriter, ValueChunkWriter};
use crate::write::io_writer::TsFileIoWriter;

const FIRST_MEM_CHECK_RECORD_COUNT: u64 = 100;

struct MeasurementState {
    schema: MeasurementSchema,
    chunk_writer: Option<ChunkWriter>,
    value_chunk_writer: Option<ValueChunkWriter>,
}

struct DeviceGroup {
    is_aligned: bool,
    measurements: BTreeMap<String, MeasurementState>,
    time_chunk_writer: Option<TimeChunkWriter>,
    /// Set once a chunk group of this device reached the file.
    flushed: bool,
}

impl DeviceGroup {
    fn new(is_aligned: bool) -> Self {
        Self {
            is_aligned,
            measurements: BTreeMap::new(),
            time_chunk_writer: None,
            flushed: false,
        }
    }

    fn has_data(&self) -> bool {
        if self
            .time_chunk_writer
            .as_ref()
            .map(|w| w.has_data())
            .unwrap_or(false)
        {
            return true;
        }
        self.measurements.values().any(|m| {
            m.chunk_writer.as_ref().map(|w| w.has_data()).unwrap_or(false)
                || m.value_chunk_writer
                    .as_ref()
                    .map(|w| w.has_data())
                    .unwrap_or(false)
        })
    }

    fn estimate_mem_size(&self) -> u64 {
        let mut total = 0u64;
        if let Some(w) = &self.time_chunk_writer {
            total += w.estimate_max_series_mem_size() as u64;
        }
        for m in self.measurements.values() {
            if let Some(w) = &m.chunk_writer {
                total += w.estimate_max_series_mem_size() as u64;
            }
            if let Some(w) = &m.value_chunk_writer {
                total += w.estimate_max_series_mem_size() as u64;
            }
        }
        total
    }
}

/// Writer of one TsFile.  Single-producer: not safe for concurrent use from
/// multiple tasks.
pub struct TsFileWriter {
    io: TsFileIoWriter,
    config: ConfigValue,
    groups: BTreeMap<DeviceId, DeviceGroup>,
    table_schemas: BTreeMap<String, TableSchema>,
    record_count_since_last_flush: u64,
    record_count_for_next_mem_check: u64,
    closed: bool,
}

impl TsFileWriter {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_config(path, ConfigValue::default()).await
    }

    pub async fn create_with_config(
        path: impl AsRef<Path>,
        config: ConfigValue,
    ) -> Result<Self> {
        Ok(Self {
            io: TsFileIoWriter::create(path).await?,
            config,
            groups: BTreeMap::new(),
            table_schemas: BTreeMap::new(),
            record_count_since_last_flush: 0,
            record_count_for_next_mem_check: FIRST_MEM_CHECK_RECORD_COUNT,
            closed: false,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(TsFileError::InvalidState("writer is closed".to_string()));
        }
        Ok(())
    }

    /// Registers a table schema; duplicate names are refused.
    pub fn register_table(&mut self, schema: TableSchema) -> Result<()> {
        self.check_open()?;
        if self.table_schemas.contains_key(&schema.table_name) {
            return Err(TsFileError::AlreadyExists(format!(
                "table {}",
                schema.table_name
            )));
        }
        for column in schema.field_columns() {
            check_encoding(column.measurement.encoding, column.measurement.data_type)?;
        }
        self.table_schemas.insert(schema.table_name.clone(), schema);
        Ok(())
    }

    pub fn register_timeseries(
        &mut self,
        device_path: &str,
        schema: MeasurementSchema,
    ) -> Result<()> {
        self.register_one(DeviceId::from_path(device_path), schema, false)
    }

    pub fn register_aligned_timeseries(
        &mut self,
        device_path: &str,
        schemas: Vec<MeasurementSchema>,
    ) -> Result<()> {
        let device = DeviceId::from_path(device_path);
        for schema in schemas {
            self.register_one(device.clone(), schema, true)?;
        }
        Ok(())
    }

    fn register_one(
        &mut self,
        device: DeviceId,
        schema: MeasurementSchema,
        is_aligned: bool,
    ) -> Result<()> {
        self.check_open()?;
        check_encoding(schema.encoding, schema.data_type)?;
        let group = self
            .groups
            .entry(device.clone())
            .or_insert_with(|| DeviceGroup::new(is_aligned));
        // within one device the aligned-ness is fixed on first registration
        if group.is_aligned != is_aligned {
            return Err(TsFileError::InvalidArg(format!(
                "device {} is registered as {}",
                device,
                if group.is_aligned { "aligned" } else { "unaligned" }
            )));
        }
        if group.measurements.contains_key(&schema.measurement_name) {
            return Err(TsFileError::AlreadyExists(format!(
                "timeseries {}.{}",
                device, schema.measurement_name
            )));
        }
        // a late column would desynchronize the time/value chunk pairing
        if is_aligned && (group.flushed || group.has_data()) {
            return Err(TsFileError::InvalidArg(format!(
                "device {} already holds rows; aligned measurements must be \
                 registered before the first write",
                device
            )));
        }
        group.measurements.insert(
            schema.measurement_name.clone(),
            MeasurementState {
                schema,
                chunk_writer: None,
                value_chunk_writer: None,
            },
        );
        Ok(())
    }

    /// Writes a single row.  Points whose measurement is unknown or whose
    /// value does not match the declared type are skipped and logged.
    pub async fn write_record(&mut self, record: &TsRecord) -> Result<()> {
        self.check_open()?;
        let device = DeviceId::from_path(&record.device_path);
        let group = self
            .groups
            .get_mut(&device)
            .ok_or_else(|| TsFileError::DeviceNotExist(record.device_path.clone()))?;

        if group.is_aligned {
            let mut by_name: HashMap<&str, &Value> = HashMap::new();
            for p in &record.points {
                by_name.insert(p.measurement_name.as_str(), &p.value);
            }
            for p in &record.points {
                if !group.measurements.contains_key(&p.measurement_name) {
                    warn!(measurement = %p.measurement_name, device = %record.device_path,
                        "dropping point of unknown measurement");
                }
            }
            write_aligned_row(group, &self.config, record.timestamp, |name| {
                by_name.get(name).copied()
            })?;
        } else {
            for p in &record.points {
                let Some(state) = group.measurements.get_mut(&p.measurement_name) else {
                    warn!(measurement = %p.measurement_name, device = %record.device_path,
                        "dropping point of unknown measurement");
                    continue;
                };
                write_unaligned_point(state, &self.config, record.timestamp, &p.value);
            }
        }

        self.record_count_since_last_flush += 1;
        self.check_memory_size_and_may_flush().await
    }

    /// Writes a columnar batch for one device.
    pub async fn write_tablet(&mut self, tablet: &Tablet) -> Result<()> {
        self.check_open()?;
        let device = DeviceId::from_path(&tablet.target_name);
        let group = self
            .groups
            .get_mut(&device)
            .ok_or_else(|| TsFileError::DeviceNotExist(tablet.target_name.clone()))?;

        let col_by_name: HashMap<&str, usize> = (0..tablet.column_count())
            .map(|i| (tablet.column_name(i), i))
            .collect();

        if group.is_aligned {
            for row in 0..tablet.row_count() {
                write_aligned_row(group, &self.config, tablet.timestamps[row], |name| {
                    col_by_name.get(name).map(|&c| &tablet.columns[c][row])
                })?;
            }
        } else {
            for col in 0..tablet.column_count() {
                let name = tablet.column_name(col);
                let Some(state) = group.measurements.get_mut(name) else {
                    warn!(measurement = %name, device = %tablet.target_name,
                        "dropping column of unknown measurement");
                    continue;
                };
                for row in 0..tablet.row_count() {
                    let value = &tablet.columns[col][row];
                    if value.is_null() {
                        continue;
                    }
                    write_unaligned_point(state, &self.config, tablet.timestamps[row], value);
                }
            }
        }

        self.record_count_since_last_flush += tablet.row_count() as u64;
        self.check_memory_size_and_may_flush().await
    }

    /// Writes a columnar batch spanning multiple devices of one table.  The
    /// tablet is split into contiguous same-device runs; each run goes
    /// through the aligned path of its device.
    pub async fn write_table(&mut self, tablet: &mut Tablet) -> Result<()> {
        self.check_open()?;
        let table_schema = self
            .table_schemas
            .get(&tablet.target_name)
            .ok_or_else(|| TsFileError::TableNotExist(tablet.target_name.clone()))?
            .clone();
        tablet.prepare_for_table(&table_schema)?;

        let field_col_by_name: HashMap<String, usize> = (0..tablet.column_count())
            .filter(|&i| {
                tablet.column_categories[i] == tsfile_common::datatype::ColumnCategory::Field
            })
            .map(|i| (tablet.column_name(i).to_string(), i))
            .collect();

        let config = self.config.clone();
        let mut start_row = 0usize;
        for (device, end_row) in tablet.split_by_device() {
            if end_row == start_row {
                continue;
            }
            let group = self.ensure_table_device_group(device, &table_schema)?;
            for row in start_row..end_row {
                write_aligned_row(group, &config, tablet.timestamps[row], |name| {
                    field_col_by_name.get(name).map(|&c| &tablet.columns[c][row])
                })?;
            }
            start_row = end_row;
        }

        self.record_count_since_last_flush += tablet.row_count() as u64;
        self.check_memory_size_and_may_flush().await
    }

    /// Table-model devices materialize on first write, one aligned group per
    /// distinct TAG tuple, columns taken from the table's FIELD schemas.
    fn ensure_table_device_group(
        &mut self,
        device: DeviceId,
        table_schema: &TableSchema,
    ) -> Result<&mut DeviceGroup> {
        if !self.groups.contains_key(&device) {
            let mut group = DeviceGroup::new(true);
            for column in table_schema.field_columns() {
                group.measurements.insert(
                    column.measurement.measurement_name.clone(),
                    MeasurementState {
                        schema: column.measurement.clone(),
                        chunk_writer: None,
                        value_chunk_writer: None,
                    },
                );
            }
            self.groups.insert(device.clone(), group);
        }
        Ok(self
            .groups
            .get_mut(&device)
            .expect("group inserted above"))
    }

    fn calculate_mem_size_for_all_groups(&self) -> u64 {
        self.groups.values().map(|g| g.estimate_mem_size()).sum()
    }

    /// Checks occupied memory; past the chunk-group threshold all open
    /// groups are flushed.  The next check point is extrapolated from the
    /// observed bytes-per-record.
    async fn check_memory_size_and_may_flush(&mut self) -> Result<()> {
        if self.record_count_since_last_flush >= self.record_count_for_next_mem_check {
            let mem_size = self.calculate_mem_size_for_all_groups();
            if mem_size > 0 {
                self.record_count_for_next_mem_check = (self.record_count_since_last_flush
                    * self.config.chunk_group_size_threshold
                    / mem_size)
                    .max(1);
            }
            if mem_size > self.config.chunk_group_size_threshold {
                self.flush().await?;
            }
        }
        Ok(())
    }

    /// Force-writes every open chunk group, devices in device-id order.
    /// Devices whose writers hold no data are skipped.
    pub async fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        for (device, group) in self.groups.iter_mut() {
            if !group.has_data() {
                continue;
            }
            self.io.start_chunk_group(device.clone());

            if group.is_aligned {
                if let Some(mut tw) = group.time_chunk_writer.take() {
                    tw.end_encode_chunk()?;
                    let header = tw.chunk_header();
                    self.io.start_flush_chunk(&header);
                    self.io.flush_chunk_data(tw.chunk_data());
                    self.io.end_flush_chunk(&header, tw.statistics().clone());
                }
                for state in group.measurements.values_mut() {
                    if let Some(mut vw) = state.value_chunk_writer.take() {
                        if !vw.has_data() {
                            continue;
                        }
                        vw.end_encode_chunk()?;
                        let header = vw.chunk_header();
                        self.io.start_flush_chunk(&header);
                        self.io.flush_chunk_data(vw.chunk_data());
                        self.io.end_flush_chunk(&header, vw.statistics().clone());
                    }
                }
            } else {
                for state in group.measurements.values_mut() {
                    if let Some(mut cw) = state.chunk_writer.take() {
                        if !cw.has_data() {
                            continue;
                        }
                        cw.end_encode_chunk()?;
                        let header = cw.chunk_header();
                        self.io.start_flush_chunk(&header);
                        self.io.flush_chunk_data(cw.chunk_data());
                        self.io.end_flush_chunk(&header, cw.statistics().clone());
                    }
                }
            }
            self.io.end_chunk_group().await?;
            group.flushed = true;
        }
        self.record_count_since_last_flush = 0;
        Ok(())
    }

    /// Final flush, index and footer emission.  Idempotent: a second close
    /// succeeds without touching the file.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush().await?;
        self.io.end_file(&self.table_schemas, &self.config).await?;
        self.closed = true;
        Ok(())
    }
}

fn write_unaligned_point(
    state: &mut MeasurementState,
    config: &ConfigValue,
    timestamp: i64,
    value: &Value,
) {
    if value.is_null() {
        return;
    }
    if state.chunk_writer.is_none() {
        match ChunkWriter::new(
            &state.schema.measurement_name,
            state.schema.data_type,
            state.schema.encoding,
            state.schema.compression,
            config,
        ) {
            Ok(w) => state.chunk_writer = Some(w),
            Err(e) => {
                warn!(measurement = %state.schema.measurement_name, error = %e,
                    "cannot build chunk writer");
                return;
            }
        }
    }
    let writer = state.chunk_writer.as_mut().expect("writer built above");
    // a single bad point is dropped, not fatal
    if let Err(e) = writer.write(timestamp, value) {
        warn!(measurement = %state.schema.measurement_name, error = %e, "dropping point");
    }
}

/// Writes one row of an aligned device: one timestamp in the time chunk and
/// one (possibly null) slot in every value chunk, then seals the group's
/// pages together when the time page is full.
fn write_aligned_row<'a>(
    group: &mut DeviceGroup,
    config: &ConfigValue,
    timestamp: i64,
    value_of: impl Fn(&str) -> Option<&'a Value>,
) -> Result<()> {
    if group.time_chunk_writer.is_none() {
        group.time_chunk_writer = Some(TimeChunkWriter::new(config)?);
    }
    let tw = group.time_chunk_writer.as_mut().expect("time writer built above");
    tw.write(timestamp)?;

    for (name, state) in group.measurements.iter_mut() {
        if state.value_chunk_writer.is_none() {
            state.value_chunk_writer = Some(ValueChunkWriter::new(
                name,
                state.schema.data_type,
                state.schema.encoding,
                state.schema.compression,
            )?);
        }
        let vw = state.value_chunk_writer.as_mut().expect("value writer built above");
        let value = value_of(name);
        match value {
            Some(v) if !v.is_null() => {
                if let Err(e) = vw.write(timestamp, v, false) {
                    // keep the row count aligned even when the value is bad
                    warn!(measurement = %name, error = %e, "dropping point, writing null");
                    vw.write(timestamp, &Value::Null, true)?;
                }
            }
            _ => vw.write(timestamp, &Value::Null, true)?,
        }
    }

    let time_page_full = {
        let tw = group.time_chunk_writer.as_ref().expect("time writer exists");
        tw.page_point_count() >= config.page_max_point_count as usize
            || tw.page_estimate_size() >= config.page_max_memory_bytes as usize
    };
    if time_page_full {
        seal_aligned_pages(group)?;
    }
    Ok(())
}

/// Seals the time page and every value page of an aligned group at the same
/// row boundary.
fn seal_aligned_pages(group: &mut DeviceGroup) -> Result<()> {
    if let Some(tw) = group.time_chunk_writer.as_mut() {
        if tw.page_point_count() == 0 {
            return Ok(());
        }
        tw.seal_current_page()?;
    }
    for state in group.measurements.values_mut() {
        if let Some(vw) = state.value_chunk_writer.as_mut() {
            if vw.page_row_count() > 0 {
                vw.seal_current_page()?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tsfile_common::datatype::{CompressionType, TSDataType, TSEncoding};

    use super::*;

    fn int_schema(name: &str) -> MeasurementSchema {
        MeasurementSchema::new(
            name,
            TSDataType::Int32,
            TSEncoding::Plain,
            CompressionType::Uncompressed,
        )
    }

    #[tokio::test]
    async fn test_register_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = TsFileWriter::create(dir.path().join("t.tsfile")).await.unwrap();

        w.register_timeseries("d1", int_schema("s1")).unwrap();
        let err = w.register_timeseries("d1", int_schema("s1")).unwrap_err();
        assert!(matches!(err, TsFileError::AlreadyExists(_)));

        // aligned-ness is fixed on first registration
        let err = w
            .register_aligned_timeseries("d1", vec![int_schema("s2")])
            .unwrap_err();
        assert!(matches!(err, TsFileError::InvalidArg(_)));

        w.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_to_unknown_device() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = TsFileWriter::create(dir.path().join("t.tsfile")).await.unwrap();
        let record = TsRecord::new("nope", 1).add_point("s1", Value::Int32(1));
        assert!(matches!(
            w.write_record(&record).await,
            Err(TsFileError::DeviceNotExist(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = TsFileWriter::create(dir.path().join("t.tsfile")).await.unwrap();
        w.register_timeseries("d1", int_schema("s1")).unwrap();
        w.close().await.unwrap();
        w.close().await.unwrap();
        // writes after close are refused
        let record = TsRecord::new("d1", 1).add_point("s1", Value::Int32(1));
        assert!(matches!(
            w.write_record(&record).await,
            Err(TsFileError::InvalidState(_))
        ));
    }
}
