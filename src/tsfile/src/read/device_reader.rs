//! The multi-column alignment engine: a per-device row materializer that
//! merges field columns by timestamp, and the device-ordered block reader
//! that drives it across a table's devices.

use std::collections::VecDeque;
use std::sync::Arc;

use tsfile_common::datatype::TSDataType;
use tsfile_common::iterator::AsyncIterator;
use tsfile_common::value::Value;

use crate::data::device::DeviceId;
use crate::error::{Result, TsFileError};
use crate::read::chunk_reader::{PageData, SeriesScanIterator};
use crate::read::filter::{TimeFilter, ValueFilter};
use crate::read::io_reader::TsFileIoReader;
use crate::read::tsblock::TsBlock;

/// Predicate over device ids, applied while walking the device index.
pub type IdFilter = Arc<dyn Fn(&DeviceId) -> bool + Send + Sync>;

/// What a query asks for in one output column.
#[derive(Debug, Clone)]
pub struct RequestedColumn {
    pub name: String,
    pub kind: RequestedColumnKind,
}

#[derive(Debug, Clone)]
pub enum RequestedColumnKind {
    /// Resolved from the device id; the index is the position among the
    /// table's TAG columns.
    Tag(usize),
    Field,
}

/// Yields the devices of one table in ascending device-id order.
pub struct DeviceTaskIterator {
    devices: VecDeque<DeviceId>,
}

impl DeviceTaskIterator {
    pub async fn new(
        io: &TsFileIoReader,
        table: &str,
        id_filter: Option<IdFilter>,
    ) -> Result<Self> {
        let mut devices = io.all_devices(table).await?;
        if let Some(filter) = id_filter {
            devices.retain(|d| filter(d));
        }
        Ok(Self {
            devices: devices.into(),
        })
    }

    pub fn next(&mut self) -> Option<DeviceId> {
        self.devices.pop_front()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Cursor over one field column's pages.
struct ColumnContext {
    ssi: SeriesScanIterator,
    page: Option<PageData>,
    idx: usize,
}

impl ColumnContext {
    /// The (time, value) at the cursor, pulling the next page when the
    /// current one is drained.  `None` once the column is exhausted.
    async fn current(&mut self) -> Result<Option<(i64, Value)>> {
        loop {
            if let Some(page) = &self.page {
                if self.idx < page.times.len() {
                    return Ok(Some((page.times[self.idx], page.values[self.idx].clone())));
                }
            }
            match self.ssi.next_page().await? {
                Some(page) => {
                    self.page = Some(page);
                    self.idx = 0;
                }
                None => return Ok(None),
            }
        }
    }

    fn advance(&mut self) {
        self.idx += 1;
    }
}

/// Materializes the rows of one device: repeatedly takes the minimum time
/// across the field cursors, emits one row with nulls for absent columns,
/// and advances every cursor sitting on that time.
pub struct SingleDeviceTsBlockReader {
    device: DeviceId,
    columns: Vec<RequestedColumn>,
    column_types: Vec<TSDataType>,
    contexts: Vec<Option<ColumnContext>>,
    block_size: usize,
    field_filter: Option<ValueFilter>,
    finished: bool,
}

impl SingleDeviceTsBlockReader {
    pub async fn new(
        io: Arc<TsFileIoReader>,
        device: DeviceId,
        columns: Vec<RequestedColumn>,
        block_size: usize,
        time_filter: Option<TimeFilter>,
        field_filter: Option<ValueFilter>,
    ) -> Result<Self> {
        let mut contexts = Vec::with_capacity(columns.len());
        let mut column_types = Vec::with_capacity(columns.len());
        for column in &columns {
            match column.kind {
                RequestedColumnKind::Tag(_) => {
                    contexts.push(None);
                    column_types.push(TSDataType::String);
                }
                RequestedColumnKind::Field => {
                    match SeriesScanIterator::new(
                        io.clone(),
                        &device,
                        &column.name,
                        time_filter.clone(),
                    )
                    .await
                    {
                        Ok(ssi) => {
                            column_types.push(ssi.data_type());
                            contexts.push(Some(ColumnContext {
                                ssi,
                                page: None,
                                idx: 0,
                            }));
                        }
                        // a device may simply lack this column
                        Err(TsFileError::MeasurementNotExist(_))
                        | Err(TsFileError::DeviceNotExist(_)) => {
                            column_types.push(TSDataType::String);
                            contexts.push(None);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(Self {
            device,
            columns,
            column_types,
            contexts,
            block_size,
            field_filter,
            finished: false,
        })
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    fn tag_value(&self, tag_idx: usize) -> Value {
        match self.device.tag_segments().get(tag_idx) {
            Some(seg) => Value::Binary(seg.as_bytes().to_vec()),
            None => Value::Null,
        }
    }

    async fn min_current_time(&mut self) -> Result<Option<i64>> {
        let mut min_time: Option<i64> = None;
        for ctx in self.contexts.iter_mut().flatten() {
            if let Some((t, _)) = ctx.current().await? {
                min_time = Some(match min_time {
                    Some(m) => m.min(t),
                    None => t,
                });
            }
        }
        Ok(min_time)
    }
}

#[async_trait]
impl AsyncIterator for SingleDeviceTsBlockReader {
    type Item = TsBlock;
    type Error = TsFileError;

    async fn try_next(&mut self) -> Result<Option<TsBlock>> {
        if self.finished {
            return Ok(None);
        }
        let specs: Vec<(String, TSDataType)> = self
            .columns
            .iter()
            .zip(&self.column_types)
            .map(|(c, dt)| (c.name.clone(), *dt))
            .collect();
        let mut block = TsBlock::new(specs);

        while block.row_count() < self.block_size {
            let Some(t) = self.min_current_time().await? else {
                self.finished = true;
                break;
            };

            let mut row = Vec::with_capacity(self.columns.len());
            for (i, column) in self.columns.iter().enumerate() {
                let value = match &column.kind {
                    RequestedColumnKind::Tag(tag_idx) => self.tag_value(*tag_idx),
                    RequestedColumnKind::Field => match self.contexts[i].as_mut() {
                        Some(ctx) => match ctx.current().await? {
                            Some((ct, v)) if ct == t => {
                                ctx.advance();
                                v
                            }
                            _ => Value::Null,
                        },
                        None => Value::Null,
                    },
                };
                row.push(value);
            }

            if let Some(filter) = &self.field_filter {
                let keep = self
                    .columns
                    .iter()
                    .position(|c| c.name == filter.column)
                    .map(|i| filter.satisfy(&row[i]))
                    .unwrap_or(false);
                if !keep {
                    continue;
                }
            }
            block.push_row(t, row);
        }

        if block.is_empty() {
            self.finished = true;
            Ok(None)
        } else {
            Ok(Some(block))
        }
    }
}

/// Drives a SingleDeviceTsBlockReader over every device of the task
/// iterator.  Blocks flow out device-major, time-minor.
pub struct DeviceOrderedTsBlockReader {
    io: Arc<TsFileIoReader>,
    tasks: DeviceTaskIterator,
    columns: Vec<RequestedColumn>,
    block_size: usize,
    time_filter: Option<TimeFilter>,
    field_filter: Option<ValueFilter>,
    current: Option<SingleDeviceTsBlockReader>,
}

impl DeviceOrderedTsBlockReader {
    pub fn new(
        io: Arc<TsFileIoReader>,
        tasks: DeviceTaskIterator,
        columns: Vec<RequestedColumn>,
        block_size: usize,
        time_filter: Option<TimeFilter>,
        field_filter: Option<ValueFilter>,
    ) -> Self {
        Self {
            io,
            tasks,
            columns,
            block_size,
            time_filter,
            field_filter,
            current: None,
        }
    }
}

#[async_trait]
impl AsyncIterator for DeviceOrderedTsBlockReader {
    type Item = TsBlock;
    type Error = TsFileError;

    async fn try_next(&mut self) -> Result<Option<TsBlock>> {
        loop {
            if self.current.is_none() {
                let Some(device) = self.tasks.next() else {
                    return Ok(None);
                };
                self.current = Some(
                    SingleDeviceTsBlockReader::new(
                        self.io.clone(),
                        device,
                        self.columns.clone(),
                        self.block_size,
                        self.time_filter.clone(),
                        self.field_filter.clone(),
                    )
                    .await?,
                );
            }
            let reader = self.current.as_mut().expect("reader installed above");
            match reader.try_next().await? {
                Some(block) => return Ok(Some(block)),
                None => self.current = None,
            }
        }
    }
}
