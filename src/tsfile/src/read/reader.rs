//! TsFileReader: the top-level query surface over one sealed TsFile.

use std::path::Path;
use std::sync::Arc;

use tsfile_common::datatype::ColumnCategory;

use crate::data::device::DeviceId;
use crate::error::{Result, TsFileError};
use crate::file::metadata::TimeseriesIndex;
use crate::file::statistics::Statistics;
use crate::read::cache::ChunkCache;
use crate::read::device_reader::{
    DeviceOrderedTsBlockReader, DeviceTaskIterator, IdFilter, RequestedColumn,
    RequestedColumnKind,
};
use crate::read::filter::{TimeFilter, ValueFilter};
use crate::read::io_reader::{LoadedSeries, TsFileIoReader};
use crate::read::result_set::TableResultSet;

/// Result ordering of a table query.  Only device-major order is
/// implemented; asking for time-major order fails with a typed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    DeviceMajor,
    TimeMajor,
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Chunks held by the shared cache; 0 disables caching.
    pub chunk_cache_capacity: usize,
    /// Rows per emitted TsBlock.
    pub block_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_cache_capacity: 64,
            block_size: 1024,
        }
    }
}

pub struct TsFileReader {
    io: Arc<TsFileIoReader>,
    options: ReaderOptions,
    /// Liveness token handed (weakly) to result sets; dropped on close.
    alive: Option<Arc<()>>,
}

impl TsFileReader {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, ReaderOptions::default()).await
    }

    pub async fn open_with_options(
        path: impl AsRef<Path>,
        options: ReaderOptions,
    ) -> Result<Self> {
        let cache = if options.chunk_cache_capacity > 0 {
            Some(Arc::new(ChunkCache::new(options.chunk_cache_capacity)))
        } else {
            None
        };
        Self::do_open(path, cache, options).await
    }

    /// Opens a reader sharing `cache` with other readers; entries are keyed
    /// by file id, so readers over different files never collide.
    pub async fn open_with_shared_cache(
        path: impl AsRef<Path>,
        cache: Arc<ChunkCache>,
        options: ReaderOptions,
    ) -> Result<Self> {
        Self::do_open(path, Some(cache), options).await
    }

    async fn do_open(
        path: impl AsRef<Path>,
        cache: Option<Arc<ChunkCache>>,
        options: ReaderOptions,
    ) -> Result<Self> {
        let io = TsFileIoReader::open(path, cache).await?;
        Ok(Self {
            io: Arc::new(io),
            options,
            alive: Some(Arc::new(())),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.alive.is_none() {
            return Err(TsFileError::InvalidState("reader is closed".to_string()));
        }
        Ok(())
    }

    /// Tables present in the footer.
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .io
            .meta()
            .table_index_roots
            .keys()
            .chain(self.io.meta().table_schemas.keys())
            .cloned()
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }

    /// True when the bloom filter admits the `(table, device, measurement)`
    /// path; false answers are definitive.
    pub fn may_contain_series(&self, device: &DeviceId, measurement: &str) -> bool {
        match &self.io.meta().bloom_filter {
            Some(bloom) => bloom.may_contain(format!("{}.{}", device, measurement).as_bytes()),
            None => false,
        }
    }

    /// Merged statistics of one series (for aligned series, of its value
    /// column).
    pub async fn series_statistics(
        &self,
        device: &DeviceId,
        measurement: &str,
    ) -> Result<Statistics> {
        self.check_open()?;
        match self.io.load_timeseries_index(device, measurement).await? {
            LoadedSeries::Single(idx) => Ok(idx.statistics),
            LoadedSeries::Aligned { value, .. } => Ok(value.statistics),
        }
    }

    /// Every TimeseriesIndex of one device, chunk metadata included.
    pub async fn device_timeseries_meta(
        &self,
        device: &DeviceId,
    ) -> Result<Vec<TimeseriesIndex>> {
        self.check_open()?;
        self.io.device_timeseries_indexes(device).await
    }

    /// All devices of a table in ascending id order.
    pub async fn devices(&self, table: &str) -> Result<Vec<DeviceId>> {
        self.check_open()?;
        self.io.all_devices(table).await
    }

    /// Opens a device-ordered scan of `columns` over every device of
    /// `table`.  Unknown tables fail with `TableNotExist`; `Order::TimeMajor`
    /// fails with `UnsupportedOrder`.
    pub async fn query(
        &self,
        table: &str,
        columns: Vec<String>,
        time_filter: Option<TimeFilter>,
        field_filter: Option<ValueFilter>,
        order: Order,
    ) -> Result<TableResultSet> {
        self.query_with_id_filter(table, columns, time_filter, field_filter, order, None)
            .await
    }

    pub async fn query_with_id_filter(
        &self,
        table: &str,
        columns: Vec<String>,
        time_filter: Option<TimeFilter>,
        field_filter: Option<ValueFilter>,
        order: Order,
        id_filter: Option<IdFilter>,
    ) -> Result<TableResultSet> {
        self.check_open()?;
        if order == Order::TimeMajor {
            return Err(TsFileError::UnsupportedOrder(
                "time-major result order is not implemented".to_string(),
            ));
        }
        let meta = self.io.meta();
        if !meta.table_index_roots.contains_key(table) && !meta.table_schemas.contains_key(table) {
            return Err(TsFileError::TableNotExist(table.to_string()));
        }

        let requested = self.resolve_columns(table, columns)?;
        let tasks = DeviceTaskIterator::new(&self.io, table, id_filter).await?;
        let inner = DeviceOrderedTsBlockReader::new(
            self.io.clone(),
            tasks,
            requested,
            self.options.block_size,
            time_filter,
            field_filter,
        );
        let alive = self.alive.as_ref().expect("checked open above");
        Ok(TableResultSet::new(inner, Arc::downgrade(alive)))
    }

    /// Maps requested column names onto TAG positions or FIELD scans using
    /// the table schema; without a schema every column is a FIELD.
    fn resolve_columns(&self, table: &str, columns: Vec<String>) -> Result<Vec<RequestedColumn>> {
        let schema = self.io.meta().table_schemas.get(table);
        let mut requested = Vec::with_capacity(columns.len());
        for name in columns {
            let kind = match schema {
                Some(schema) => {
                    let idx = schema.find_column_index(&name).ok_or_else(|| {
                        TsFileError::ColumnNotExist(format!("{} in table {}", name, table))
                    })?;
                    if schema.columns[idx].category == ColumnCategory::Tag {
                        let tag_idx = schema
                            .columns
                            .iter()
                            .take(idx)
                            .filter(|c| c.category == ColumnCategory::Tag)
                            .count();
                        RequestedColumnKind::Tag(tag_idx)
                    } else {
                        RequestedColumnKind::Field
                    }
                }
                None => RequestedColumnKind::Field,
            };
            requested.push(RequestedColumn { name, kind });
        }
        Ok(requested)
    }

    /// Releases the footer and cache references; open result sets observe
    /// the close and fail with `InvalidState`.  Idempotent.
    pub fn close(&mut self) {
        self.alive = None;
    }
}
