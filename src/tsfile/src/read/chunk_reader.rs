//! SeriesScanIterator: streams the pages of one (device, measurement)
//! series, pruning chunks and pages whose statistics fail the time filter.

use std::sync::Arc;

use tsfile_common::datatype::TSDataType;
use tsfile_common::value::Value;

use crate::codec::new_decoder;
use crate::compress::decompress;
use crate::data::device::DeviceId;
use crate::error::{Result, TsFileError};
use crate::file::chunk::ChunkHeader;
use crate::file::marshal::ByteReader;
use crate::file::page::PageHeader;
use crate::read::cache::CachedChunk;
use crate::read::filter::TimeFilter;
use crate::file::PAGE_TIME_STREAM_ENCODING;
use crate::read::io_reader::{LoadedSeries, TsFileIoReader};

/// One decoded page: parallel time and value columns.  Aligned pages carry
/// `Value::Null` at null rows.
#[derive(Debug, Clone, PartialEq)]
pub struct PageData {
    pub times: Vec<i64>,
    pub values: Vec<Value>,
}

enum SsiState {
    Ready,
    ChunkOpen,
    Exhausted,
    Closed,
}

struct OpenChunk {
    chunk: CachedChunk,
    pos: usize,
    /// The value chunk of an aligned series, walked in page lockstep with
    /// the time chunk.
    value_chunk: Option<CachedChunk>,
    value_pos: usize,
}

/// Iterator over the pages of one series.
pub struct SeriesScanIterator {
    io: Arc<TsFileIoReader>,
    series: LoadedSeries,
    time_filter: Option<TimeFilter>,
    chunk_idx: usize,
    state: SsiState,
    open: Option<OpenChunk>,
}

impl SeriesScanIterator {
    /// Loads the series index and positions before the first chunk.  A
    /// series whose whole statistics range fails the filter starts
    /// exhausted.
    pub async fn new(
        io: Arc<TsFileIoReader>,
        device: &DeviceId,
        measurement: &str,
        time_filter: Option<TimeFilter>,
    ) -> Result<Self> {
        let series = io.load_timeseries_index(device, measurement).await?;
        let mut ssi = Self {
            io,
            series,
            time_filter,
            chunk_idx: 0,
            state: SsiState::Ready,
            open: None,
        };
        if let Some(filter) = &ssi.time_filter {
            let stats = match &ssi.series {
                LoadedSeries::Single(idx) => &idx.statistics,
                LoadedSeries::Aligned { time, .. } => &time.statistics,
            };
            if stats.count() > 0 && !filter.satisfy_range(stats.start_time(), stats.end_time()) {
                ssi.state = SsiState::Exhausted;
            }
        }
        Ok(ssi)
    }

    pub fn data_type(&self) -> TSDataType {
        match &self.series {
            LoadedSeries::Single(idx) => idx.data_type,
            LoadedSeries::Aligned { value, .. } => value.data_type,
        }
    }

    fn chunk_count(&self) -> usize {
        match &self.series {
            LoadedSeries::Single(idx) => idx.chunk_metas.len(),
            LoadedSeries::Aligned { time, .. } => time.chunk_metas.len(),
        }
    }

    /// Opens the next chunk whose statistics pass the filter.  Returns false
    /// once all chunks are consumed.
    async fn load_next_chunk(&mut self) -> Result<bool> {
        loop {
            if self.chunk_idx >= self.chunk_count() {
                self.state = SsiState::Exhausted;
                return Ok(false);
            }
            let idx = self.chunk_idx;
            self.chunk_idx += 1;

            match &self.series {
                LoadedSeries::Single(ts_index) => {
                    let meta = &ts_index.chunk_metas[idx];
                    if let (Some(filter), Some(stats)) = (&self.time_filter, &meta.statistics) {
                        if !filter.satisfy_range(stats.start_time(), stats.end_time()) {
                            continue;
                        }
                    }
                    let chunk = self.io.read_chunk(meta.offset_of_chunk_header).await?;
                    self.open = Some(OpenChunk {
                        chunk,
                        pos: 0,
                        value_chunk: None,
                        value_pos: 0,
                    });
                }
                LoadedSeries::Aligned { time, value } => {
                    let time_meta = &time.chunk_metas[idx];
                    let value_meta = value.chunk_metas.get(idx).ok_or_else(|| {
                        TsFileError::corrupted("aligned chunk lists are not parallel")
                    })?;
                    if let (Some(filter), Some(stats)) = (&self.time_filter, &time_meta.statistics)
                    {
                        if !filter.satisfy_range(stats.start_time(), stats.end_time()) {
                            continue;
                        }
                    }
                    let time_chunk = self.io.read_chunk(time_meta.offset_of_chunk_header).await?;
                    let value_chunk = self
                        .io
                        .read_chunk(value_meta.offset_of_chunk_header)
                        .await?;
                    self.open = Some(OpenChunk {
                        chunk: time_chunk,
                        pos: 0,
                        value_chunk: Some(value_chunk),
                        value_pos: 0,
                    });
                }
            }
            self.state = SsiState::ChunkOpen;
            return Ok(true);
        }
    }

    /// Returns the next decoded page with at least one row surviving the
    /// time filter, or `None` when the series is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<PageData>> {
        loop {
            match self.state {
                SsiState::Closed => {
                    return Err(TsFileError::InvalidState(
                        "series scan iterator is closed".to_string(),
                    ))
                }
                SsiState::Exhausted => return Ok(None),
                SsiState::Ready => {
                    if !self.load_next_chunk().await? {
                        return Ok(None);
                    }
                }
                SsiState::ChunkOpen => {
                    let Some(open) = self.open.as_mut() else {
                        self.state = SsiState::Ready;
                        continue;
                    };
                    if open.pos >= open.chunk.data.len() {
                        self.open = None;
                        self.state = SsiState::Ready;
                        continue;
                    }
                    let page = Self::decode_next_page(open, &self.time_filter)?;
                    if let Some(page) = page {
                        if !page.times.is_empty() {
                            return Ok(Some(page));
                        }
                    }
                    // page pruned or empty after filtering: keep scanning
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.open = None;
        self.state = SsiState::Closed;
    }

    /// Decodes (or prunes) the page at the current position of the open
    /// chunk, advancing past its bytes either way.
    fn decode_next_page(
        open: &mut OpenChunk,
        time_filter: &Option<TimeFilter>,
    ) -> Result<Option<PageData>> {
        let multi_page = !open.chunk.header.is_single_page();
        let header_type = if open.value_chunk.is_some() {
            TSDataType::Vector
        } else {
            open.chunk.header.data_type
        };

        let mut reader = ByteReader::new(&open.chunk.data[open.pos..]);
        let page_header = PageHeader::deserialize_from(&mut reader, header_type, multi_page)?;
        let body = reader.read_slice(page_header.compressed_size as usize)?;
        open.pos += reader.pos();

        let prune = match (time_filter, &page_header.statistics) {
            (Some(filter), Some(stats)) if stats.count() > 0 => {
                !filter.satisfy_range(stats.start_time(), stats.end_time())
            }
            _ => false,
        };

        match &open.value_chunk {
            None => {
                if prune {
                    return Ok(None);
                }
                let page = decode_unaligned_page(&open.chunk.header, &page_header, body)?;
                Ok(Some(filter_rows(page, time_filter)))
            }
            Some(value_chunk) => {
                // the value page must advance even when the time page is
                // pruned, to stay in lockstep
                let value_header_type = value_chunk.header.data_type;
                let mut value_reader = ByteReader::new(&value_chunk.data[open.value_pos..]);
                let value_page_header = PageHeader::deserialize_from(
                    &mut value_reader,
                    value_header_type,
                    !value_chunk.header.is_single_page(),
                )?;
                let value_body =
                    value_reader.read_slice(value_page_header.compressed_size as usize)?;
                open.value_pos += value_reader.pos();
                if prune {
                    return Ok(None);
                }
                let page = decode_aligned_page(
                    &open.chunk.header,
                    &page_header,
                    body,
                    &value_chunk.header,
                    &value_page_header,
                    value_body,
                )?;
                Ok(Some(filter_rows(page, time_filter)))
            }
        }
    }
}

fn filter_rows(page: PageData, time_filter: &Option<TimeFilter>) -> PageData {
    let Some(filter) = time_filter else {
        return page;
    };
    let mut times = Vec::with_capacity(page.times.len());
    let mut values = Vec::with_capacity(page.values.len());
    for (t, v) in page.times.into_iter().zip(page.values) {
        if filter.satisfy(t) {
            times.push(t);
            values.push(v);
        }
    }
    PageData { times, values }
}

/// Page body of an unaligned chunk: `{timeLen uvarint, times, values}`.
fn decode_unaligned_page(
    chunk_header: &ChunkHeader,
    page_header: &PageHeader,
    body: &[u8],
) -> Result<PageData> {
    let uncompressed = decompress(
        chunk_header.compression,
        body,
        page_header.uncompressed_size as usize,
    )?;
    let mut reader = ByteReader::new(&uncompressed);
    let time_len = reader.read_var_u32()? as usize;
    let time_bytes = reader.read_slice(time_len)?.to_vec();
    let value_bytes = uncompressed[reader.pos()..].to_vec();

    let mut time_decoder = new_decoder(PAGE_TIME_STREAM_ENCODING, TSDataType::Vector, time_bytes)?;
    let mut value_decoder = new_decoder(
        chunk_header.encoding,
        chunk_header.data_type,
        value_bytes,
    )?;

    let mut times = Vec::new();
    let mut values = Vec::new();
    while time_decoder.has_next()? {
        let t = match time_decoder.next()? {
            Value::Int64(t) => t,
            other => {
                return Err(TsFileError::corrupted(format!(
                    "time stream yielded {:?}",
                    other
                )))
            }
        };
        if !value_decoder.has_next()? {
            return Err(TsFileError::corrupted(
                "value stream shorter than time stream",
            ));
        }
        times.push(t);
        values.push(value_decoder.next()?);
    }
    if value_decoder.has_next()? {
        return Err(TsFileError::corrupted(
            "value stream longer than time stream",
        ));
    }
    Ok(PageData { times, values })
}

/// Aligned pair: the time page body is the bare time stream; the value page
/// body is `{rowCount uvarint, null bitmap, values}`.
fn decode_aligned_page(
    time_chunk_header: &ChunkHeader,
    time_page_header: &PageHeader,
    time_body: &[u8],
    value_chunk_header: &ChunkHeader,
    value_page_header: &PageHeader,
    value_body: &[u8],
) -> Result<PageData> {
    let time_bytes = decompress(
        time_chunk_header.compression,
        time_body,
        time_page_header.uncompressed_size as usize,
    )?;
    let mut time_decoder =
        new_decoder(time_chunk_header.encoding, TSDataType::Vector, time_bytes)?;
    let mut times = Vec::new();
    while time_decoder.has_next()? {
        match time_decoder.next()? {
            Value::Int64(t) => times.push(t),
            other => {
                return Err(TsFileError::corrupted(format!(
                    "time stream yielded {:?}",
                    other
                )))
            }
        }
    }

    let value_bytes = decompress(
        value_chunk_header.compression,
        value_body,
        value_page_header.uncompressed_size as usize,
    )?;
    let mut reader = ByteReader::new(&value_bytes);
    let row_count = reader.read_var_u32()? as usize;
    if row_count != times.len() {
        return Err(TsFileError::corrupted(format!(
            "aligned page row mismatch: {} times, {} value rows",
            times.len(),
            row_count
        )));
    }
    let bitmap = reader.read_slice((row_count + 7) / 8)?.to_vec();
    let encoded_values = value_bytes[reader.pos()..].to_vec();
    let mut value_decoder = new_decoder(
        value_chunk_header.encoding,
        value_chunk_header.data_type,
        encoded_values,
    )?;

    let mut values = Vec::with_capacity(row_count);
    for row in 0..row_count {
        let present = bitmap[row / 8] & (1 << (7 - (row % 8))) != 0;
        if present {
            if !value_decoder.has_next()? {
                return Err(TsFileError::corrupted(
                    "value stream shorter than its bitmap",
                ));
            }
            values.push(value_decoder.next()?);
        } else {
            values.push(Value::Null);
        }
    }
    Ok(PageData { times, values })
}
