//! TableResultSet: the user-facing stream of TsBlocks.  It holds a weak
//! back-link to its reader's liveness token; once the reader is closed every
//! operation fails with an invalid-state error.

use std::sync::Weak;

use tsfile_common::iterator::AsyncIterator;

use crate::error::{Result, TsFileError};
use crate::read::device_reader::DeviceOrderedTsBlockReader;
use crate::read::tsblock::TsBlock;

pub struct TableResultSet {
    inner: DeviceOrderedTsBlockReader,
    reader_alive: Weak<()>,
    closed: bool,
}

impl std::fmt::Debug for TableResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableResultSet")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl TableResultSet {
    pub(crate) fn new(inner: DeviceOrderedTsBlockReader, reader_alive: Weak<()>) -> Self {
        Self {
            inner,
            reader_alive,
            closed: false,
        }
    }

    fn check_usable(&self) -> Result<()> {
        if self.closed {
            return Err(TsFileError::InvalidState(
                "result set is closed".to_string(),
            ));
        }
        if self.reader_alive.upgrade().is_none() {
            return Err(TsFileError::InvalidState(
                "the owning reader has been closed".to_string(),
            ));
        }
        Ok(())
    }

    /// The next block in device-major, time-minor order; `None` at the end.
    pub async fn next_block(&mut self) -> Result<Option<TsBlock>> {
        self.check_usable()?;
        self.inner.try_next().await
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}
