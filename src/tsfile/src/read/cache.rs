//! Shared LRU cache of raw chunks, keyed by `(fileId, chunkOffset)`.  One
//! mutex guards the map; values are copied out under the lock, so an evicted
//! entry can never be observed by a reader that already fetched it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::file::chunk::ChunkHeader;

/// A chunk as read from disk: parsed header plus the raw page bytes.
#[derive(Debug, Clone)]
pub struct CachedChunk {
    pub header: ChunkHeader,
    pub data: Vec<u8>,
}

struct Inner {
    entries: HashMap<(u64, i64), (CachedChunk, u64)>,
    /// Recency order: tick -> key; the smallest tick is the eviction victim.
    order: BTreeMap<u64, (u64, i64)>,
    tick: u64,
}

pub struct ChunkCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn get(&self, key: (u64, i64)) -> Option<CachedChunk> {
        let mut guard = self.inner.lock().ok()?;
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;
        let (chunk, old_tick) = inner.entries.get_mut(&key)?;
        let chunk = chunk.clone();
        let prev = std::mem::replace(old_tick, tick);
        inner.order.remove(&prev);
        inner.order.insert(tick, key);
        Some(chunk)
    }

    pub fn put(&self, key: (u64, i64), chunk: CachedChunk) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut guard) = self.inner.lock() else {
            return;
        };
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;
        if let Some((_, old_tick)) = inner.entries.remove(&key) {
            inner.order.remove(&old_tick);
        }
        inner.entries.insert(key, (chunk, tick));
        inner.order.insert(tick, key);
        while inner.entries.len() > self.capacity {
            let Some((&victim_tick, &victim_key)) = inner.order.iter().next() else {
                break;
            };
            inner.order.remove(&victim_tick);
            inner.entries.remove(&victim_key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use tsfile_common::datatype::{CompressionType, TSDataType, TSEncoding};

    use super::*;

    fn chunk(tagged: u8) -> CachedChunk {
        CachedChunk {
            header: ChunkHeader {
                measurement_name: "s".to_string(),
                data_size: 1,
                data_type: TSDataType::Int32,
                compression: CompressionType::Uncompressed,
                encoding: TSEncoding::Plain,
                num_pages: 1,
                mask: 0,
            },
            data: vec![tagged],
        }
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let cache = ChunkCache::new(2);
        cache.put((1, 10), chunk(1));
        cache.put((1, 20), chunk(2));
        // touch the first entry so the second becomes the victim
        assert!(cache.get((1, 10)).is_some());
        cache.put((1, 30), chunk(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get((1, 10)).is_some());
        assert!(cache.get((1, 20)).is_none());
        assert!(cache.get((1, 30)).is_some());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = ChunkCache::new(0);
        cache.put((1, 10), chunk(1));
        assert!(cache.get((1, 10)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_same_key() {
        let cache = ChunkCache::new(2);
        cache.put((1, 10), chunk(1));
        cache.put((1, 10), chunk(9));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get((1, 10)).unwrap().data, vec![9]);
    }
}
