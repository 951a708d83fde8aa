use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use nohash::IntMap;
use tracing::debug;

use crate::tract::ResidentSize;
use crate::Result;

/// Hit and miss counts of a cache since its creation.
#[derive(Debug, Default, Copy, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// A byte-bounded LRU cache over loaded tracts, keyed by id.
///
/// Entries are handed out as `Arc`s, so a reader holding a tract keeps it
/// alive across evictions. At most one thread loads a given id at a time;
/// concurrent callers for the same id block until the load lands. Loads run
/// outside the table lock, table updates are short critical sections.
pub struct TractCache<T> {
    inner: Mutex<Inner<T>>,
    loaded: Condvar,
    budget: usize,
}

struct Inner<T> {
    entries: IntMap<u32, Entry<T>>,
    // LRU order of ready entries, least recently used first
    order: VecDeque<u32>,
    resident: usize,
    stats: CacheStats,
}

enum Entry<T> {
    Loading,
    Ready { tract: Arc<T>, size: usize },
}

impl<T: ResidentSize> TractCache<T> {
    pub fn new(budget: usize) -> TractCache<T> {
        TractCache {
            inner: Mutex::new(Inner {
                entries: IntMap::default(),
                order: VecDeque::new(),
                resident: 0,
                stats: CacheStats::default(),
            }),
            loaded: Condvar::new(),
            budget,
        }
    }

    /// Returns the cached tract for `id`, invoking `loader` on a miss.
    pub fn get_or_load(
        &self,
        id: u32,
        loader: impl FnOnce() -> Result<T>,
    ) -> Result<Arc<T>> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            match inner.entries.get(&id) {
                Some(Entry::Ready { tract, .. }) => {
                    let tract = Arc::clone(tract);
                    inner.stats.hits += 1;
                    inner.touch(id);
                    return Ok(tract);
                }
                Some(Entry::Loading) => {
                    inner = self.loaded.wait(inner).unwrap();
                }
                None => break,
            }
        }
        inner.stats.misses += 1;
        inner.entries.insert(id, Entry::Loading);
        drop(inner);

        match loader() {
            Ok(tract) => Ok(self.finish_load(id, tract)),
            Err(e) => {
                let mut inner = self.inner.lock().unwrap();
                inner.entries.remove(&id);
                self.loaded.notify_all();
                Err(e)
            }
        }
    }

    /// Inserts a tract built by the caller, evicting as needed.
    pub fn insert(&self, id: u32, tract: T) -> Arc<T> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(Entry::Ready { size, .. }) = inner.entries.remove(&id) {
            inner.resident -= size;
            inner.order.retain(|&other| other != id);
        }
        inner.entries.insert(id, Entry::Loading);
        drop(inner);
        self.finish_load(id, tract)
    }

    fn finish_load(&self, id: u32, tract: T) -> Arc<T> {
        let size = tract.resident_size();
        let tract = Arc::new(tract);
        let mut inner = self.inner.lock().unwrap();
        while inner.resident + size > self.budget {
            let Some(evicted) = inner.order.pop_front() else { break };
            if let Some(Entry::Ready { size: freed, .. }) = inner.entries.remove(&evicted) {
                inner.resident -= freed;
                debug!(id = evicted, freed, "evicted tract");
            }
        }
        let previous =
            inner.entries.insert(id, Entry::Ready { tract: Arc::clone(&tract), size });
        if let Some(Entry::Ready { size: stale, .. }) = previous {
            inner.resident -= stale;
            inner.order.retain(|&other| other != id);
        }
        inner.resident += size;
        inner.order.push_back(id);
        self.loaded.notify_all();
        tract
    }

    /// Drops a ready entry, releasing its budget share. An id currently
    /// being loaded is left to its loader.
    pub fn evict(&self, id: u32) {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.entries.get(&id), Some(Entry::Ready { .. })) {
            if let Some(Entry::Ready { size, .. }) = inner.entries.remove(&id) {
                inner.resident -= size;
                inner.order.retain(|&other| other != id);
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.retain(|_, entry| matches!(entry, Entry::Loading));
        inner.order.clear();
        inner.resident = 0;
    }

    pub fn resident_bytes(&self) -> usize {
        self.inner.lock().unwrap().resident
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats
    }
}

impl<T> Inner<T> {
    fn touch(&mut self, id: u32) {
        if let Some(position) = self.order.iter().position(|&other| other == id) {
            self.order.remove(position);
            self.order.push_back(id);
        }
    }
}
