//! Tile cache
//!
//! Bounded, concurrency-safe cache of decoded tile buffers keyed by
//! `(sub-directory, tile address)`. Entries are whole decoded tiles, so two
//! channel blocks configured over the same sub-directory share one decode.
//!
//! The map is a `DashMap`, keeping access fine-grained per shard rather
//! than serializing the worker pool on a global lock. Each entry owns a
//! single-flight slot: the first caller for a missing key decodes, every
//! concurrent caller for the same key blocks on the slot's condvar and
//! receives the same result. Decode failures are broadcast to the waiters
//! that coalesced onto them but are never cached; the next request retries.
//!
//! Eviction is least-recently-used over a byte budget. The cache lives for
//! one dataset-processing run; there is no cross-session persistence.

use crate::channel::{ChannelError, DecodedTile};
use crate::tile::TileAddress;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tracing::debug;

/// Cache key: which sub-directory's pyramid, which address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Dataset sub-directory the tile was decoded from
    pub sub: String,
    /// Tile address within that pyramid
    pub address: TileAddress,
}

impl TileKey {
    /// Creates a cache key.
    pub fn new(sub: impl Into<String>, address: TileAddress) -> Self {
        Self {
            sub: sub.into(),
            address,
        }
    }
}

/// Snapshot of cache effectiveness counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from a ready entry
    pub hits: u64,
    /// Requests that ran the producer
    pub misses: u64,
    /// Requests that waited on another caller's in-flight decode
    pub coalesced: u64,
    /// Entries removed to stay under the byte budget
    pub evictions: u64,
    /// Current resident bytes
    pub size_bytes: usize,
    /// Current entry count
    pub entry_count: usize,
}

/// State of one single-flight slot.
enum SlotState {
    /// Producer still running; waiters block on the condvar
    Pending,
    /// Decode succeeded; shared buffer available
    Ready(Arc<DecodedTile>),
    /// Decode failed; error handed to coalesced waiters, entry removed
    Failed(ChannelError),
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn pending() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        }
    }
}

struct CacheEntry {
    slot: Arc<Slot>,
    /// Logical access tick for LRU ordering
    last_access: AtomicU64,
    /// Resident bytes once ready; zero while pending
    bytes: AtomicUsize,
}

/// Bounded LRU cache of decoded tiles with single-flight production.
pub struct TileCache {
    entries: DashMap<TileKey, CacheEntry>,
    max_size_bytes: usize,
    current_bytes: AtomicUsize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

/// Default byte budget: enough for a few thousand 256x256 RGB tiles.
pub const DEFAULT_CAPACITY_BYTES: usize = 512 * 1024 * 1024;

impl TileCache {
    /// Creates a cache with the given byte budget.
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_size_bytes,
            current_bytes: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the cached tile for `key`, running `producer` at most once
    /// per miss to fill it.
    ///
    /// Concurrent callers for the same missing key block until the single
    /// in-flight producer finishes and then share its result. A failed
    /// produce is returned to every coalesced caller and forgotten, so a
    /// later request retries the decode.
    pub fn get_or_decode<F>(
        &self,
        key: &TileKey,
        producer: F,
    ) -> Result<Arc<DecodedTile>, ChannelError>
    where
        F: FnOnce() -> Result<DecodedTile, ChannelError>,
    {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;

        // Entry API gives an atomic check-and-insert; the shard guard is
        // released at the end of the match, before any blocking below.
        let (slot, is_producer) = match self.entries.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                occupied.get().last_access.store(tick, Ordering::Relaxed);
                (Arc::clone(&occupied.get().slot), false)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let slot = Arc::new(Slot::pending());
                vacant.insert(CacheEntry {
                    slot: Arc::clone(&slot),
                    last_access: AtomicU64::new(tick),
                    bytes: AtomicUsize::new(0),
                });
                (slot, true)
            }
        };

        if is_producer {
            self.produce(key, &slot, producer)
        } else {
            self.wait(&slot)
        }
    }

    fn produce<F>(
        &self,
        key: &TileKey,
        slot: &Arc<Slot>,
        producer: F,
    ) -> Result<Arc<DecodedTile>, ChannelError>
    where
        F: FnOnce() -> Result<DecodedTile, ChannelError>,
    {
        self.misses.fetch_add(1, Ordering::Relaxed);

        match producer() {
            Ok(tile) => {
                let tile = Arc::new(tile);
                let bytes = tile.byte_len();

                {
                    let mut state = self.lock_state(slot);
                    *state = SlotState::Ready(Arc::clone(&tile));
                }
                slot.ready.notify_all();

                // The entry may have been cleared while we were decoding;
                // only a still-resident entry counts toward the budget
                if let Some(entry) = self.entries.get(key) {
                    entry.bytes.store(bytes, Ordering::Relaxed);
                    self.current_bytes.fetch_add(bytes, Ordering::Relaxed);
                    self.evict_if_over_limit();
                }

                Ok(tile)
            }
            Err(err) => {
                {
                    let mut state = self.lock_state(slot);
                    *state = SlotState::Failed(err.clone());
                }
                slot.ready.notify_all();

                // Only remove the entry we created; a retry may already
                // have replaced it.
                self.entries
                    .remove_if(key, |_, entry| Arc::ptr_eq(&entry.slot, slot));

                Err(err)
            }
        }
    }

    fn wait(&self, slot: &Arc<Slot>) -> Result<Arc<DecodedTile>, ChannelError> {
        let mut state = self.lock_state(slot);
        let mut waited = false;

        loop {
            match &*state {
                SlotState::Ready(tile) => {
                    if waited {
                        self.coalesced.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(Arc::clone(tile));
                }
                SlotState::Failed(err) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    return Err(err.clone());
                }
                SlotState::Pending => {
                    waited = true;
                    state = slot
                        .ready
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
        }
    }

    fn lock_state<'a>(&self, slot: &'a Slot) -> std::sync::MutexGuard<'a, SlotState> {
        slot.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Evicts least-recently-used ready entries until under the byte budget.
    ///
    /// Pending entries are never evicted; their producers account bytes
    /// only once ready.
    fn evict_if_over_limit(&self) {
        if self.current_bytes.load(Ordering::Relaxed) <= self.max_size_bytes {
            return;
        }

        let mut candidates: Vec<(TileKey, u64, usize)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let bytes = entry.bytes.load(Ordering::Relaxed);
                if bytes == 0 {
                    return None;
                }
                Some((
                    entry.key().clone(),
                    entry.last_access.load(Ordering::Relaxed),
                    bytes,
                ))
            })
            .collect();

        candidates.sort_by_key(|(_, tick, _)| *tick);

        let mut evicted = 0u64;
        for (key, _, bytes) in candidates {
            if self.current_bytes.load(Ordering::Relaxed) <= self.max_size_bytes {
                break;
            }
            if self
                .entries
                .remove_if(&key, |_, entry| entry.bytes.load(Ordering::Relaxed) == bytes)
                .is_some()
            {
                self.current_bytes.fetch_sub(bytes, Ordering::Relaxed);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(
                evicted,
                size_bytes = self.current_bytes.load(Ordering::Relaxed),
                "Tile cache eviction"
            );
        }
    }

    /// True if a ready or in-flight entry exists for the key.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Current entry count, pending entries included.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Current resident bytes across ready entries.
    pub fn size_bytes(&self) -> usize {
        self.current_bytes.load(Ordering::Relaxed)
    }

    /// Configured byte budget.
    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Drops every entry. In-flight producers finish normally; their
    /// results simply stop being resident.
    pub fn clear(&self) {
        self.entries.clear();
        self.current_bytes.store(0, Ordering::Relaxed);
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size_bytes: self.size_bytes(),
            entry_count: self.entry_count(),
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn key(sub: &str, y: u32) -> TileKey {
        TileKey::new(sub, TileAddress::new(10, 1, y).unwrap())
    }

    fn tile_of(bytes: usize, fill: u8) -> DecodedTile {
        DecodedTile {
            bands: 1,
            height: 1,
            width: bytes as u32,
            data: vec![fill; bytes],
        }
    }

    #[test]
    fn test_miss_runs_producer_once() {
        let cache = TileCache::new(1_000_000);
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_decode(&key("images", 1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(tile_of(16, 7))
            })
            .unwrap();
        let second = cache
            .get_or_decode(&key("images", 1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(tile_of(16, 9))
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.data, second.data);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_keys_differ_by_sub_and_address() {
        let cache = TileCache::new(1_000_000);
        cache
            .get_or_decode(&key("images", 1), || Ok(tile_of(4, 1)))
            .unwrap();
        cache
            .get_or_decode(&key("elevation", 1), || Ok(tile_of(4, 2)))
            .unwrap();
        cache
            .get_or_decode(&key("images", 2), || Ok(tile_of(4, 3)))
            .unwrap();

        assert_eq!(cache.entry_count(), 3);
        assert_eq!(cache.size_bytes(), 12);
    }

    #[test]
    fn test_failure_is_returned_and_not_cached() {
        let cache = TileCache::new(1_000_000);
        let k = key("images", 1);

        let err = cache
            .get_or_decode(&k, || {
                Err(ChannelError::TileNotFound {
                    sub: "images".to_string(),
                    address: k.address,
                })
            })
            .unwrap_err();
        assert!(matches!(err, ChannelError::TileNotFound { .. }));
        assert!(!cache.contains(&k));

        // A later request retries and can succeed
        let tile = cache.get_or_decode(&k, || Ok(tile_of(8, 1))).unwrap();
        assert_eq!(tile.byte_len(), 8);
        assert!(cache.contains(&k));
    }

    #[test]
    fn test_lru_eviction_over_byte_budget() {
        let cache = TileCache::new(2500);

        cache
            .get_or_decode(&key("images", 1), || Ok(tile_of(1000, 1)))
            .unwrap();
        cache
            .get_or_decode(&key("images", 2), || Ok(tile_of(1000, 2)))
            .unwrap();
        // Touch tile 1 so tile 2 becomes the LRU victim
        cache
            .get_or_decode(&key("images", 1), || Ok(tile_of(1000, 1)))
            .unwrap();
        cache
            .get_or_decode(&key("images", 3), || Ok(tile_of(1000, 3)))
            .unwrap();

        assert!(cache.size_bytes() <= 2500);
        assert!(cache.contains(&key("images", 1)), "recently used survives");
        assert!(!cache.contains(&key("images", 2)), "LRU entry evicted");
        assert!(cache.contains(&key("images", 3)));
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn test_concurrent_same_key_single_flight() {
        let cache = Arc::new(TileCache::new(1_000_000));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                cache.get_or_decode(&key("images", 1), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // Hold the slot long enough for the others to coalesce
                    thread::sleep(std::time::Duration::from_millis(50));
                    Ok(tile_of(32, 5))
                })
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for result in &results {
            let tile = result.as_ref().unwrap();
            assert_eq!(tile.data, vec![5; 32]);
        }

        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "exactly one decode under contention"
        );
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_concurrent_failure_reaches_all_waiters() {
        let cache = Arc::new(TileCache::new(1_000_000));
        let barrier = Arc::new(Barrier::new(4));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                cache.get_or_decode(&key("images", 9), || {
                    thread::sleep(std::time::Duration::from_millis(30));
                    Err(ChannelError::Decode {
                        sub: "images".to_string(),
                        address: TileAddress::new(10, 1, 9).unwrap(),
                        message: "truncated".to_string(),
                    })
                })
            }));
        }

        for handle in handles {
            assert!(handle.join().unwrap().is_err());
        }
        assert!(!cache.contains(&key("images", 9)));
    }

    #[test]
    fn test_clear_during_inflight_produce_skips_accounting() {
        let cache = TileCache::new(1_000_000);
        let k = key("images", 1);

        // Clearing while this producer runs removes its pending entry;
        // the finished tile must not count toward residency
        let tile = cache
            .get_or_decode(&k, || {
                cache.clear();
                Ok(tile_of(64, 1))
            })
            .unwrap();
        assert_eq!(tile.byte_len(), 64);
        assert_eq!(cache.size_bytes(), 0);
        assert!(!cache.contains(&k));

        // Later inserts account normally
        cache.get_or_decode(&k, || Ok(tile_of(8, 2))).unwrap();
        assert_eq!(cache.size_bytes(), 8);
    }

    #[test]
    fn test_clear_resets_residency() {
        let cache = TileCache::new(1_000_000);
        cache
            .get_or_decode(&key("images", 1), || Ok(tile_of(64, 1)))
            .unwrap();

        cache.clear();
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.size_bytes(), 0);
    }
}
