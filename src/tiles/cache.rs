use crate::core::geo::TileId;
use crate::tiles::tile::TextureTile;
use crossbeam_channel::{bounded, Receiver, Sender};
use lru::LruCache;
use std::sync::{Arc, RwLock};

/// Most lookups remembered between two writes; later ones are dropped
const TOUCH_QUEUE_CAPACITY: usize = 1024;

/// In-memory tile cache bounded by a byte budget with LRU eviction.
///
/// Lookups only take the read lock and `peek`, so any number of render
/// bands can read concurrently. The ids they touch are queued and promoted
/// in the LRU order by the next writer, which keeps insert/evict the only
/// operations that need exclusive access. The queue is bounded: once it is
/// full, further touches are dropped until the next insert drains it.
#[derive(Debug)]
pub struct VolatileTileCache {
    cache: RwLock<LruCache<TileId, Arc<TextureTile>>>,
    budget: usize,
    used: RwLock<usize>,
    touched_tx: Sender<TileId>,
    touched_rx: Receiver<TileId>,
}

impl VolatileTileCache {
    /// Create a new tile cache holding at most `budget_bytes` of tiles
    pub fn new(budget_bytes: usize) -> Self {
        let (touched_tx, touched_rx) = bounded(TOUCH_QUEUE_CAPACITY);
        Self {
            cache: RwLock::new(LruCache::unbounded()),
            budget: budget_bytes.max(1),
            used: RwLock::new(0),
            touched_tx,
            touched_rx,
        }
    }

    /// Get a tile from the cache
    pub fn get(&self, id: &TileId) -> Option<Arc<TextureTile>> {
        let tile = self.cache.read().ok()?.peek(id).cloned();
        if tile.is_some() {
            let _ = self.touched_tx.try_send(*id);
        }
        tile
    }

    /// Check if a tile is in the cache
    pub fn contains(&self, id: &TileId) -> bool {
        self.cache
            .read()
            .map(|cache| cache.contains(id))
            .unwrap_or(false)
    }

    /// Insert a tile, replacing any previous version, and evict least
    /// recently used tiles until the cache fits its budget again.
    ///
    /// A provisional tile never replaces a real one. Returns the ids that
    /// were evicted.
    pub fn insert(&self, tile: Arc<TextureTile>) -> Vec<TileId> {
        let mut evicted = Vec::new();
        let (Ok(mut cache), Ok(mut used)) = (self.cache.write(), self.used.write()) else {
            return evicted;
        };
        if tile.provisional && cache.peek(&tile.id).is_some_and(|cached| !cached.provisional) {
            return evicted;
        }

        while let Ok(id) = self.touched_rx.try_recv() {
            cache.promote(&id);
        }

        let size = tile.byte_size();
        if let Some(previous) = cache.put(tile.id, tile) {
            *used = used.saturating_sub(previous.byte_size());
        }
        *used += size;

        // the newest tile is never evicted, even if it alone exceeds the budget
        while *used > self.budget && cache.len() > 1 {
            match cache.pop_lru() {
                Some((id, old)) => {
                    *used = used.saturating_sub(old.byte_size());
                    evicted.push(id);
                }
                None => break,
            }
        }
        if !evicted.is_empty() {
            log::debug!("evicted {} tiles from volatile cache", evicted.len());
        }
        evicted
    }

    /// Remove a tile from the cache
    pub fn remove(&self, id: &TileId) -> Option<Arc<TextureTile>> {
        let (Ok(mut cache), Ok(mut used)) = (self.cache.write(), self.used.write()) else {
            return None;
        };
        let removed = cache.pop(id)?;
        *used = used.saturating_sub(removed.byte_size());
        Some(removed)
    }

    /// Clear all tiles from the cache
    pub fn clear(&self) {
        if let (Ok(mut cache), Ok(mut used)) = (self.cache.write(), self.used.write()) {
            cache.clear();
            *used = 0;
        }
        while self.touched_rx.try_recv().is_ok() {}
    }

    /// Get the current number of cached tiles
    pub fn len(&self) -> usize {
        self.cache.read().map(|cache| cache.len()).unwrap_or(0)
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently held
    pub fn bytes_used(&self) -> usize {
        self.used.read().map(|used| *used).unwrap_or(0)
    }

    /// Byte budget
    pub fn budget(&self) -> usize {
        self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::tile::TileImage;

    fn tile(x: i32) -> Arc<TextureTile> {
        Arc::new(TextureTile::new(
            TileId::new(7, 1, x, 0),
            TileImage::filled(8, 8, x as u32),
        ))
    }

    #[test]
    fn test_tile_cache_basic_operations() {
        let cache = VolatileTileCache::new(1 << 20);
        assert!(cache.is_empty());

        cache.insert(tile(1));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&TileId::new(7, 1, 1, 0)));
        assert_eq!(cache.bytes_used(), tile(1).byte_size());

        let first = cache.get(&TileId::new(7, 1, 1, 0)).unwrap();
        let second = cache.get(&TileId::new(7, 1, 1, 0)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert!(cache.remove(&TileId::new(7, 1, 1, 0)).is_some());
        assert_eq!(cache.bytes_used(), 0);
        cache.insert(tile(2));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_tile_cache_lru_eviction_by_bytes() {
        let per_tile = tile(0).byte_size();
        let cache = VolatileTileCache::new(per_tile * 2);

        cache.insert(tile(1));
        cache.insert(tile(2));
        // reading tile 1 makes tile 2 the least recently used
        cache.get(&TileId::new(7, 1, 1, 0));
        let evicted = cache.insert(tile(3));

        assert_eq!(evicted, vec![TileId::new(7, 1, 2, 0)]);
        assert!(cache.contains(&TileId::new(7, 1, 1, 0)));
        assert!(cache.contains(&TileId::new(7, 1, 3, 0)));
        assert!(cache.bytes_used() <= cache.budget());
    }

    #[test]
    fn test_replacing_tile_keeps_accounting() {
        let cache = VolatileTileCache::new(1 << 20);
        cache.insert(tile(1));
        cache.insert(tile(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bytes_used(), tile(1).byte_size());
    }

    #[test]
    fn test_read_only_lookups_stay_bounded() {
        let cache = VolatileTileCache::new(1 << 20);
        cache.insert(tile(1));
        let id = TileId::new(7, 1, 1, 0);
        for _ in 0..10 * TOUCH_QUEUE_CAPACITY {
            assert!(cache.get(&id).is_some());
        }
        assert_eq!(cache.touched_rx.len(), TOUCH_QUEUE_CAPACITY);

        cache.insert(tile(2));
        assert!(cache.touched_rx.is_empty());
    }

    #[test]
    fn test_provisional_never_replaces_real_tile() {
        let cache = VolatileTileCache::new(1 << 20);
        cache.insert(tile(1));
        let mut stand_in = TextureTile::new(TileId::new(7, 1, 1, 0), TileImage::filled(8, 8, 0));
        stand_in.provisional = true;
        cache.insert(Arc::new(stand_in));
        assert!(!cache.get(&TileId::new(7, 1, 1, 0)).unwrap().provisional);
    }

    #[test]
    fn test_concurrent_readers() {
        let cache = Arc::new(VolatileTileCache::new(1 << 20));
        for x in 0..16 {
            cache.insert(tile(x));
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    (0..16)
                        .filter(|&x| cache.get(&TileId::new(7, 1, x, 0)).is_some())
                        .count()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 16);
        }
    }
}
