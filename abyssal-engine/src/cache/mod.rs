//! The three-tier tile cache.
//!
//! L1 holds palette-applied textures for compositing, L2 the f32
//! iteration buffers, L3 a persistent store behind a background I/O
//! thread. Writes go through on completion (L2 first, L3
//! fire-and-forget, L1 on demand at composite time); completed tile
//! data never mutates in any tier.

pub mod l1;
pub mod l3;
pub mod lru;

use crate::cache::l1::RgbaTile;
use crate::cache::l3::{encode_tile, StoreCommand, StoreEvent, StoreHandle, TileStore};
use crate::cache::lru::LruCache;
use abyssal_core::{EngineConfig, Tile, TileKey};
use crossbeam_channel::Receiver;
use log::warn;
use std::sync::Arc;

pub struct ThreeTierCache {
    pub l1: LruCache<TileKey, RgbaTile>,
    l2: LruCache<TileKey, Arc<Tile>>,
    l3: Option<StoreHandle>,
    l3_events: Option<Receiver<StoreEvent>>,
    l3_broken: bool,
    l3_count_cap: usize,
    l3_bytes_cap: u64,
}

impl ThreeTierCache {
    /// Build the hierarchy; `store` is the optional persistent backend.
    pub fn new(config: &EngineConfig, store: Option<Box<dyn TileStore>>) -> Self {
        let (l3, l3_events) = match store {
            Some(store) => {
                let (event_tx, event_rx) = crossbeam_channel::unbounded();
                (Some(StoreHandle::spawn(store, event_tx)), Some(event_rx))
            }
            None => (None, None),
        };
        Self {
            l1: LruCache::new(config.l1_cache_tiles),
            l2: LruCache::new(config.l2_cache_tiles),
            l3,
            l3_events,
            l3_broken: false,
            l3_count_cap: config.l3_cache_tiles,
            l3_bytes_cap: config.l3_bytes_cap,
        }
    }

    /// Write-through on tile completion: L2 immediately, L3 in the
    /// background. A coarser tile never overwrites a finer one.
    pub fn store_complete(&mut self, tile: Arc<Tile>, now_ms: u64) {
        if let Some(existing) = self.l2.peek(&tile.key) {
            if existing.precision.fineness() > tile.precision.fineness() {
                return;
            }
        }
        self.l1.remove(&tile.key);
        self.l2.put(tile.key, Arc::clone(&tile));
        if let (Some(l3), false) = (&self.l3, self.l3_broken) {
            l3.send(StoreCommand::Put(tile.key, encode_tile(&tile, now_ms)));
        }
    }

    /// L2 lookup, refreshing recency.
    pub fn get_l2(&mut self, key: &TileKey) -> Option<Arc<Tile>> {
        self.l2.get(key).cloned()
    }

    pub fn contains_l2(&self, key: &TileKey) -> bool {
        self.l2.contains(key)
    }

    /// Kick off an asynchronous L3 lookup; the answer arrives through
    /// [`Self::drain_store_events`].
    pub fn request_l3(&self, key: TileKey) -> bool {
        match (&self.l3, self.l3_broken) {
            (Some(l3), false) => {
                l3.send(StoreCommand::Get(key));
                true
            }
            _ => false,
        }
    }

    pub fn l3_available(&self) -> bool {
        self.l3.is_some() && !self.l3_broken
    }

    /// Pull completed store events. A fault trips the broken latch; the
    /// engine continues on L1+L2 alone.
    pub fn drain_store_events(&mut self) -> Vec<StoreEvent> {
        let mut out = Vec::new();
        if let Some(rx) = &self.l3_events {
            while let Ok(event) = rx.try_recv() {
                if let StoreEvent::Fault(msg) = &event {
                    warn!("L3 backend fault, continuing with L1+L2: {msg}");
                    self.l3_broken = true;
                }
                out.push(event);
            }
        }
        out
    }

    /// Insert an L3 hit into L2 without a write-back.
    pub fn admit_from_l3(&mut self, tile: Arc<Tile>) {
        if let Some(existing) = self.l2.peek(&tile.key) {
            if existing.precision.fineness() >= tile.precision.fineness() {
                return;
            }
        }
        self.l2.put(tile.key, tile);
    }

    /// Periodic L3 pruning toward the configured caps.
    pub fn request_cleanup(&self) {
        if let (Some(l3), false) = (&self.l3, self.l3_broken) {
            l3.send(StoreCommand::Cleanup {
                max_count: self.l3_count_cap,
                max_bytes: self.l3_bytes_cap,
            });
        }
    }

    /// Clear cascades L1 → L2 → L3, the last one optionally.
    pub fn clear(&mut self, include_l3: bool) {
        self.l1.clear();
        self.l2.clear();
        if include_l3 {
            if let (Some(l3), false) = (&self.l3, self.l3_broken) {
                l3.send(StoreCommand::Clear);
            }
        }
    }

    /// Drop L1 only (palette change, GPU context loss analogue).
    pub fn clear_l1(&mut self) {
        self.l1.clear();
    }

    pub fn clear_l2(&mut self) {
        self.l2.clear();
    }

    pub fn l1_bytes(&self) -> u64 {
        self.l1.values().map(|t| t.byte_len() as u64).sum()
    }

    pub fn l2_bytes(&self) -> u64 {
        self.l2.values().map(|t| t.byte_len() as u64).sum()
    }

    pub fn l2_len(&self) -> usize {
        self.l2.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::l3::MemoryTileStore;
    use abyssal_core::{Tier, TileCoord, TileStatus};
    use std::time::Duration;

    fn tile(x: i64, tier: Tier) -> Arc<Tile> {
        Arc::new(Tile {
            key: TileKey::new(TileCoord::new(3, x, 0), 256),
            precision: tier,
            width_px: 8,
            pixels: vec![1.0; 64],
            status: TileStatus::Complete,
            last_accessed_ms: 0,
            render_time_ms: 0.5,
            glitched_px: 0,
        })
    }

    fn caches_with_memory_store() -> ThreeTierCache {
        ThreeTierCache::new(
            &EngineConfig::default(),
            Some(Box::new(MemoryTileStore::new())),
        )
    }

    #[test]
    fn write_through_lands_in_l2() {
        let mut caches = caches_with_memory_store();
        let t = tile(1, Tier::Standard);
        caches.store_complete(Arc::clone(&t), 100);
        assert!(caches.contains_l2(&t.key));
        assert_eq!(caches.l2_bytes(), 256);
    }

    #[test]
    fn l3_roundtrip_through_the_store_thread() {
        let mut caches = caches_with_memory_store();
        let t = tile(2, Tier::Standard);
        caches.store_complete(Arc::clone(&t), 100);

        // Simulate an L1+L2 wipe, then a read-through.
        caches.clear(false);
        assert!(!caches.contains_l2(&t.key));
        assert!(caches.request_l3(t.key));

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let events = caches.drain_store_events();
            let mut hit = false;
            for event in events {
                if let StoreEvent::Hit { key, blob } = event {
                    assert_eq!(key, t.key);
                    let decoded = crate::cache::l3::decode_tile(&blob).unwrap();
                    caches.admit_from_l3(Arc::new(decoded));
                    hit = true;
                }
            }
            if hit {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "no L3 answer");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(caches.contains_l2(&t.key));
    }

    #[test]
    fn finer_precision_wins_on_overwrite() {
        let mut caches = caches_with_memory_store();
        let fine = tile(3, Tier::Perturbation);
        let coarse = tile(3, Tier::Standard);
        caches.store_complete(Arc::clone(&fine), 1);
        caches.store_complete(Arc::clone(&coarse), 2);
        let resident = caches.get_l2(&fine.key).unwrap();
        assert_eq!(resident.precision, Tier::Perturbation);

        // The finer one replaces the coarser one, though.
        let mut caches = caches_with_memory_store();
        caches.store_complete(Arc::clone(&coarse), 1);
        caches.store_complete(Arc::clone(&fine), 2);
        assert_eq!(
            caches.get_l2(&fine.key).unwrap().precision,
            Tier::Perturbation
        );
    }

    #[test]
    fn cache_without_l3_still_works() {
        let mut caches = ThreeTierCache::new(&EngineConfig::default(), None);
        assert!(!caches.l3_available());
        let t = tile(4, Tier::Standard);
        caches.store_complete(Arc::clone(&t), 1);
        assert!(caches.contains_l2(&t.key));
        assert!(!caches.request_l3(t.key));
        assert!(caches.drain_store_events().is_empty());
    }

    #[test]
    fn clear_cascades() {
        let mut caches = caches_with_memory_store();
        let t = tile(5, Tier::Standard);
        caches.store_complete(Arc::clone(&t), 1);
        caches.l1.put(
            t.key,
            RgbaTile {
                width: 8,
                pixels: vec![0; 256],
                palette_rev: 1,
            },
        );
        caches.clear(true);
        assert_eq!(caches.l1.len(), 0);
        assert_eq!(caches.l2_len(), 0);
    }
}
