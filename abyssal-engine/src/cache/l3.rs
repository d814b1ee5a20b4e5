//! L3: the persistent tile store.
//!
//! The concrete backend is abstracted behind [`TileStore`], a key-value
//! interface; blobs are a fixed packed header plus the f32 iteration
//! payload. A dedicated I/O thread makes every store operation
//! asynchronous from the coordinator's point of view; a backend fault
//! is reported once and the engine continues with L1+L2.

use abyssal_core::{EngineError, Tier, Tile, TileCoord, TileKey, TileStatus};
use bytemuck::{Pod, Zeroable};
use crossbeam_channel::Sender;
use log::warn;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

/// Prune target once a cap is exceeded: back off to 80% of the cap.
const CLEANUP_TARGET_NUM: u64 = 8;
const CLEANUP_TARGET_DEN: u64 = 10;
const CLEANUP_BATCH: usize = 32;

/// Key-value surface the engine expects from a persistent store.
pub trait TileStore: Send {
    fn get(&mut self, key: &TileKey) -> Result<Option<Vec<u8>>, EngineError>;
    fn put(&mut self, key: &TileKey, blob: &[u8]) -> Result<(), EngineError>;
    fn delete(&mut self, key: &TileKey) -> Result<(), EngineError>;
    fn count(&mut self) -> Result<usize, EngineError>;
    fn total_bytes(&mut self) -> Result<u64, EngineError>;
    /// Oldest `k` keys by stored_at, oldest first.
    fn iter_oldest_k(&mut self, k: usize) -> Result<Vec<TileKey>, EngineError>;
    fn clear(&mut self) -> Result<(), EngineError>;
}

/// On-disk layout of a tile blob header, immediately followed by
/// width·width little-endian f32 iteration values.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C, packed)]
pub struct TileBlobHeader {
    pub level: u16,
    pub x: i64,
    pub y: i64,
    pub center_re: f64,
    pub center_im: f64,
    pub scale: f64,
    pub max_iter: u32,
    pub precision_tag: u8,
    pub stored_at_ms: u64,
    pub width_px: u16,
}

pub const HEADER_BYTES: usize = std::mem::size_of::<TileBlobHeader>();

pub fn encode_tile(tile: &Tile, stored_at_ms: u64) -> Vec<u8> {
    let coord = tile.key.coord;
    let (center_re, center_im) = coord.center();
    let header = TileBlobHeader {
        level: coord.level,
        x: coord.x,
        y: coord.y,
        center_re,
        center_im,
        scale: TileCoord::span(coord.level),
        max_iter: tile.key.max_iter,
        precision_tag: tile.precision.tag(),
        stored_at_ms,
        width_px: tile.width_px,
    };
    let mut out = Vec::with_capacity(HEADER_BYTES + tile.pixels.len() * 4);
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(bytemuck::cast_slice(&tile.pixels));
    out
}

pub fn decode_tile(blob: &[u8]) -> Result<Tile, EngineError> {
    if blob.len() < HEADER_BYTES {
        return Err(EngineError::CacheBackend(format!(
            "tile blob truncated: {} bytes",
            blob.len()
        )));
    }
    let header: TileBlobHeader = bytemuck::pod_read_unaligned(&blob[..HEADER_BYTES]);
    let width = header.width_px as usize;
    let payload = &blob[HEADER_BYTES..];
    if payload.len() != width * width * 4 {
        return Err(EngineError::CacheBackend(format!(
            "tile payload size mismatch: {} bytes for width {width}",
            payload.len()
        )));
    }
    let precision = Tier::from_tag(header.precision_tag).ok_or_else(|| {
        EngineError::CacheBackend(format!("unknown precision tag {}", header.precision_tag))
    })?;
    let pixels: Vec<f32> = bytemuck::pod_collect_to_vec(payload);
    let stored_at = header.stored_at_ms;
    Ok(Tile {
        key: TileKey::new(
            TileCoord::new(header.level, header.x, header.y),
            header.max_iter,
        ),
        precision,
        width_px: header.width_px,
        pixels,
        status: TileStatus::Complete,
        last_accessed_ms: stored_at,
        render_time_ms: 0.0,
        glitched_px: 0,
    })
}

fn stored_at_of(blob: &[u8]) -> Option<(TileKey, u64)> {
    if blob.len() < HEADER_BYTES {
        return None;
    }
    let header: TileBlobHeader = bytemuck::pod_read_unaligned(&blob[..HEADER_BYTES]);
    let key = TileKey::new(
        TileCoord::new(header.level, header.x, header.y),
        header.max_iter,
    );
    Some((key, header.stored_at_ms))
}

/// In-memory store: the reference backend for tests and cache-less
/// hosts.
#[derive(Default)]
pub struct MemoryTileStore {
    blobs: HashMap<TileKey, (u64, Vec<u8>)>,
    seq: u64,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TileStore for MemoryTileStore {
    fn get(&mut self, key: &TileKey) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.blobs.get(key).map(|(_, b)| b.clone()))
    }

    fn put(&mut self, key: &TileKey, blob: &[u8]) -> Result<(), EngineError> {
        self.seq += 1;
        self.blobs.insert(*key, (self.seq, blob.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &TileKey) -> Result<(), EngineError> {
        self.blobs.remove(key);
        Ok(())
    }

    fn count(&mut self) -> Result<usize, EngineError> {
        Ok(self.blobs.len())
    }

    fn total_bytes(&mut self) -> Result<u64, EngineError> {
        Ok(self.blobs.values().map(|(_, b)| b.len() as u64).sum())
    }

    fn iter_oldest_k(&mut self, k: usize) -> Result<Vec<TileKey>, EngineError> {
        let mut entries: Vec<(u64, TileKey)> =
            self.blobs.iter().map(|(key, (seq, _))| (*seq, *key)).collect();
        entries.sort_unstable_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().take(k).map(|(_, key)| key).collect())
    }

    fn clear(&mut self) -> Result<(), EngineError> {
        self.blobs.clear();
        Ok(())
    }
}

/// File-per-tile store under one directory. Filenames are derived from
/// the key; ages come from the blob headers, so no extra index file is
/// needed.
pub struct FsTileStore {
    root: PathBuf,
}

impl FsTileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, EngineError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| EngineError::CacheBackend(format!("create {root:?}: {e}")))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &TileKey) -> PathBuf {
        let c = key.coord;
        self.root
            .join(format!("t{}_{}_{}_{}.af", c.level, c.x, c.y, key.max_iter))
    }

    fn tile_files(&self) -> Result<Vec<PathBuf>, EngineError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| EngineError::CacheBackend(format!("read_dir: {e}")))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::CacheBackend(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("af") {
                out.push(path);
            }
        }
        Ok(out)
    }
}

impl TileStore for FsTileStore {
    fn get(&mut self, key: &TileKey) -> Result<Option<Vec<u8>>, EngineError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::CacheBackend(e.to_string())),
        }
    }

    fn put(&mut self, key: &TileKey, blob: &[u8]) -> Result<(), EngineError> {
        fs::write(self.path_for(key), blob).map_err(|e| EngineError::CacheBackend(e.to_string()))
    }

    fn delete(&mut self, key: &TileKey) -> Result<(), EngineError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::CacheBackend(e.to_string())),
        }
    }

    fn count(&mut self) -> Result<usize, EngineError> {
        Ok(self.tile_files()?.len())
    }

    fn total_bytes(&mut self) -> Result<u64, EngineError> {
        let mut total = 0u64;
        for path in self.tile_files()? {
            if let Ok(meta) = fs::metadata(&path) {
                total += meta.len();
            }
        }
        Ok(total)
    }

    fn iter_oldest_k(&mut self, k: usize) -> Result<Vec<TileKey>, EngineError> {
        let mut aged = Vec::new();
        for path in self.tile_files()? {
            let mut header = [0u8; HEADER_BYTES];
            let readable = fs::File::open(&path)
                .and_then(|mut f| f.read_exact(&mut header))
                .is_ok();
            if !readable {
                continue;
            }
            if let Some((key, stored_at)) = stored_at_of(&header) {
                aged.push((stored_at, key));
            }
        }
        aged.sort_unstable_by_key(|(at, _)| *at);
        Ok(aged.into_iter().take(k).map(|(_, key)| key).collect())
    }

    fn clear(&mut self) -> Result<(), EngineError> {
        for path in self.tile_files()? {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

/// Commands accepted by the store thread.
#[derive(Debug)]
pub enum StoreCommand {
    Get(TileKey),
    Put(TileKey, Vec<u8>),
    Delete(TileKey),
    Clear,
    Cleanup { max_count: usize, max_bytes: u64 },
}

/// Completions reported back to the coordinator.
#[derive(Debug)]
pub enum StoreEvent {
    Hit { key: TileKey, blob: Vec<u8> },
    Miss { key: TileKey },
    Fault(String),
    CleanupDone { removed: usize },
}

/// Handle to the background store thread. Dropping it closes the
/// command channel and joins the thread.
pub struct StoreHandle {
    tx: Option<Sender<StoreCommand>>,
    join: Option<JoinHandle<()>>,
}

impl StoreHandle {
    pub fn spawn(mut store: Box<dyn TileStore>, events: Sender<StoreEvent>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<StoreCommand>();
        let join = std::thread::Builder::new()
            .name("abyssal-store".into())
            .spawn(move || {
                while let Ok(cmd) = rx.recv() {
                    let outcome = run_command(store.as_mut(), cmd);
                    match outcome {
                        Ok(Some(event)) => {
                            let _ = events.send(event);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            let _ = events.send(StoreEvent::Fault(err.to_string()));
                        }
                    }
                }
            })
            .expect("spawn store thread");
        Self {
            tx: Some(tx),
            join: Some(join),
        }
    }

    pub fn send(&self, cmd: StoreCommand) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(cmd);
        }
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.tx = None;
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_command(
    store: &mut dyn TileStore,
    cmd: StoreCommand,
) -> Result<Option<StoreEvent>, EngineError> {
    match cmd {
        StoreCommand::Get(key) => Ok(Some(match store.get(&key)? {
            Some(blob) => StoreEvent::Hit { key, blob },
            None => StoreEvent::Miss { key },
        })),
        StoreCommand::Put(key, blob) => {
            store.put(&key, &blob)?;
            Ok(None)
        }
        StoreCommand::Delete(key) => {
            store.delete(&key)?;
            Ok(None)
        }
        StoreCommand::Clear => {
            store.clear()?;
            Ok(None)
        }
        StoreCommand::Cleanup {
            max_count,
            max_bytes,
        } => {
            let removed = cleanup(store, max_count, max_bytes)?;
            if removed > 0 {
                warn!("L3 cleanup removed {removed} tiles");
            }
            Ok(Some(StoreEvent::CleanupDone { removed }))
        }
    }
}

/// Prune oldest records until count and bytes sit within 80% of caps.
fn cleanup(
    store: &mut dyn TileStore,
    max_count: usize,
    max_bytes: u64,
) -> Result<usize, EngineError> {
    let target_count = (max_count as u64 * CLEANUP_TARGET_NUM / CLEANUP_TARGET_DEN) as usize;
    let target_bytes = max_bytes * CLEANUP_TARGET_NUM / CLEANUP_TARGET_DEN;
    let mut removed = 0usize;
    loop {
        let count = store.count()?;
        let bytes = store.total_bytes()?;
        let over_count = count > max_count;
        let over_bytes = bytes > max_bytes;
        let pruning = removed > 0;
        let within = (!pruning && !over_count && !over_bytes)
            || (pruning && count <= target_count && bytes <= target_bytes);
        if within || count == 0 {
            return Ok(removed);
        }
        let victims = store.iter_oldest_k(CLEANUP_BATCH)?;
        if victims.is_empty() {
            return Ok(removed);
        }
        for key in victims {
            store.delete(&key)?;
            removed += 1;
        }
    }
}
