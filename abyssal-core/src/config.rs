//! Engine configuration: recognized options and validation.

use crate::{EngineError, TierThresholds};
use serde::{Deserialize, Serialize};

/// Tunables recognized by the engine. Unspecified fields take the
/// defaults below; `validate` rejects out-of-range combinations
/// synchronously before anything is spawned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pixels per tile edge. Must be a power of two.
    pub tile_size: u32,
    /// L1 (texture) cache capacity in tiles.
    pub l1_cache_tiles: usize,
    /// L2 (in-memory LRU) capacity in tiles.
    pub l2_cache_tiles: usize,
    /// L3 (persistent store) record cap.
    pub l3_cache_tiles: usize,
    /// L3 aggregate byte budget.
    pub l3_bytes_cap: u64,
    /// Worker thread override; default is max(2, cores − 1).
    pub worker_count: Option<usize>,
    /// Concurrent render dispatch gate.
    pub max_concurrent_renders: usize,
    /// Inner-loop escape radius (squared internally).
    pub escape_radius: f64,
    /// Tier switch scales.
    pub dd_threshold: f64,
    pub perturbation_threshold: f64,
    pub arbitrary_threshold: f64,
    /// Tier hysteresis window.
    pub mode_change_cooldown_ms: f64,
    /// Pauldelbrot glitch criterion ε (|Z|² < ε·|δ|²).
    pub glitch_epsilon: f64,
    pub prefetch_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            l1_cache_tiles: 64,
            l2_cache_tiles: 256,
            l3_cache_tiles: 2048,
            l3_bytes_cap: 500 * 1024 * 1024,
            worker_count: None,
            max_concurrent_renders: 4,
            escape_radius: 2.0,
            dd_threshold: 5e-6,
            perturbation_threshold: 1e-10,
            arbitrary_threshold: 1e-14,
            mode_change_cooldown_ms: 100.0,
            glitch_epsilon: 1e-4,
            prefetch_enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.tile_size.is_power_of_two() || self.tile_size < 16 || self.tile_size > 4096 {
            return Err(EngineError::config(format!(
                "tile_size must be a power of two in [16, 4096], got {}",
                self.tile_size
            )));
        }
        if self.l1_cache_tiles == 0 || self.l2_cache_tiles == 0 || self.l3_cache_tiles == 0 {
            return Err(EngineError::config("cache capacities must be non-zero"));
        }
        if self.max_concurrent_renders == 0 {
            return Err(EngineError::config("max_concurrent_renders must be >= 1"));
        }
        if self.worker_count == Some(0) {
            return Err(EngineError::config("worker_count must be >= 1"));
        }
        if !(self.escape_radius.is_finite() && self.escape_radius >= 2.0) {
            return Err(EngineError::config(format!(
                "escape_radius must be >= 2, got {}",
                self.escape_radius
            )));
        }
        let ordered = self.dd_threshold > self.perturbation_threshold
            && self.perturbation_threshold > self.arbitrary_threshold
            && self.arbitrary_threshold > 0.0;
        if !ordered {
            return Err(EngineError::config(
                "tier thresholds must satisfy dd > perturbation > arbitrary > 0",
            ));
        }
        if !(self.glitch_epsilon > 0.0 && self.glitch_epsilon < 1.0) {
            return Err(EngineError::config(format!(
                "glitch_epsilon must be in (0, 1), got {}",
                self.glitch_epsilon
            )));
        }
        if self.mode_change_cooldown_ms < 0.0 {
            return Err(EngineError::config("mode_change_cooldown_ms must be >= 0"));
        }
        Ok(())
    }

    pub fn escape_radius_sq(&self) -> f64 {
        self.escape_radius * self.escape_radius
    }

    pub fn thresholds(&self) -> TierThresholds {
        TierThresholds {
            dd: self.dd_threshold,
            perturbation: self.perturbation_threshold,
            arbitrary: self.arbitrary_threshold,
        }
    }

    /// Worker pool size: the override, or max(2, cores − 1).
    pub fn worker_threads(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            cores.saturating_sub(1).max(2)
        })
    }

    pub fn tile_pixels(&self) -> usize {
        (self.tile_size * self.tile_size) as usize
    }
}
