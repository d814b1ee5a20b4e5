//! The coordinator: top-level control loop.
//!
//! Owns the caches, pipeline, predictor, reprojector, compositor and
//! worker pool; there are no process-level globals. Viewport changes
//! flow in through [`Coordinator::set_viewport`]; [`Coordinator::pump`]
//! runs one scheduling turn (drain results, dispatch jobs, manage the
//! reference orbit, settle). The host reads frames and stats back out.

use crate::cache::l3::{decode_tile, StoreEvent, TileStore};
use crate::cache::ThreeTierCache;
use crate::compositor::Compositor;
use crate::messages::{JobPriority, TileJob, WorkerRequest, WorkerResponse};
use crate::palette::Palette;
use crate::pipeline::TilePipeline;
use crate::predictor::ViewportPredictor;
use crate::prefetch;
use crate::reference_orbit::ReferenceOrbit;
use crate::reproject::{Reprojector, OUT_OF_BOUNDS_RGBA};
use crate::stats::{CacheBytes, EngineStats, StatsTracker, TileCounts};
use crate::tile_render::TileRenderInput;
use crate::worker::WorkerPool;
use abyssal_core::{
    level_for_scale, limbs_for_scale, visible_coords, EngineConfig, EngineError,
    PrecisionSelector, Tier, Tile, TileKey, TileStatus, Viewport, MIN_SCALE,
};
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// L3 cleanup cadence, ~5 minutes.
const CLEANUP_INTERVAL_MS: f64 = 300_000.0;
/// One reference-orbit retry before giving up on the deep tiers.
const MAX_ORBIT_FAILURES: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    DirtyReprojecting,
    DirtyComputing,
    Settled,
}

pub struct Coordinator {
    config: EngineConfig,
    viewport: Option<Viewport>,
    state: EngineState,
    tier: Tier,
    level: u16,
    visible: Vec<TileKey>,

    selector: PrecisionSelector,
    pipeline: TilePipeline,
    caches: ThreeTierCache,
    predictor: ViewportPredictor,
    reprojector: Reprojector,
    compositor: Compositor,

    pool: WorkerPool,
    result_rx: Receiver<WorkerResponse>,

    orbit: Option<Arc<ReferenceOrbit>>,
    orbit_pending: Option<u64>,
    orbit_job_seq: u64,
    orbit_failures: u32,
    orbit_tiles_served: u64,

    stats: StatsTracker,
    precision_exhausted: bool,
    last_cleanup_ms: f64,
    epoch: Instant,
}

impl Coordinator {
    pub fn new(
        config: EngineConfig,
        store: Option<Box<dyn TileStore>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let pool = WorkerPool::new(config.worker_threads(), result_tx);
        let caches = ThreeTierCache::new(&config, store);
        Ok(Self {
            selector: PrecisionSelector::new(config.thresholds(), config.mode_change_cooldown_ms),
            pipeline: TilePipeline::new(config.max_concurrent_renders),
            caches,
            predictor: ViewportPredictor::new(),
            reprojector: Reprojector::new(),
            compositor: Compositor::new(1, 1),
            pool,
            result_rx,
            viewport: None,
            state: EngineState::Idle,
            tier: Tier::Standard,
            level: 0,
            visible: Vec::new(),
            orbit: None,
            orbit_pending: None,
            orbit_job_seq: 0,
            orbit_failures: 0,
            orbit_tiles_served: 0,
            stats: StatsTracker::new(),
            precision_exhausted: false,
            last_cleanup_ms: 0.0,
            epoch: Instant::now(),
            config,
        })
    }

    fn now_ms(&self) -> f64 {
        self.epoch_elapsed().as_secs_f64() * 1000.0
    }

    fn epoch_elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    pub fn current_tier(&self) -> Tier {
        self.tier
    }

    /// The host's single input: a new view request. High-precision
    /// coordinates arrive as decimal strings.
    pub fn set_viewport(
        &mut self,
        center_re: &str,
        center_im: &str,
        scale: f64,
        max_iter: u32,
        width: u32,
        height: u32,
    ) -> Result<(), EngineError> {
        let vp = Viewport::new(center_re, center_im, scale, max_iter, width, height)?;
        let now = self.now_ms();

        let (cx, cy) = vp.center_f64();
        self.predictor.update(cx, cy, vp.scale, now);
        if self.predictor.has_direction_changed() {
            let dropped = self.pipeline.cancel_pending_prefetch();
            if dropped > 0 {
                self.stats.prefetch_cancelled += dropped as u64;
                debug!("direction reversal: dropped {dropped} pending prefetch jobs");
            }
        }

        self.tier = self.selector.select(vp.scale, now);
        self.precision_exhausted = vp.scale < MIN_SCALE;
        if self.precision_exhausted {
            warn!(
                "{}",
                EngineError::PrecisionExhausted { scale: vp.scale }
            );
        }

        // Base layer first: warp the previous frame where it helps.
        self.compositor.resize(width, height);
        if self.reprojector.should_reproject(&vp) {
            let (comp, reproj) = (&mut self.compositor, &self.reprojector);
            reproj.reproject(&vp, comp.frame_mut());
        } else {
            self.compositor.fill(OUT_OF_BOUNDS_RGBA);
        }
        self.stats.record_frame(now);

        self.level = level_for_scale(vp.scale, width.min(height), self.config.tile_size);
        self.visible = visible_coords(&vp, self.level)
            .into_iter()
            .map(|c| TileKey::new(c, max_iter))
            .collect();

        self.refresh_orbit(&vp);

        // Request path: L2 hits surface immediately; everything else
        // queues, with an async L3 lookup holding dispatch.
        let wanted: HashSet<TileKey> = self.visible.iter().copied().collect();
        self.pipeline.retain_wanted(&wanted);
        for key in self.visible.clone() {
            if let Some(tile) = self.caches.get_l2(&key) {
                self.compositor.draw_tile(&vp, &tile, &mut self.caches.l1);
                continue;
            }
            if self.pipeline.is_queued(&key) || self.pipeline.is_rendering(&key) {
                continue;
            }
            let awaiting = !self.pipeline.is_awaiting_l3(&key) && self.caches.request_l3(key);
            self.pipeline
                .enqueue(key, self.tier, JobPriority::Visible, awaiting);
        }

        self.plan_prefetch(&vp, now);

        self.state = EngineState::DirtyReprojecting;
        self.viewport = Some(vp);
        Ok(())
    }

    /// One scheduling turn. Non-blocking; the host calls this every
    /// frame (or spins it from [`Self::run_until_settled`]).
    pub fn pump(&mut self) {
        let Some(vp) = self.viewport.clone() else {
            return;
        };
        let now = self.now_ms();

        self.drain_store_events(&vp);
        self.drain_worker_responses(&vp, now);
        self.dispatch_jobs(&vp);

        if now - self.last_cleanup_ms > CLEANUP_INTERVAL_MS {
            self.caches.request_cleanup();
            self.last_cleanup_ms = now;
        }

        self.check_settled(&vp, now);
    }

    /// Spin the pump until the visible set settles or the timeout
    /// passes. Returns true when settled.
    pub fn run_until_settled(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if self.state == EngineState::Settled || self.state == EngineState::Idle {
                return self.state == EngineState::Settled;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Current composited framebuffer, RGBA8, width × height.
    pub fn get_frame(&self) -> &[u8] {
        self.compositor.frame()
    }

    pub fn get_stats(&self) -> EngineStats {
        let complete = self
            .visible
            .iter()
            .filter(|key| self.caches.contains_l2(*key))
            .count();
        EngineStats {
            fps: self.stats.fps(self.now_ms()),
            avg_render_time_ms: self.stats.avg_render_time_ms(),
            precision_tier: self.tier.name(),
            tile_counts: TileCounts {
                pending: self.pipeline.queued_len(),
                rendering: self.pipeline.rendering_len(),
                complete,
                error: self.pipeline.error_len(),
            },
            cache_bytes: CacheBytes {
                l1: self.caches.l1_bytes(),
                l2: self.caches.l2_bytes(),
            },
            orbit_tiles_served: self.orbit_tiles_served,
            orbits_computed: self.stats.orbits_computed,
            jobs_dispatched: self.stats.jobs_dispatched,
            l3_hits: self.stats.l3_hits,
            prefetch_cancelled: self.stats.prefetch_cancelled,
            l3_available: self.caches.l3_available(),
            precision_exhausted: self.precision_exhausted,
        }
    }

    /// Completed tiles of the current visible set, for hosts that want
    /// the raw iteration data (screenshots, analysis, tests).
    pub fn visible_complete_tiles(&mut self) -> Vec<Arc<Tile>> {
        self.visible
            .clone()
            .iter()
            .filter_map(|key| self.caches.get_l2(key))
            .collect()
    }

    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    pub fn pending_prefetch_len(&self) -> usize {
        self.pipeline.queued_prefetch_len()
    }

    /// Drop the texture tier only.
    pub fn clear_l1_cache(&mut self) {
        self.caches.clear_l1();
    }

    pub fn set_palette(&mut self, palette: Palette) {
        self.compositor.set_palette(palette);
        let Some(vp) = self.viewport.clone() else {
            return;
        };
        for key in self.visible.clone() {
            if let Some(tile) = self.caches.get_l2(&key) {
                self.compositor.draw_tile(&vp, &tile, &mut self.caches.l1);
            }
        }
    }

    /// Clear cascades L1 → L2 → L3 (L3 only when asked).
    pub fn clear_caches(&mut self, include_l3: bool) {
        self.caches.clear(include_l3);
    }

    /// Drop L1 + L2 but keep the persistent tier, the "reload" path.
    pub fn clear_memory_caches(&mut self) {
        self.caches.clear_l1();
        self.caches.clear_l2();
    }

    fn refresh_orbit(&mut self, vp: &Viewport) {
        if !self.tier.needs_orbit() {
            return;
        }
        let stale = match &self.orbit {
            Some(orbit) => orbit.is_stale_for(vp),
            None => true,
        };
        if !stale {
            return;
        }
        self.orbit = None;
        self.orbit_failures = 0;
        self.submit_orbit_job(vp);
    }

    fn submit_orbit_job(&mut self, vp: &Viewport) {
        self.orbit_job_seq += 1;
        let job_id = self.orbit_job_seq;
        self.orbit_pending = Some(job_id);
        self.pool.submit(WorkerRequest::ComputeOrbit {
            job_id,
            center_re: vp.center_re.clone(),
            center_im: vp.center_im.clone(),
            scale: vp.scale,
            max_iter: vp.max_iter,
            limbs: limbs_for_scale(vp.scale),
        });
    }

    fn drain_store_events(&mut self, vp: &Viewport) {
        for event in self.caches.drain_store_events() {
            match event {
                StoreEvent::Hit { key, blob } => {
                    self.pipeline.mark_l3_resolved(&key);
                    match decode_tile(&blob) {
                        Ok(tile) => {
                            let tile = Arc::new(tile);
                            self.caches.admit_from_l3(Arc::clone(&tile));
                            self.pipeline.remove_pending(&key);
                            self.stats.l3_hits += 1;
                            if self.is_visible(&key) {
                                self.compositor.draw_tile(vp, &tile, &mut self.caches.l1);
                            }
                        }
                        Err(err) => {
                            warn!("corrupt L3 blob for {:?}: {err}", key.coord);
                        }
                    }
                }
                StoreEvent::Miss { key } => {
                    self.pipeline.mark_l3_resolved(&key);
                }
                StoreEvent::Fault(_) => {
                    // The broken latch is already set; unblock any tiles
                    // that were waiting on answers that will never come.
                    for key in self.visible.clone() {
                        self.pipeline.mark_l3_resolved(&key);
                    }
                }
                StoreEvent::CleanupDone { removed } => {
                    if removed > 0 {
                        debug!("L3 cleanup removed {removed} tiles");
                    }
                }
            }
        }
    }

    fn drain_worker_responses(&mut self, vp: &Viewport, now: f64) {
        let responses: Vec<WorkerResponse> = self.result_rx.try_iter().collect();
        for response in responses {
            match response {
                WorkerResponse::Progress { .. } => {}
                WorkerResponse::TileComplete {
                    job_id,
                    key,
                    tier,
                    pixels,
                    glitched_px,
                    render_time_ms,
                } => {
                    self.pipeline.complete(job_id);
                    if pixels.iter().all(|&mu| mu < 0.0) {
                        warn!(
                            "all-interior tile at level {} ({}, {})",
                            key.coord.level, key.coord.x, key.coord.y
                        );
                    }
                    if glitched_px > 0 {
                        warn!(
                            "{glitched_px} glitched pixels at level {} ({}, {}); reference recompute recommended",
                            key.coord.level, key.coord.x, key.coord.y
                        );
                    }
                    let tile = Arc::new(Tile {
                        key,
                        precision: tier,
                        width_px: self.config.tile_size as u16,
                        pixels,
                        status: TileStatus::Complete,
                        last_accessed_ms: now as u64,
                        render_time_ms,
                        glitched_px,
                    });
                    self.caches.store_complete(Arc::clone(&tile), now as u64);
                    if tier.needs_orbit() {
                        self.orbit_tiles_served += 1;
                    }
                    self.stats.record_render(render_time_ms);
                    if self.is_visible(&key) {
                        self.compositor.draw_tile(vp, &tile, &mut self.caches.l1);
                    }
                }
                WorkerResponse::TileCancelled { job_id, .. } => {
                    self.pipeline.cancelled(job_id);
                }
                WorkerResponse::TileError {
                    job_id,
                    key,
                    message,
                } => {
                    warn!("tile render error at {:?}: {message}", key.coord);
                    if let Some((_, requeued)) = self.pipeline.failed(job_id) {
                        if !requeued && self.is_visible(&key) {
                            self.compositor.draw_error_tile(vp, key.coord);
                        }
                    }
                }
                WorkerResponse::OrbitComplete {
                    job_id,
                    orbit,
                    compute_time_ms,
                } => {
                    if self.orbit_pending == Some(job_id) {
                        self.orbit_pending = None;
                        self.orbit_failures = 0;
                        self.stats.orbits_computed += 1;
                        info!(
                            "reference orbit ready: {} iterations in {compute_time_ms:.0}ms",
                            orbit.iterations()
                        );
                        self.orbit = Some(orbit);
                    }
                }
                WorkerResponse::OrbitError { job_id, message } => {
                    if self.orbit_pending == Some(job_id) {
                        self.orbit_pending = None;
                        self.orbit_failures += 1;
                        warn!("reference orbit failed ({}/{MAX_ORBIT_FAILURES}): {message}",
                            self.orbit_failures);
                        if self.orbit_failures < MAX_ORBIT_FAILURES {
                            if let Some(vp) = self.viewport.clone() {
                                self.submit_orbit_job(&vp);
                            }
                        }
                    }
                }
            }
        }
    }

    fn dispatch_jobs(&mut self, vp: &Viewport) {
        // Perturbation jobs wait for their orbit; once the orbit has
        // conclusively failed, give up on them so the frame can settle.
        let orbit_ready = self.orbit.is_some();
        if !orbit_ready && self.orbit_pending.is_none() && self.orbit_failures >= MAX_ORBIT_FAILURES
        {
            for key in self.pipeline.fail_orbit_jobs() {
                if self.is_visible(&key) {
                    self.compositor.draw_error_tile(vp, key.coord);
                }
            }
        }
        while self.pipeline.can_dispatch() {
            let Some((job_id, queued, cancel)) = self.pipeline.next_job(orbit_ready) else {
                break;
            };
            let input = TileRenderInput {
                coord: queued.key.coord,
                tile_size: self.config.tile_size,
                max_iter: queued.key.max_iter,
                tier: queued.tier,
                escape_radius_sq: self.config.escape_radius_sq(),
                glitch_epsilon: self.config.glitch_epsilon,
                limbs: limbs_for_scale(vp.scale),
                orbit: if queued.tier.needs_orbit() {
                    self.orbit.clone()
                } else {
                    None
                },
            };
            self.stats.jobs_dispatched += 1;
            self.pool.submit(WorkerRequest::Render(Box::new(TileJob {
                job_id,
                key: queued.key,
                priority: queued.priority,
                input,
                cancel,
            })));
            if self.state == EngineState::DirtyReprojecting {
                self.state = EngineState::DirtyComputing;
            }
        }
    }

    fn check_settled(&mut self, vp: &Viewport, now: f64) {
        if !matches!(
            self.state,
            EngineState::DirtyReprojecting | EngineState::DirtyComputing
        ) {
            return;
        }
        let satisfied = self
            .visible
            .iter()
            .all(|key| self.caches.contains_l2(key) || self.pipeline.gave_up_on(key));
        if satisfied && !self.pipeline.has_visible_work() {
            self.state = EngineState::Settled;
            self.reprojector.save(self.compositor.frame(), vp);
            self.stats.record_frame(now);
            debug!(
                "settled: {} visible tiles, tier {}",
                self.visible.len(),
                self.tier.name()
            );
            // With the visible set done, hand the idle time to the
            // prefetcher (ring or predicted strategy once interaction
            // times out).
            self.plan_prefetch(vp, now);
        }
    }

    fn plan_prefetch(&mut self, vp: &Viewport, now: f64) {
        if !self.config.prefetch_enabled {
            return;
        }
        let coords: Vec<_> = self.visible.iter().map(|k| k.coord).collect();
        let (_strategy, plan) =
            prefetch::plan(&coords, vp, &self.predictor, now, self.config.tile_size);
        for coord in plan {
            let key = TileKey::new(coord, vp.max_iter);
            if self.caches.contains_l2(&key) {
                continue;
            }
            self.pipeline
                .enqueue(key, self.tier, JobPriority::Prefetch, false);
        }
    }

    fn is_visible(&self, key: &TileKey) -> bool {
        self.visible.contains(key)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(EngineConfig::default(), None).expect("default config is valid")
    }
}
