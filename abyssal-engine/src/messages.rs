//! Messages exchanged between the coordinator and compute workers.
//!
//! Inbound messages carry tile parameters plus a shared read-only
//! reference orbit; outbound messages carry completed pixel buffers.
//! Failures travel as typed results inside these messages, never as
//! panics across the thread boundary.

use crate::cancellation::CancelToken;
use crate::reference_orbit::ReferenceOrbit;
use crate::tile_render::TileRenderInput;
use abyssal_core::{Tier, TileKey};
use std::sync::Arc;

/// Scheduling class of a job. Visible jobs always scan ahead of
/// prefetch jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    Visible,
    Prefetch,
}

/// One dispatched tile job.
#[derive(Clone, Debug)]
pub struct TileJob {
    pub job_id: u64,
    pub key: TileKey,
    pub priority: JobPriority,
    pub input: TileRenderInput,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub enum WorkerRequest {
    Render(Box<TileJob>),
    ComputeOrbit {
        job_id: u64,
        center_re: String,
        center_im: String,
        scale: f64,
        max_iter: u32,
        limbs: usize,
    },
    Shutdown,
}

#[derive(Debug)]
pub enum WorkerResponse {
    Progress {
        job_id: u64,
        rows_done: u32,
    },
    TileComplete {
        job_id: u64,
        key: TileKey,
        tier: Tier,
        pixels: Vec<f32>,
        glitched_px: u32,
        render_time_ms: f32,
    },
    TileCancelled {
        job_id: u64,
        key: TileKey,
    },
    TileError {
        job_id: u64,
        key: TileKey,
        message: String,
    },
    OrbitComplete {
        job_id: u64,
        orbit: Arc<ReferenceOrbit>,
        compute_time_ms: f32,
    },
    OrbitError {
        job_id: u64,
        message: String,
    },
}
