//! Tile rendering: the per-tier pixel loops over one tile's grid.
//!
//! Pixels are written in scan order, row 0 at the top (highest
//! imaginary part). Cancellation is checked every [`ROWS_PER_CHECK`]
//! rows; a cancelled tile returns no buffer.

use crate::cancellation::{CancelToken, ROWS_PER_CHECK};
use crate::direct::{iterate_dd, iterate_f64};
use crate::perturbation::iterate_delta;
use crate::reference_orbit::ReferenceOrbit;
use abyssal_core::{BigFixed, DdComplex, DoubleDouble, EngineError, Tier, TileCoord};
use std::sync::Arc;

/// Everything a worker needs to render one tile.
#[derive(Clone, Debug)]
pub struct TileRenderInput {
    pub coord: TileCoord,
    pub tile_size: u32,
    pub max_iter: u32,
    pub tier: Tier,
    pub escape_radius_sq: f64,
    pub glitch_epsilon: f64,
    /// Fixed-point size for delta-origin arithmetic on the deep tiers.
    pub limbs: usize,
    /// Shared reference orbit; required for the perturbation tiers.
    pub orbit: Option<Arc<ReferenceOrbit>>,
}

#[derive(Debug)]
pub enum RenderOutcome {
    Complete { pixels: Vec<f32>, glitched_px: u32 },
    Cancelled,
}

pub fn render_tile(
    input: &TileRenderInput,
    cancel: &CancelToken,
    on_rows: &mut dyn FnMut(u32),
) -> Result<RenderOutcome, EngineError> {
    match input.tier {
        Tier::Standard => render_standard(input, cancel, on_rows),
        Tier::DoubleDouble => render_dd(input, cancel, on_rows),
        Tier::Perturbation | Tier::Arbitrary => render_perturbation(input, cancel, on_rows),
    }
}

fn at_row_boundary(j: u32, cancel: &CancelToken, on_rows: &mut dyn FnMut(u32)) -> bool {
    if j % ROWS_PER_CHECK == 0 {
        if cancel.is_cancelled() {
            return true;
        }
        if j > 0 {
            on_rows(j);
        }
    }
    false
}

fn render_standard(
    input: &TileRenderInput,
    cancel: &CancelToken,
    on_rows: &mut dyn FnMut(u32),
) -> Result<RenderOutcome, EngineError> {
    let ts = input.tile_size;
    let s = TileCoord::span(input.coord.level);
    let (ox, oy) = input.coord.origin();
    let step = s / ts as f64;

    let mut pixels = Vec::with_capacity((ts * ts) as usize);
    for j in 0..ts {
        if at_row_boundary(j, cancel, on_rows) {
            return Ok(RenderOutcome::Cancelled);
        }
        let im = oy + s - (j as f64 + 0.5) * step;
        for i in 0..ts {
            let re = ox + (i as f64 + 0.5) * step;
            pixels.push(iterate_f64(re, im, input.max_iter, input.escape_radius_sq));
        }
    }
    Ok(RenderOutcome::Complete {
        pixels,
        glitched_px: 0,
    })
}

fn render_dd(
    input: &TileRenderInput,
    cancel: &CancelToken,
    on_rows: &mut dyn FnMut(u32),
) -> Result<RenderOutcome, EngineError> {
    let ts = input.tile_size;
    let s = TileCoord::span(input.coord.level);
    let (ox, oy) = input.coord.origin();
    let step = s / ts as f64;
    let step_dd = DoubleDouble::from_f64(step);
    let origin_re = DoubleDouble::from_f64(ox);
    let top_im = DoubleDouble::from_f64(oy + s);

    let mut pixels = Vec::with_capacity((ts * ts) as usize);
    for j in 0..ts {
        if at_row_boundary(j, cancel, on_rows) {
            return Ok(RenderOutcome::Cancelled);
        }
        let im = top_im.sub(step_dd.mul_f64(j as f64 + 0.5));
        for i in 0..ts {
            let re = origin_re.add(step_dd.mul_f64(i as f64 + 0.5));
            pixels.push(iterate_dd(
                DdComplex::new(re, im),
                input.max_iter,
                input.escape_radius_sq,
            ));
        }
    }
    Ok(RenderOutcome::Complete {
        pixels,
        glitched_px: 0,
    })
}

fn render_perturbation(
    input: &TileRenderInput,
    cancel: &CancelToken,
    on_rows: &mut dyn FnMut(u32),
) -> Result<RenderOutcome, EngineError> {
    let orbit = input
        .orbit
        .as_ref()
        .ok_or_else(|| EngineError::TileRender("perturbation job without reference orbit".into()))?;

    let ts = input.tile_size;
    let coord = input.coord;
    let s = TileCoord::span(coord.level);
    let step = s / ts as f64;

    // Delta at the tile origin, computed exactly: tile origins are
    // dyadic rationals, so the only rounding is the final to_f64 of the
    // (tiny) difference against the parsed reference center.
    let limbs = input.limbs;
    let cr = BigFixed::parse(&orbit.center_re, limbs)?;
    let ci = BigFixed::parse(&orbit.center_im, limbs)?;
    let exp = 2 - coord.level as i32;
    let origin_re = BigFixed::from_dyadic(coord.x, exp, limbs)
        .sub(&BigFixed::from_dyadic(3, -2, limbs));
    let origin_im = BigFixed::from_dyadic(coord.y, exp, limbs);
    let d0r = origin_re.sub(&cr).to_f64();
    let d0i = origin_im.sub(&ci).to_f64();

    let mut pixels = Vec::with_capacity((ts * ts) as usize);
    let mut glitched_px: u32 = 0;
    for j in 0..ts {
        if at_row_boundary(j, cancel, on_rows) {
            return Ok(RenderOutcome::Cancelled);
        }
        let dci = d0i + s - (j as f64 + 0.5) * step;
        for i in 0..ts {
            let dcr = d0r + (i as f64 + 0.5) * step;
            let out = iterate_delta(
                orbit,
                (dcr, dci),
                input.max_iter,
                input.escape_radius_sq,
                input.glitch_epsilon,
            );
            if out.glitched {
                glitched_px += 1;
            }
            pixels.push(out.smooth);
        }
    }
    Ok(RenderOutcome::Complete {
        pixels,
        glitched_px,
    })
}
