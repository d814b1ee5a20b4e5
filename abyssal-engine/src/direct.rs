//! Direct per-pixel iteration for the shallow tiers.
//!
//! Standard f64 and double-double loops share the escape/smoothing
//! conventions of the perturbation kernel so tiles from different tiers
//! composite identically.

use crate::perturbation::{smooth_escape, INTERIOR};
use abyssal_core::{DdComplex, DoubleDouble};

/// Direct f64 escape iteration; returns the smoothed count or −1.
pub fn iterate_f64(cr: f64, ci: f64, max_iter: u32, escape_radius_sq: f64) -> f32 {
    let mut zr = 0.0f64;
    let mut zi = 0.0f64;
    for n in 0..max_iter {
        let norm = zr * zr + zi * zi;
        if norm > escape_radius_sq {
            return smooth_escape(n, norm);
        }
        let nr = zr * zr - zi * zi + cr;
        let ni = 2.0 * zr * zi + ci;
        zr = nr;
        zi = ni;
    }
    INTERIOR
}

/// Direct double-double escape iteration for the DD tier.
pub fn iterate_dd(c: DdComplex, max_iter: u32, escape_radius_sq: f64) -> f32 {
    let threshold = DoubleDouble::from_f64(escape_radius_sq);
    let mut z = DdComplex::ZERO;
    for n in 0..max_iter {
        let norm = z.norm_sqr();
        if norm > threshold {
            return smooth_escape(n, norm.to_f64());
        }
        z = z.sqr().add(c);
    }
    INTERIOR
}
