//! Perturbation inner loop: f64 delta orbits against a shared reference.
//!
//! Each pixel iterates δₙ₊₁ = 2·Zₙ·δₙ + δₙ² + δc at machine precision
//! while reading the reference samples. Glitches (the reference dipping
//! below the delta in magnitude) are detected with the Pauldelbrot
//! criterion and reported, not repaired; the remedy is a reference
//! recompute closer to the offending pixels.

use crate::reference_orbit::ReferenceOrbit;

/// Marker value for pixels that never escaped.
pub const INTERIOR: f32 = -1.0;

/// Outcome of one delta orbit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelOutcome {
    /// Smoothed escape count; −1 interior, 0 for glitched pixels.
    pub smooth: f32,
    pub glitched: bool,
}

impl PixelOutcome {
    fn escaped(n: u32, norm_sq: f64) -> Self {
        Self {
            smooth: smooth_escape(n, norm_sq),
            glitched: false,
        }
    }

    fn interior() -> Self {
        Self {
            smooth: INTERIOR,
            glitched: false,
        }
    }

    fn glitch() -> Self {
        Self {
            smooth: 0.0,
            glitched: true,
        }
    }
}

/// Fractional escape count with log-log smoothing:
/// max(0, n + 1 − log₂(log₂|r|)), from |r|² at the escape step.
pub fn smooth_escape(n: u32, norm_sq: f64) -> f32 {
    let ln2 = std::f64::consts::LN_2;
    let log_mag = 0.5 * norm_sq.ln();
    if log_mag <= 0.0 {
        return n as f32 + 1.0;
    }
    let nu = (log_mag / ln2).ln() / ln2;
    ((n as f64 + 1.0) - nu).max(0.0) as f32
}

/// Run one pixel's delta orbit.
///
/// `dc` is the pixel's offset from the reference center at f64. The
/// reference running out before the pixel resolves means the pixel's
/// true orbit left the reference branch, which reports as a glitch.
pub fn iterate_delta(
    orbit: &ReferenceOrbit,
    dc: (f64, f64),
    max_iter: u32,
    escape_radius_sq: f64,
    glitch_epsilon: f64,
) -> PixelOutcome {
    let mut dr = 0.0f64;
    let mut di = 0.0f64;
    let samples = orbit.orbit_re.len();

    for n in 0..max_iter {
        let idx = n as usize;
        if idx >= samples {
            return PixelOutcome::glitch();
        }
        let zr = orbit.orbit_re[idx];
        let zi = orbit.orbit_im[idx];

        let rr = zr + dr;
        let ri = zi + di;
        let r_norm = rr * rr + ri * ri;
        if r_norm > escape_radius_sq {
            return PixelOutcome::escaped(n, r_norm);
        }

        let z_norm = zr * zr + zi * zi;
        let d_norm = dr * dr + di * di;
        if d_norm > 0.0 && z_norm < glitch_epsilon * d_norm {
            return PixelOutcome::glitch();
        }

        // δ ← 2·Z·δ + δ² + δc
        let two_zd_r = 2.0 * (zr * dr - zi * di);
        let two_zd_i = 2.0 * (zr * di + zi * dr);
        let d_sq_r = dr * dr - di * di;
        let d_sq_i = 2.0 * dr * di;
        dr = two_zd_r + d_sq_r + dc.0;
        di = two_zd_i + d_sq_i + dc.1;
    }

    PixelOutcome::interior()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direct::iterate_f64;
    use crate::reference_orbit::ReferenceOrbit;

    const EPS: f64 = 1e-4;

    fn orbit_at(re: &str, im: &str, max_iter: u32) -> ReferenceOrbit {
        ReferenceOrbit::compute(re, im, 1e-3, max_iter, 8).unwrap()
    }

    #[test]
    fn zero_delta_follows_the_reference() {
        // δc = 0 is the reference point itself: in set, never escapes.
        let orbit = orbit_at("-0.5", "0", 1000);
        let out = iterate_delta(&orbit, (0.0, 0.0), 1000, 4.0, EPS);
        assert_eq!(out.smooth, INTERIOR);
        assert!(!out.glitched);
    }

    #[test]
    fn far_delta_escapes_fast() {
        let orbit = orbit_at("-0.5", "0", 1000);
        // Reference −0.5 plus 2.5 puts the pixel at c = 2.
        let out = iterate_delta(&orbit, (2.5, 0.0), 1000, 4.0, EPS);
        assert!(!out.glitched);
        assert!(out.smooth >= 0.0 && out.smooth < 4.0, "smooth {}", out.smooth);
    }

    #[test]
    fn matches_direct_iteration_within_half_step() {
        let orbit = orbit_at("-0.75", "0.1", 2000);
        for (ddr, ddi) in [
            (1e-3, 0.0),
            (-2e-3, 1e-3),
            (5e-4, -5e-4),
            (2e-2, 1e-2),
        ] {
            let perturbed = iterate_delta(&orbit, (ddr, ddi), 2000, 4.0, EPS);
            let direct = iterate_f64(-0.75 + ddr, 0.1 + ddi, 2000, 4.0);
            if perturbed.glitched {
                continue;
            }
            if perturbed.smooth < 0.0 || direct < 0.0 {
                assert_eq!(perturbed.smooth, direct, "interior mismatch at δ=({ddr},{ddi})");
            } else {
                assert!(
                    (perturbed.smooth - direct).abs() <= 0.5,
                    "smoothed count drift at δ=({ddr},{ddi}): {} vs {}",
                    perturbed.smooth,
                    direct
                );
            }
        }
    }

    #[test]
    fn smoothing_is_monotonic_in_escape_time() {
        // Same escape radius, later escape step → larger smoothed count.
        let a = smooth_escape(10, 100.0);
        let b = smooth_escape(11, 100.0);
        assert!(b > a);
        // Larger |r| at the same step → slightly smaller count.
        assert!(smooth_escape(10, 1e6) < smooth_escape(10, 16.1));
    }

    #[test]
    fn smooth_never_negative() {
        assert!(smooth_escape(0, 1e300) >= 0.0);
        assert!(smooth_escape(0, 4.1) >= 0.0);
    }

    #[test]
    fn exhausted_reference_reports_glitch() {
        // Reference escapes quickly; a pixel that stays bounded outlives it.
        let orbit = orbit_at("0.3", "0", 100);
        assert!(orbit.escape_iter.is_some());
        // δ puts the pixel at c = −0.5 (in the set) against a dead reference.
        let out = iterate_delta(&orbit, (-0.8, 0.0), 5000, 4.0, EPS);
        assert!(out.glitched);
        assert_eq!(out.smooth, 0.0);
    }

    #[test]
    fn glitch_flags_reference_dipping_below_delta() {
        // Reference at a period-2 superattractive point passes through
        // z ≈ 0 every other step; a sizable delta then dominates.
        let orbit = orbit_at("-1", "0", 1000);
        let out = iterate_delta(&orbit, (0.3, 0.2), 1000, 4.0, EPS);
        // Either the pixel escapes before the dip or the dip flags it.
        if !out.glitched {
            assert!(out.smooth >= 0.0);
        } else {
            assert_eq!(out.smooth, 0.0);
        }
    }
}
