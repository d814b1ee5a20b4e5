//! Reference orbit: one high-precision Mandelbrot orbit per frame.
//!
//! The orbit is iterated in [`BigFixed`] and snapshotted to parallel f64
//! arrays, which is all the perturbation loop ever reads. Orbits are
//! replaced, never mutated; the coordinator swaps in a fresh one when
//! the staleness policy says so.

use abyssal_core::{BigFixed, EngineError, Viewport};

/// Escape radius² for reference orbits. Deliberately enormous (≈10¹⁶)
/// so the orbit keeps pre-escape samples for pixels that outlive the
/// reference by a few iterations.
pub const REF_ESCAPE_RADIUS_SQ: f64 = 1e16;

/// Largest |z|² the 4-integer-bit fixed-point format can still square
/// without overflow. Past this the orbit is far outside the set and the
/// escaping tail continues in plain f64 out to the reporting radius.
const FIXED_SAFE_NORM_SQ: f64 = 9.0;

/// Center drift beyond this fraction of the scale forces a recompute.
const STALE_DRIFT_FRACTION: f64 = 0.10;

/// A computed reference orbit. `orbit_re[0] = orbit_im[0] = 0`;
/// `escape_iter`, when set, indexes the first sample past the escape
/// radius.
#[derive(Clone, Debug)]
pub struct ReferenceOrbit {
    pub center_re: String,
    pub center_im: String,
    /// Viewport scale at compute time, for the staleness policy.
    pub scale: f64,
    pub orbit_re: Vec<f64>,
    pub orbit_im: Vec<f64>,
    pub escape_iter: Option<u32>,
}

impl ReferenceOrbit {
    /// Iterate z ← z² + c at `limbs`-limb precision from the decimal
    /// center strings. Escape is tested before each multiply, keeping
    /// every intermediate inside the fixed-point range.
    pub fn compute(
        center_re: &str,
        center_im: &str,
        scale: f64,
        max_iter: u32,
        limbs: usize,
    ) -> Result<Self, EngineError> {
        let cr = BigFixed::parse(center_re, limbs)?;
        let ci = BigFixed::parse(center_im, limbs)?;

        let mut orbit_re = Vec::with_capacity(max_iter as usize + 1);
        let mut orbit_im = Vec::with_capacity(max_iter as usize + 1);
        orbit_re.push(0.0);
        orbit_im.push(0.0);

        let mut zr = BigFixed::zero(limbs);
        let mut zi = BigFixed::zero(limbs);
        let mut escape_iter = None;
        let mut i: u32 = 0;

        while i < max_iter {
            if BigFixed::escaped(&zr, &zi, FIXED_SAFE_NORM_SQ) {
                break;
            }
            let rr = zr.sqr();
            let ii = zi.sqr();
            let ri = zr.mul(&zi);
            zr = rr.sub(&ii).add(&cr);
            zi = ri.twice().add(&ci);
            orbit_re.push(zr.to_f64());
            orbit_im.push(zi.to_f64());
            i += 1;
        }

        // Escaping tail: the orbit left the fixed-point range, finish in
        // f64 until the reporting radius.
        if i < max_iter {
            let mut fr = zr.to_f64();
            let mut fi = zi.to_f64();
            let cr_f = cr.to_f64();
            let ci_f = ci.to_f64();
            if fr * fr + fi * fi > REF_ESCAPE_RADIUS_SQ {
                escape_iter = Some(i);
            } else {
                while i < max_iter {
                    let nr = fr * fr - fi * fi + cr_f;
                    let ni = 2.0 * fr * fi + ci_f;
                    fr = nr;
                    fi = ni;
                    orbit_re.push(fr);
                    orbit_im.push(fi);
                    i += 1;
                    if fr * fr + fi * fi > REF_ESCAPE_RADIUS_SQ {
                        escape_iter = Some(i);
                        break;
                    }
                }
            }
        }

        Ok(Self {
            center_re: center_re.trim().to_string(),
            center_im: center_im.trim().to_string(),
            scale,
            orbit_re,
            orbit_im,
            escape_iter,
        })
    }

    /// Number of iterations materialized (array length minus the z₀
    /// sample).
    pub fn iterations(&self) -> u32 {
        (self.orbit_re.len() - 1) as u32
    }

    /// Staleness policy consulted by the coordinator: the orbit must be
    /// replaced when the center has drifted more than 10% of the
    /// current scale, when the scale ratio leaves [0.5, 2.0], or when
    /// the center strings differ by less than f64 can resolve: that is
    /// the precision floor, and only a recompute can tell them apart.
    pub fn is_stale_for(&self, vp: &Viewport) -> bool {
        let ratio = vp.scale / self.scale;
        if !(0.5..=2.0).contains(&ratio) {
            return true;
        }
        if vp.center_re == self.center_re && vp.center_im == self.center_im {
            return false;
        }
        let (cx, cy) = vp.center_f64();
        let ox: f64 = self.center_re.parse().unwrap_or(0.0);
        let oy: f64 = self.center_im.parse().unwrap_or(0.0);
        let dx = cx - ox;
        let dy = cy - oy;
        if dx == 0.0 && dy == 0.0 {
            return true;
        }
        (dx * dx + dy * dy).sqrt() > STALE_DRIFT_FRACTION * vp.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_starts_at_origin() {
        let orbit = ReferenceOrbit::compute("-0.5", "0.1", 1.0, 100, 8).unwrap();
        assert_eq!(orbit.orbit_re[0], 0.0);
        assert_eq!(orbit.orbit_im[0], 0.0);
    }

    #[test]
    fn in_set_reference_never_escapes() {
        let orbit = ReferenceOrbit::compute("-0.5", "0", 1.0, 1000, 8).unwrap();
        assert_eq!(orbit.escape_iter, None);
        assert_eq!(orbit.iterations(), 1000);
        for (&x, &y) in orbit.orbit_re.iter().zip(&orbit.orbit_im) {
            assert!(x * x + y * y <= 4.0, "bounded orbit left radius 2");
        }
    }

    #[test]
    fn outside_reference_escapes_past_big_radius() {
        let orbit = ReferenceOrbit::compute("2", "0", 1.0, 1000, 8).unwrap();
        let esc = orbit.escape_iter.expect("c = 2 escapes");
        assert!(esc < 12, "escape_iter {esc}");
        // The flagged sample really is past the reporting radius.
        let i = esc as usize;
        let norm = orbit.orbit_re[i] * orbit.orbit_re[i] + orbit.orbit_im[i] * orbit.orbit_im[i];
        assert!(norm > REF_ESCAPE_RADIUS_SQ);
        // And its predecessor is not, so perturbation has pre-escape samples.
        let p = i - 1;
        let prev = orbit.orbit_re[p] * orbit.orbit_re[p] + orbit.orbit_im[p] * orbit.orbit_im[p];
        assert!(prev <= REF_ESCAPE_RADIUS_SQ);
    }

    #[test]
    fn orbit_satisfies_recurrence() {
        let orbit = ReferenceOrbit::compute("-0.5", "0.1", 1.0, 200, 8).unwrap();
        let cx: f64 = -0.5;
        let cy: f64 = 0.1;
        for n in 0..orbit.iterations() as usize {
            let (xn, yn) = (orbit.orbit_re[n], orbit.orbit_im[n]);
            let (xn1, yn1) = (orbit.orbit_re[n + 1], orbit.orbit_im[n + 1]);
            assert!(
                (xn1 - (xn * xn - yn * yn + cx)).abs() < 1e-10,
                "re recurrence at n={n}"
            );
            assert!((yn1 - (2.0 * xn * yn + cy)).abs() < 1e-10, "im recurrence at n={n}");
        }
    }

    #[test]
    fn period_two_orbit_for_c_minus_one() {
        let orbit = ReferenceOrbit::compute("-1", "0", 1.0, 100, 8).unwrap();
        assert_eq!(orbit.escape_iter, None);
        assert_eq!(orbit.orbit_re[0], 0.0);
        assert!((orbit.orbit_re[1] + 1.0).abs() < 1e-14);
        assert!(orbit.orbit_re[2].abs() < 1e-14);
        assert!((orbit.orbit_re[3] + 1.0).abs() < 1e-14);
    }

    #[test]
    fn deep_center_digits_shape_the_orbit() {
        // The antenna tip: both strings collapse to -2.0 in f64, but
        // digit 25 decides bounded versus escaping. Only the
        // fixed-point parse can tell them apart.
        let inside = ReferenceOrbit::compute(
            "-1.9999999999999999999999999",
            "0",
            1e-12,
            2000,
            8,
        )
        .unwrap();
        let outside = ReferenceOrbit::compute(
            "-2.0000000000000000000000001",
            "0",
            1e-12,
            2000,
            8,
        )
        .unwrap();
        assert_eq!(inside.escape_iter, None);
        let esc = outside.escape_iter.expect("digit 25 pushes the orbit out");
        assert!(esc < 100, "escape_iter {esc}");
    }

    #[test]
    fn staleness_policy() {
        let orbit = ReferenceOrbit::compute("-0.5", "0", 1e-3, 500, 8).unwrap();

        let same = Viewport::new("-0.5", "0", 1e-3, 500, 800, 600).unwrap();
        assert!(!orbit.is_stale_for(&same));

        // Zooming in past 2x forces a recompute
        let zoomed = Viewport::new("-0.5", "0", 4e-4, 500, 800, 600).unwrap();
        assert!(orbit.is_stale_for(&zoomed));

        // Drift below 10% of scale is tolerated
        let nudged = Viewport::new("-0.50005", "0", 1e-3, 500, 800, 600).unwrap();
        assert!(!orbit.is_stale_for(&nudged));

        // Drift beyond 10% is not
        let panned = Viewport::new("-0.5002", "0", 1e-3, 500, 800, 600).unwrap();
        assert!(orbit.is_stale_for(&panned));
    }

    #[test]
    fn indistinguishable_strings_hit_the_precision_floor() {
        let orbit = ReferenceOrbit::compute("-0.74364388703715870475219150", "0.1", 1e-3, 100, 8)
            .unwrap();
        // Differs beyond digit 16: f64 cannot tell, so recompute.
        let vp = Viewport::new("-0.74364388703715870475219151", "0.1", 1e-3, 500, 800, 600)
            .unwrap();
        assert!(orbit.is_stale_for(&vp));
    }
}
