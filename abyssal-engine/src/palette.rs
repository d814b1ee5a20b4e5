//! CPU palette for smoothed iteration data.
//!
//! Maps a smoothed count to RGBA; interior (mu < 0) is always black.
//! The palette is a parameterized cosine gradient, cheap enough to bake
//! per-tile at upload time.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaletteScheme {
    Classic,
    Fire,
    Ocean,
    Grayscale,
}

/// Palette parameters: `(mu, scheme, offset, scale) → rgb`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub scheme: PaletteScheme,
    pub offset: f32,
    pub scale: f32,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            scheme: PaletteScheme::Classic,
            offset: 0.0,
            scale: 0.02,
        }
    }
}

impl Palette {
    /// Shade one smoothed count. Glitched pixels arrive as mu = 0 and
    /// shade to the darkest palette entry rather than pure black, so
    /// they remain distinguishable from interior.
    pub fn shade(&self, mu: f32) -> [u8; 4] {
        if mu < 0.0 {
            return [0, 0, 0, 255];
        }
        let t = (mu * self.scale + self.offset) as f64;
        let (r, g, b) = match self.scheme {
            PaletteScheme::Classic => cosine(t, (0.5, 0.5, 0.5), (0.5, 0.5, 0.5), (1.0, 1.0, 1.0), (0.0, 0.1, 0.2)),
            PaletteScheme::Fire => cosine(t, (0.5, 0.2, 0.1), (0.5, 0.3, 0.1), (1.0, 1.0, 1.0), (0.0, 0.25, 0.5)),
            PaletteScheme::Ocean => cosine(t, (0.1, 0.3, 0.5), (0.2, 0.3, 0.4), (1.0, 1.0, 1.0), (0.5, 0.4, 0.0)),
            PaletteScheme::Grayscale => {
                let v = 0.5 + 0.5 * (std::f64::consts::TAU * t).cos();
                (v, v, v)
            }
        };
        [to_u8(r), to_u8(g), to_u8(b), 255]
    }
}

fn cosine(
    t: f64,
    a: (f64, f64, f64),
    b: (f64, f64, f64),
    c: (f64, f64, f64),
    d: (f64, f64, f64),
) -> (f64, f64, f64) {
    let tau = std::f64::consts::TAU;
    (
        a.0 + b.0 * (tau * (c.0 * t + d.0)).cos(),
        a.1 + b.1 * (tau * (c.1 * t + d.1)).cos(),
        a.2 + b.2 * (tau * (c.2 * t + d.2)).cos(),
    )
}

fn to_u8(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_is_black_in_every_scheme() {
        for scheme in [
            PaletteScheme::Classic,
            PaletteScheme::Fire,
            PaletteScheme::Ocean,
            PaletteScheme::Grayscale,
        ] {
            let p = Palette {
                scheme,
                ..Default::default()
            };
            assert_eq!(p.shade(-1.0), [0, 0, 0, 255]);
        }
    }

    #[test]
    fn escaped_pixels_are_opaque_and_not_black() {
        let p = Palette::default();
        let px = p.shade(12.5);
        assert_eq!(px[3], 255);
        assert!(px[0] > 0 || px[1] > 0 || px[2] > 0);
    }

    #[test]
    fn nearby_counts_shade_continuously() {
        let p = Palette::default();
        let a = p.shade(10.0);
        let b = p.shade(10.1);
        for ch in 0..3 {
            assert!((a[ch] as i16 - b[ch] as i16).abs() < 16);
        }
    }

    #[test]
    fn offset_rotates_the_gradient() {
        let base = Palette::default();
        let shifted = Palette {
            offset: 0.5,
            ..Default::default()
        };
        assert_ne!(base.shade(10.0), shifted.shade(10.0));
    }
}
