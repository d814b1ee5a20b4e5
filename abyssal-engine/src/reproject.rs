//! Reprojection: warping the last finished frame to a new viewport.
//!
//! While tiles recompute, the previous framebuffer is resampled at the
//! positions where each new pixel's complex coordinate used to live.
//! It is an image-space fallback only; the compositor layers real tiles
//! on top as they land.

use abyssal_core::Viewport;

/// Fill for pixels that fall outside the saved frame.
pub const OUT_OF_BOUNDS_RGBA: [u8; 4] = [6, 8, 16, 255];

/// Change ratio at which warping stops paying for itself.
const DECLINE_RATIO: f64 = 0.9;

#[derive(Clone, Debug)]
struct Snapshot {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    cx: f64,
    cy: f64,
    scale: f64,
}

/// Holds the last completed framebuffer and its viewport.
#[derive(Default, Debug)]
pub struct Reprojector {
    snapshot: Option<Snapshot>,
}

impl Reprojector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Save a settled frame as the future warp source.
    pub fn save(&mut self, frame: &[u8], vp: &Viewport) {
        debug_assert_eq!(frame.len(), (vp.width * vp.height * 4) as usize);
        let (cx, cy) = vp.center_f64();
        self.snapshot = Some(Snapshot {
            pixels: frame.to_vec(),
            width: vp.width,
            height: vp.height,
            cx,
            cy,
            scale: vp.scale,
        });
    }

    pub fn invalidate(&mut self) {
        self.snapshot = None;
    }

    /// Blended pan + log-zoom change between the snapshot and a new
    /// viewport; 0 = identical, ≥ 0.9 = hardly any overlap left.
    pub fn change_ratio(&self, vp: &Viewport) -> f64 {
        let Some(snap) = &self.snapshot else {
            return 1.0;
        };
        let (cx, cy) = vp.center_f64();
        let dx = cx - snap.cx;
        let dy = cy - snap.cy;
        let pan = (dx * dx + dy * dy).sqrt() / snap.scale.max(f64::MIN_POSITIVE);
        let zoom = (vp.scale / snap.scale).log2().abs();
        (0.5 * pan.min(2.0) + 0.5 * zoom.min(2.0)).min(1.0)
    }

    /// Whether warping the snapshot is worth it for this viewport.
    pub fn should_reproject(&self, vp: &Viewport) -> bool {
        self.snapshot.is_some() && self.change_ratio(vp) < DECLINE_RATIO
    }

    /// Warp the snapshot into `out` for the new viewport. Pixels with
    /// no source sample get the neutral dark fill. Returns false when
    /// no snapshot exists (the caller paints the fallback itself).
    pub fn reproject(&self, vp: &Viewport, out: &mut [u8]) -> bool {
        let Some(snap) = &self.snapshot else {
            return false;
        };
        debug_assert_eq!(out.len(), (vp.width * vp.height * 4) as usize);

        let snap_cpp = snap.scale / snap.width.min(snap.height) as f64;
        for py in 0..vp.height {
            for px in 0..vp.width {
                let (re, im) = vp.pixel_to_complex(px as f64 + 0.5, py as f64 + 0.5);
                // Position of this complex point in the old frame.
                let ox = (re - snap.cx) / snap_cpp + snap.width as f64 / 2.0 - 0.5;
                let oy = (snap.cy - im) / snap_cpp + snap.height as f64 / 2.0 - 0.5;
                let rgba = sample_bilinear(snap, ox, oy).unwrap_or(OUT_OF_BOUNDS_RGBA);
                let di = ((py * vp.width + px) * 4) as usize;
                out[di..di + 4].copy_from_slice(&rgba);
            }
        }
        true
    }
}

fn sample_bilinear(snap: &Snapshot, x: f64, y: f64) -> Option<[u8; 4]> {
    if x < 0.0 || y < 0.0 || x > (snap.width - 1) as f64 || y > (snap.height - 1) as f64 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(snap.width - 1);
    let y1 = (y0 + 1).min(snap.height - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let at = |px: u32, py: u32| -> [f64; 4] {
        let i = ((py * snap.width + px) * 4) as usize;
        [
            snap.pixels[i] as f64,
            snap.pixels[i + 1] as f64,
            snap.pixels[i + 2] as f64,
            snap.pixels[i + 3] as f64,
        ]
    };
    let (a, b, c, d) = (at(x0, y0), at(x1, y0), at(x0, y1), at(x1, y1));
    let mut out = [0u8; 4];
    for ch in 0..4 {
        let top = a[ch] * (1.0 - fx) + b[ch] * fx;
        let bottom = c[ch] * (1.0 - fx) + d[ch] * fx;
        out[ch] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(vp: &Viewport, rgba: [u8; 4]) -> Vec<u8> {
        let mut frame = vec![0u8; (vp.width * vp.height * 4) as usize];
        for px in frame.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        frame
    }

    #[test]
    fn no_snapshot_declines() {
        let vp = Viewport::new("-0.5", "0", 2.5, 256, 64, 64).unwrap();
        let r = Reprojector::new();
        assert!(!r.should_reproject(&vp));
        let mut out = vec![0u8; 64 * 64 * 4];
        assert!(!r.reproject(&vp, &mut out));
    }

    #[test]
    fn identity_warp_reproduces_the_frame() {
        let vp = Viewport::new("-0.5", "0", 2.5, 256, 32, 32).unwrap();
        let mut r = Reprojector::new();
        let frame = solid_frame(&vp, [100, 150, 200, 255]);
        r.save(&frame, &vp);
        assert!(r.should_reproject(&vp));
        assert_eq!(r.change_ratio(&vp), 0.0);

        let mut out = vec![0u8; frame.len()];
        assert!(r.reproject(&vp, &mut out));
        assert_eq!(out, frame);
    }

    #[test]
    fn pan_shifts_content_and_fills_the_edge() {
        // 32x32 frame, left half red, right half blue.
        let vp = Viewport::new("0", "0", 2.0, 256, 32, 32).unwrap();
        let mut frame = vec![0u8; 32 * 32 * 4];
        for py in 0..32u32 {
            for px in 0..32u32 {
                let i = ((py * 32 + px) * 4) as usize;
                let rgba = if px < 16 {
                    [255, 0, 0, 255]
                } else {
                    [0, 0, 255, 255]
                };
                frame[i..i + 4].copy_from_slice(&rgba);
            }
        }
        let mut r = Reprojector::new();
        r.save(&frame, &vp);

        // Pan east by a quarter of the view.
        let panned = Viewport::new("0.5", "0", 2.0, 256, 32, 32).unwrap();
        assert!(r.should_reproject(&panned));
        let mut out = vec![0u8; frame.len()];
        r.reproject(&panned, &mut out);

        // The new left edge shows what was center-left (red), the new
        // right edge has no source and gets the neutral fill.
        let left = &out[(16 * 32 * 4)..(16 * 32 * 4) + 4];
        assert_eq!(left, &[255, 0, 0, 255]);
        let right_i = ((16 * 32 + 31) * 4) as usize;
        assert_eq!(&out[right_i..right_i + 4], &OUT_OF_BOUNDS_RGBA);
    }

    #[test]
    fn declines_near_total_change() {
        let vp = Viewport::new("0", "0", 2.0, 256, 32, 32).unwrap();
        let mut r = Reprojector::new();
        r.save(&solid_frame(&vp, [9, 9, 9, 255]), &vp);

        // Panning four view-widths away leaves nothing to reuse.
        let far = Viewport::new("4", "0", 2.0, 256, 32, 32).unwrap();
        assert!(r.change_ratio(&far) >= 0.9);
        assert!(!r.should_reproject(&far));

        // Deep zoom jump likewise.
        let jump = Viewport::new("0", "0", 2e-4, 256, 32, 32).unwrap();
        assert!(!r.should_reproject(&jump));
    }

    #[test]
    fn zoom_in_magnifies_around_the_center() {
        let vp = Viewport::new("0", "0", 2.0, 256, 32, 32).unwrap();
        // Center 4 pixels white, rest black.
        let mut frame = solid_frame(&vp, [0, 0, 0, 255]);
        for py in 15..17u32 {
            for px in 15..17u32 {
                let i = ((py * 32 + px) * 4) as usize;
                frame[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        let mut r = Reprojector::new();
        r.save(&frame, &vp);

        let zoomed = Viewport::new("0", "0", 1.0, 256, 32, 32).unwrap();
        assert!(r.should_reproject(&zoomed));
        let mut out = vec![0u8; frame.len()];
        r.reproject(&zoomed, &mut out);
        // The white blob doubles in size; the exact center stays bright.
        let c = ((16 * 32 + 16) * 4) as usize;
        assert!(out[c] > 128, "center not magnified: {}", out[c]);
    }
}
