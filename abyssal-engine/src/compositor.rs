//! Compositing completed tiles onto the output framebuffer.
//!
//! Tiles arrive as palette-agnostic f32 buffers; the compositor bakes
//! them through the palette into L1 textures and blits them over the
//! reprojected base. All of this happens on the coordinator's thread;
//! the texture tier is never touched elsewhere.

use crate::cache::l1::RgbaTile;
use crate::cache::lru::LruCache;
use crate::palette::Palette;
use crate::reproject::OUT_OF_BOUNDS_RGBA;
use abyssal_core::{Tile, TileCoord, TileKey, Viewport};

/// Neutral paint for tiles that failed to render.
pub const ERROR_TILE_RGBA: [u8; 4] = [24, 16, 24, 255];

pub struct Compositor {
    width: u32,
    height: u32,
    frame: Vec<u8>,
    palette: Palette,
    palette_rev: u64,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: vec![0u8; (width * height * 4) as usize],
            palette: Palette::default(),
            palette_rev: 1,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut [u8] {
        &mut self.frame
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    /// Swap the palette; cached L1 textures refresh lazily because
    /// their revision no longer matches.
    pub fn set_palette(&mut self, palette: Palette) {
        if palette != self.palette {
            self.palette = palette;
            self.palette_rev += 1;
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width != self.width || height != self.height {
            self.width = width;
            self.height = height;
            self.frame = vec![0u8; (width * height * 4) as usize];
            self.fill(OUT_OF_BOUNDS_RGBA);
        }
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.frame.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Blit one completed tile. The L1 texture is created (or refreshed
    /// after a palette change) on demand, then sampled nearest-neighbor
    /// into the clipped output rectangle.
    pub fn draw_tile(
        &mut self,
        vp: &Viewport,
        tile: &Tile,
        l1: &mut LruCache<TileKey, RgbaTile>,
    ) {
        let needs_upload = match l1.get(&tile.key) {
            Some(tex) => tex.palette_rev != self.palette_rev,
            None => true,
        };
        if needs_upload {
            let tex = self.bake(tile);
            l1.put(tile.key, tex);
        }
        let Some(tex) = l1.peek(&tile.key) else {
            return;
        };

        let coord = tile.key.coord;
        let s = TileCoord::span(coord.level);
        let (ox, oy) = coord.origin();
        let (left, top) = vp.complex_to_pixel(ox, oy + s);
        let (right, bottom) = vp.complex_to_pixel(ox + s, oy);

        let x0 = left.floor().max(0.0) as u32;
        let y0 = top.floor().max(0.0) as u32;
        let x1 = (right.ceil().max(0.0) as u32).min(self.width);
        let y1 = (bottom.ceil().max(0.0) as u32).min(self.height);
        let tw = tex.width as f64;

        for py in y0..y1 {
            for px in x0..x1 {
                let (re, im) = vp.pixel_to_complex(px as f64 + 0.5, py as f64 + 0.5);
                let u = (re - ox) / s;
                let v = (oy + s - im) / s;
                // Tiles partition the plane half-open, so each pixel
                // center lands in exactly one tile.
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }
                let ti = (u * tw) as usize;
                let tj = (v * tw) as usize;
                let si = (tj * tex.width as usize + ti) * 4;
                let di = ((py * self.width + px) * 4) as usize;
                self.frame[di..di + 4].copy_from_slice(&tex.pixels[si..si + 4]);
            }
        }
    }

    /// Paint a tile's footprint with the neutral error color.
    pub fn draw_error_tile(&mut self, vp: &Viewport, coord: TileCoord) {
        let s = TileCoord::span(coord.level);
        let (ox, oy) = coord.origin();
        let (left, top) = vp.complex_to_pixel(ox, oy + s);
        let (right, bottom) = vp.complex_to_pixel(ox + s, oy);
        let x0 = left.floor().max(0.0) as u32;
        let y0 = top.floor().max(0.0) as u32;
        let x1 = (right.ceil().max(0.0) as u32).min(self.width);
        let y1 = (bottom.ceil().max(0.0) as u32).min(self.height);
        for py in y0..y1 {
            for px in x0..x1 {
                let (re, im) = vp.pixel_to_complex(px as f64 + 0.5, py as f64 + 0.5);
                let u = (re - ox) / s;
                let v = (oy + s - im) / s;
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }
                let di = ((py * self.width + px) * 4) as usize;
                self.frame[di..di + 4].copy_from_slice(&ERROR_TILE_RGBA);
            }
        }
    }

    /// Apply the palette to a tile buffer, producing the L1 texture.
    fn bake(&self, tile: &Tile) -> RgbaTile {
        let mut pixels = Vec::with_capacity(tile.pixels.len() * 4);
        for &mu in &tile.pixels {
            pixels.extend_from_slice(&self.palette.shade(mu));
        }
        RgbaTile {
            width: tile.width_px,
            pixels,
            palette_rev: self.palette_rev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abyssal_core::{Tier, TileKey, TileStatus};

    fn uniform_tile(coord: TileCoord, width_px: u16, mu: f32) -> Tile {
        Tile {
            key: TileKey::new(coord, 256),
            precision: Tier::Standard,
            width_px,
            pixels: vec![mu; width_px as usize * width_px as usize],
            status: TileStatus::Complete,
            last_accessed_ms: 0,
            render_time_ms: 0.0,
            glitched_px: 0,
        }
    }

    /// Viewport whose complex rect exactly covers tiles (2,0,0)..(2,1,0):
    /// centered between them, two tile spans wide.
    fn two_tile_viewport() -> Viewport {
        // level 2 → span 1.0; tiles x=0,1 cover re ∈ [-0.75, 1.25)
        Viewport::new("0.25", "0.5", 1.0, 256, 64, 32).unwrap()
    }

    #[test]
    fn interior_tile_composites_black() {
        let vp = Viewport::new("0.25", "0.5", 1.0, 256, 32, 32).unwrap();
        let coord = TileCoord::new(2, 0, 0);
        let tile = uniform_tile(coord, 8, -1.0);
        let mut comp = Compositor::new(32, 32);
        comp.fill([200, 200, 200, 255]);
        let mut l1 = LruCache::new(8);
        comp.draw_tile(&vp, &tile, &mut l1);

        // Viewport covers re [-0.25, 0.75], im [0, 1]; the tile covers
        // re [-0.75, 0.25) so the left half of the frame turns black.
        let i_left = ((16 * 32 + 4) * 4) as usize;
        assert_eq!(&comp.frame()[i_left..i_left + 4], &[0, 0, 0, 255]);
        let i_right = ((16 * 32 + 28) * 4) as usize;
        assert_eq!(&comp.frame()[i_right..i_right + 4], &[200, 200, 200, 255]);
        assert_eq!(l1.len(), 1);
    }

    #[test]
    fn adjacent_tiles_partition_without_gaps() {
        let vp = two_tile_viewport();
        let a = uniform_tile(TileCoord::new(2, 0, 0), 8, -1.0);
        let b = uniform_tile(TileCoord::new(2, 1, 0), 8, 10.0);
        let mut comp = Compositor::new(64, 32);
        comp.fill([7, 7, 7, 255]);
        let mut l1 = LruCache::new(8);
        comp.draw_tile(&vp, &a, &mut l1);
        comp.draw_tile(&vp, &b, &mut l1);

        let escaped = comp.palette().shade(10.0);
        // Every pixel in the middle row belongs to one of the two tiles.
        for px in 0..64u32 {
            let i = ((16 * 64 + px) * 4) as usize;
            let rgba = &comp.frame()[i..i + 4];
            assert!(
                rgba == [0, 0, 0, 255] || rgba == escaped,
                "gap at px {px}: {rgba:?}"
            );
        }
        // And both colors appear.
        let row: Vec<&[u8]> = (0..64)
            .map(|px| &comp.frame()[((16 * 64 + px) * 4) as usize..((16 * 64 + px) * 4 + 4) as usize])
            .collect();
        assert!(row.iter().any(|p| *p == [0, 0, 0, 255]));
        assert!(row.iter().any(|p| *p == escaped));
    }

    #[test]
    fn palette_change_refreshes_l1_textures() {
        let vp = Viewport::new("0.25", "0.5", 1.0, 256, 32, 32).unwrap();
        let tile = uniform_tile(TileCoord::new(2, 0, 0), 8, 20.0);
        let mut comp = Compositor::new(32, 32);
        let mut l1 = LruCache::new(8);
        comp.draw_tile(&vp, &tile, &mut l1);
        let before = comp.frame()[((16 * 32 + 4) * 4) as usize..][..3].to_vec();

        comp.set_palette(Palette {
            offset: 0.5,
            ..Palette::default()
        });
        comp.draw_tile(&vp, &tile, &mut l1);
        let after = comp.frame()[((16 * 32 + 4) * 4) as usize..][..3].to_vec();
        assert_ne!(before, after);
        // Still a single texture, rebaked in place.
        assert_eq!(l1.len(), 1);
        assert_eq!(l1.peek(&tile.key).unwrap().palette_rev, 2);
    }

    #[test]
    fn error_tiles_paint_neutral() {
        let vp = Viewport::new("0.25", "0.5", 1.0, 256, 32, 32).unwrap();
        let mut comp = Compositor::new(32, 32);
        comp.fill([0, 0, 0, 255]);
        comp.draw_error_tile(&vp, TileCoord::new(2, 0, 0));
        let i = ((16 * 32 + 4) * 4) as usize;
        assert_eq!(&comp.frame()[i..i + 4], &ERROR_TILE_RGBA);
    }

    #[test]
    fn resize_reallocates_the_frame() {
        let mut comp = Compositor::new(16, 16);
        comp.resize(32, 8);
        assert_eq!(comp.frame().len(), 32 * 8 * 4);
        assert_eq!(comp.width(), 32);
        assert_eq!(comp.height(), 8);
    }
}
