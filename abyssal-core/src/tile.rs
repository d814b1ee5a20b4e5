//! Quad-tree tile addressing and the tile record.
//!
//! Tiles live on an absolute grid: level 0 tiles span 4 complex units
//! per side and every level increment halves the cell. The mapping from
//! (level, x, y) to the plane is deterministic, so tile identities are
//! stable across sessions and cache tiers.

use crate::{Tier, Viewport};
use serde::{Deserialize, Serialize};

/// Complex span of a level-0 tile side.
pub const LEVEL0_SPAN: f64 = 4.0;

/// Real-axis offset of the grid; places the x=0 column over the set.
pub const ORIGIN_RE_OFFSET: f64 = -0.75;

/// Deepest level the i64 grid can index without overflow.
pub const MAX_LEVEL: u16 = 62;

/// Address of one tile in the quad-tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub level: u16,
    pub x: i64,
    pub y: i64,
}

impl TileCoord {
    pub fn new(level: u16, x: i64, y: i64) -> Self {
        Self { level, x, y }
    }

    /// Complex units per tile side at a level: 4 / 2^level.
    pub fn span(level: u16) -> f64 {
        LEVEL0_SPAN * (0.5f64).powi(level as i32)
    }

    /// Deterministic tile center:
    /// ((x + 0.5)·span − 0.75, (y + 0.5)·span).
    pub fn center(&self) -> (f64, f64) {
        let s = Self::span(self.level);
        (
            (self.x as f64 + 0.5) * s + ORIGIN_RE_OFFSET,
            (self.y as f64 + 0.5) * s,
        )
    }

    /// Lower-left corner of the tile.
    pub fn origin(&self) -> (f64, f64) {
        let s = Self::span(self.level);
        (self.x as f64 * s + ORIGIN_RE_OFFSET, self.y as f64 * s)
    }

    /// Tile containing a complex point at a level.
    pub fn containing(level: u16, re: f64, im: f64) -> Self {
        let s = Self::span(level);
        Self {
            level,
            x: ((re - ORIGIN_RE_OFFSET) / s).floor() as i64,
            y: (im / s).floor() as i64,
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            return None;
        }
        Some(Self {
            level: self.level - 1,
            x: self.x.div_euclid(2),
            y: self.y.div_euclid(2),
        })
    }

    /// The four next-finer tiles covering this one.
    pub fn children(&self) -> [Self; 4] {
        let l = self.level + 1;
        let (x, y) = (self.x * 2, self.y * 2);
        [
            Self::new(l, x, y),
            Self::new(l, x + 1, y),
            Self::new(l, x, y + 1),
            Self::new(l, x + 1, y + 1),
        ]
    }

    /// 4-connected neighbors at the same level.
    pub fn neighbors4(&self) -> [Self; 4] {
        [
            Self::new(self.level, self.x - 1, self.y),
            Self::new(self.level, self.x + 1, self.y),
            Self::new(self.level, self.x, self.y - 1),
            Self::new(self.level, self.x, self.y + 1),
        ]
    }
}

/// Cache identity of a tile. Precision is deliberately not part of the
/// key: different precisions of the same tile substitute for each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub coord: TileCoord,
    pub max_iter: u32,
}

impl TileKey {
    pub fn new(coord: TileCoord, max_iter: u32) -> Self {
        Self { coord, max_iter }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TileStatus {
    Pending,
    Rendering,
    Complete,
    Error,
}

/// One rendered tile: palette-agnostic smoothed iteration counts, −1
/// marking interior pixels. Once status is Complete the buffer is
/// immutable; caches share it behind `Arc`.
#[derive(Clone, Debug)]
pub struct Tile {
    pub key: TileKey,
    pub precision: Tier,
    pub width_px: u16,
    pub pixels: Vec<f32>,
    pub status: TileStatus,
    pub last_accessed_ms: u64,
    pub render_time_ms: f32,
    pub glitched_px: u32,
}

impl Tile {
    pub fn byte_len(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<f32>()
    }
}

/// Level at which one tile is roughly `tile_size` screen pixels wide.
pub fn level_for_scale(scale: f64, short_axis_px: u32, tile_size: u32) -> u16 {
    let cpp = scale / short_axis_px as f64;
    let desired_span = tile_size as f64 * cpp;
    let level = (LEVEL0_SPAN / desired_span).log2().round() as i64;
    level.clamp(0, MAX_LEVEL as i64) as u16
}

/// Enumerate the tiles intersecting a viewport at a level, row-major.
pub fn visible_coords(vp: &Viewport, level: u16) -> Vec<TileCoord> {
    let (cx, cy) = vp.center_f64();
    visible_coords_rect(
        cx,
        cy,
        vp.complex_width() / 2.0,
        vp.complex_height() / 2.0,
        level,
    )
}

/// Tiles intersecting an arbitrary centered rectangle; the prefetcher
/// uses this for predicted viewports whose centers only exist as f64.
pub fn visible_coords_rect(
    cx: f64,
    cy: f64,
    half_w: f64,
    half_h: f64,
    level: u16,
) -> Vec<TileCoord> {
    let s = TileCoord::span(level);

    let x0 = ((cx - half_w - ORIGIN_RE_OFFSET) / s).floor() as i64;
    let x1 = ((cx + half_w - ORIGIN_RE_OFFSET) / s).floor() as i64;
    let y0 = ((cy - half_h) / s).floor() as i64;
    let y1 = ((cy + half_h) / s).floor() as i64;

    let mut out = Vec::with_capacity(((x1 - x0 + 1) * (y1 - y0 + 1)).max(0) as usize);
    for y in y0..=y1 {
        for x in x0..=x1 {
            out.push(TileCoord::new(level, x, y));
        }
    }
    out
}
