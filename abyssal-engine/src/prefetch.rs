//! Prefetch planning: turning motion predictions into low-priority
//! tile requests.
//!
//! Three strategies, chosen by interaction state and prediction
//! confidence. The plan is a coordinate list; the pipeline deduplicates
//! against pending and in-flight work and tags the jobs for
//! cancellation on direction reversal.

use crate::predictor::ViewportPredictor;
use abyssal_core::{level_for_scale, visible_coords_rect, TileCoord, Viewport};
use std::collections::HashSet;

const INTERACTING_CAP: usize = 4;
const CONFIDENT_THRESHOLD: f64 = 0.3;
const PREDICT_LOOKAHEAD_MS: f64 = 200.0;
const LEADING_EDGE_EXTRA: i64 = 2;
const CONFIDENT_CAP_SCALE: f64 = 16.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefetchStrategy {
    Neighbors,
    Ring,
    Predicted,
}

/// Decide the prefetch set for the current frame.
pub fn plan(
    visible: &[TileCoord],
    vp: &Viewport,
    predictor: &ViewportPredictor,
    now_ms: f64,
    tile_size: u32,
) -> (PrefetchStrategy, Vec<TileCoord>) {
    let visible_set: HashSet<TileCoord> = visible.iter().copied().collect();
    let est = predictor.estimate();

    if predictor.is_interacting(now_ms) {
        return (
            PrefetchStrategy::Neighbors,
            neighbors_plan(visible, &visible_set),
        );
    }
    if est.confidence < CONFIDENT_THRESHOLD {
        return (PrefetchStrategy::Ring, ring_plan(visible, &visible_set));
    }
    (
        PrefetchStrategy::Predicted,
        predicted_plan(vp, predictor, &visible_set, tile_size),
    )
}

/// While interacting: 4-connected neighbors of the visible set, at most
/// four tiles.
fn neighbors_plan(visible: &[TileCoord], visible_set: &HashSet<TileCoord>) -> Vec<TileCoord> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for coord in visible {
        for n in coord.neighbors4() {
            if !visible_set.contains(&n) && seen.insert(n) {
                out.push(n);
                if out.len() >= INTERACTING_CAP {
                    return out;
                }
            }
        }
    }
    out
}

/// Idle with a vague prediction: one edge-only ring around the visible
/// rectangle.
fn ring_plan(visible: &[TileCoord], visible_set: &HashSet<TileCoord>) -> Vec<TileCoord> {
    let Some(first) = visible.first() else {
        return Vec::new();
    };
    let level = first.level;
    let (mut x0, mut x1) = (first.x, first.x);
    let (mut y0, mut y1) = (first.y, first.y);
    for c in visible {
        x0 = x0.min(c.x);
        x1 = x1.max(c.x);
        y0 = y0.min(c.y);
        y1 = y1.max(c.y);
    }
    let mut out = Vec::new();
    for x in (x0 - 1)..=(x1 + 1) {
        for y in [y0 - 1, y1 + 1] {
            let c = TileCoord::new(level, x, y);
            if !visible_set.contains(&c) {
                out.push(c);
            }
        }
    }
    for y in y0..=y1 {
        for x in [x0 - 1, x1 + 1] {
            let c = TileCoord::new(level, x, y);
            if !visible_set.contains(&c) {
                out.push(c);
            }
        }
    }
    out
}

/// Idle with a confident prediction: the predicted visible set minus
/// the current one, biased along the pan direction, with zoom
/// children/parents added and the total capped at ⌈16·confidence⌉.
fn predicted_plan(
    vp: &Viewport,
    predictor: &ViewportPredictor,
    visible_set: &HashSet<TileCoord>,
    tile_size: u32,
) -> Vec<TileCoord> {
    let Some(pred) = predictor.predict(PREDICT_LOOKAHEAD_MS) else {
        return Vec::new();
    };
    if !(pred.scale.is_finite() && pred.scale > 0.0) {
        return Vec::new();
    }
    let est = predictor.estimate();
    let short_px = vp.width.min(vp.height);
    let level = level_for_scale(pred.scale, short_px, tile_size);

    let aspect = vp.width as f64 / vp.height as f64;
    let (half_w, half_h) = if aspect >= 1.0 {
        (pred.scale * aspect / 2.0, pred.scale / 2.0)
    } else {
        (pred.scale / 2.0, pred.scale / aspect / 2.0)
    };
    let predicted = visible_coords_rect(pred.cx, pred.cy, half_w, half_h, level);

    let mut seen: HashSet<TileCoord> = HashSet::new();
    let mut out = Vec::new();
    let mut push = |c: TileCoord, out: &mut Vec<TileCoord>, seen: &mut HashSet<TileCoord>| {
        if !visible_set.contains(&c) && seen.insert(c) {
            out.push(c);
        }
    };

    let (px0, px1, py0, py1) = bounding_box(&predicted);
    for c in &predicted {
        push(*c, &mut out, &mut seen);
    }

    // Two extra rows/columns on the leading edge of the pan.
    let span = TileCoord::span(level);
    let (vx_tiles, vy_tiles) = (est.vx / span, est.vy / span);
    if vx_tiles.abs() > f64::EPSILON {
        let edge = if vx_tiles > 0.0 { px1 } else { px0 };
        let dir = if vx_tiles > 0.0 { 1 } else { -1 };
        for k in 1..=LEADING_EDGE_EXTRA {
            for y in py0..=py1 {
                push(TileCoord::new(level, edge + dir * k, y), &mut out, &mut seen);
            }
        }
    }
    if vy_tiles.abs() > f64::EPSILON {
        let edge = if vy_tiles > 0.0 { py1 } else { py0 };
        let dir = if vy_tiles > 0.0 { 1 } else { -1 };
        for k in 1..=LEADING_EDGE_EXTRA {
            for x in px0..=px1 {
                push(TileCoord::new(level, x, edge + dir * k), &mut out, &mut seen);
            }
        }
    }

    // Zooming: next-finer children around the predicted center, or the
    // parent neighborhood when pulling back.
    let center_tile = TileCoord::containing(level, pred.cx, pred.cy);
    if pred.scale < vp.scale * 0.99 {
        let mut around = vec![center_tile];
        around.extend(center_tile.neighbors4());
        around.truncate(4);
        for tile in around {
            for child in tile.children() {
                push(child, &mut out, &mut seen);
            }
        }
    } else if pred.scale > vp.scale * 1.01 {
        if let Some(parent) = center_tile.parent() {
            push(parent, &mut out, &mut seen);
            for n in parent.neighbors4() {
                push(n, &mut out, &mut seen);
            }
        }
    }

    let cap = (CONFIDENT_CAP_SCALE * pred.confidence).ceil().max(1.0) as usize;
    out.truncate(cap);
    out
}

fn bounding_box(coords: &[TileCoord]) -> (i64, i64, i64, i64) {
    let mut x0 = i64::MAX;
    let mut x1 = i64::MIN;
    let mut y0 = i64::MAX;
    let mut y1 = i64::MIN;
    for c in coords {
        x0 = x0.min(c.x);
        x1 = x1.max(c.x);
        y0 = y0.min(c.y);
        y1 = y1.max(c.y);
    }
    (x0, x1, y0, y1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use abyssal_core::{level_for_scale, visible_coords};

    fn home_view() -> (Viewport, Vec<TileCoord>) {
        let vp = Viewport::new("-0.5", "0", 2.5, 256, 800, 600).unwrap();
        let level = level_for_scale(vp.scale, 600, 256);
        let visible = visible_coords(&vp, level);
        (vp, visible)
    }

    #[test]
    fn interacting_prefetches_at_most_four_neighbors() {
        let (vp, visible) = home_view();
        let mut p = ViewportPredictor::new();
        p.update(-0.5, 0.0, 2.5, 1000.0);
        let (strategy, tiles) = plan(&visible, &vp, &p, 1050.0, 256);
        assert_eq!(strategy, PrefetchStrategy::Neighbors);
        assert!(tiles.len() <= 4);
        for t in &tiles {
            assert!(!visible.contains(t));
        }
    }

    #[test]
    fn idle_low_confidence_rings_the_viewport() {
        let (vp, visible) = home_view();
        let p = ViewportPredictor::new(); // no history, zero confidence
        let (strategy, tiles) = plan(&visible, &vp, &p, 5000.0, 256);
        assert_eq!(strategy, PrefetchStrategy::Ring);
        assert!(!tiles.is_empty());
        // Ring tiles hug the visible bounding box without entering it.
        let (x0, x1, y0, y1) = bounding_box(&visible);
        for t in &tiles {
            assert!(!visible.contains(t));
            assert!(t.x >= x0 - 1 && t.x <= x1 + 1);
            assert!(t.y >= y0 - 1 && t.y <= y1 + 1);
        }
    }

    #[test]
    fn idle_confident_biases_the_leading_edge() {
        let (vp, visible) = home_view();
        let mut p = ViewportPredictor::new();
        // Steady eastward pan, then idle long enough to leave
        // interaction but keep history fresh.
        for i in 0..20 {
            let t = i as f64 * 25.0;
            p.update(-0.5 + 2e-4 * t, 0.0, 2.5, t);
        }
        let now = 19.0 * 25.0 + 300.0;
        let (strategy, tiles) = plan(&visible, &vp, &p, now, 256);
        assert_eq!(strategy, PrefetchStrategy::Predicted);
        assert!(!tiles.is_empty());
        let (_, x1, _, _) = bounding_box(&visible);
        // Eastward motion leans the plan east of the visible box.
        assert!(tiles.iter().any(|t| t.x > x1));
        // Capped at ⌈16·confidence⌉ ≤ 16.
        assert!(tiles.len() <= 16);
    }

    #[test]
    fn zooming_in_prefetches_children() {
        let (vp, visible) = home_view();
        let mut p = ViewportPredictor::new();
        for i in 0..10 {
            let t = i as f64 * 50.0;
            p.update(-0.5, 0.0, 2.5 * (0.97f64).powf(i as f64), t);
        }
        let now = 9.0 * 50.0 + 300.0;
        let (strategy, tiles) = plan(&visible, &vp, &p, now, 256);
        assert_eq!(strategy, PrefetchStrategy::Predicted);
        let level = visible[0].level;
        assert!(tiles.iter().any(|t| t.level == level + 1), "no children in {tiles:?}");
    }

    #[test]
    fn empty_visible_set_plans_nothing_for_ring() {
        let vp = Viewport::new("-0.5", "0", 2.5, 256, 800, 600).unwrap();
        let p = ViewportPredictor::new();
        let (_, tiles) = plan(&[], &vp, &p, 0.0, 256);
        assert!(tiles.is_empty());
    }
}
