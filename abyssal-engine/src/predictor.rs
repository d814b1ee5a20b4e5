//! Viewport motion prediction.
//!
//! A bounded history of (center, scale, t) samples feeds an
//! exponentially-weighted regression over adjacent pairs: linear pan
//! velocity, geometric zoom rate. Confidence builds with sample density
//! and span, and decays with prediction lookahead.

use std::collections::VecDeque;

const MAX_SAMPLES: usize = 20;
const MAX_AGE_MS: f64 = 1000.0;
const WEIGHT_TAU_MS: f64 = 200.0;
const INTERACTION_TIMEOUT_MS: f64 = 200.0;
const CONFIDENCE_DECAY_MS: f64 = 300.0;
pub const MIN_LOOKAHEAD_MS: f64 = 100.0;
pub const MAX_LOOKAHEAD_MS: f64 = 500.0;

#[derive(Clone, Copy, Debug)]
struct Sample {
    cx: f64,
    cy: f64,
    scale: f64,
    t_ms: f64,
}

/// Weighted motion estimate over the current history window.
#[derive(Clone, Copy, Debug, Default)]
pub struct MotionEstimate {
    /// Pan velocity in complex units per ms.
    pub vx: f64,
    pub vy: f64,
    /// Scale multiplier per ms (1.0 = no zoom).
    pub zoom_rate: f64,
    pub confidence: f64,
}

/// Extrapolated viewport.
#[derive(Clone, Copy, Debug)]
pub struct Prediction {
    pub cx: f64,
    pub cy: f64,
    pub scale: f64,
    pub confidence: f64,
}

#[derive(Debug, Default)]
pub struct ViewportPredictor {
    history: VecDeque<Sample>,
}

impl ViewportPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a viewport change; prunes the window to 20 samples / 1 s.
    pub fn update(&mut self, cx: f64, cy: f64, scale: f64, t_ms: f64) {
        self.history.push_back(Sample { cx, cy, scale, t_ms });
        while self.history.len() > MAX_SAMPLES {
            self.history.pop_front();
        }
        while let Some(front) = self.history.front() {
            if t_ms - front.t_ms > MAX_AGE_MS {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    /// Weighted means over adjacent-pair velocities; weight
    /// exp(−age/200 ms) relative to the newest sample.
    pub fn estimate(&self) -> MotionEstimate {
        if self.history.len() < 2 {
            return MotionEstimate {
                zoom_rate: 1.0,
                ..Default::default()
            };
        }
        let newest = self.history.back().unwrap().t_ms;
        let oldest = self.history.front().unwrap().t_ms;

        let mut wsum = 0.0;
        let mut vx = 0.0;
        let mut vy = 0.0;
        let mut log_zoom = 0.0;
        for pair in self.history.iter().zip(self.history.iter().skip(1)) {
            let (a, b) = pair;
            let dt = b.t_ms - a.t_ms;
            if dt <= 0.0 {
                continue;
            }
            let age = newest - b.t_ms;
            let w = (-age / WEIGHT_TAU_MS).exp();
            vx += w * (b.cx - a.cx) / dt;
            vy += w * (b.cy - a.cy) / dt;
            // (scale_b / scale_a)^(1/dt), averaged in log space
            log_zoom += w * (b.scale / a.scale).ln() / dt;
            wsum += w;
        }
        if wsum == 0.0 {
            return MotionEstimate {
                zoom_rate: 1.0,
                ..Default::default()
            };
        }

        let timespan = newest - oldest;
        let samples_per_50ms = if timespan > 0.0 {
            self.history.len() as f64 * 50.0 / timespan
        } else {
            0.0
        };
        let confidence =
            (samples_per_50ms * 0.5).min(1.0) * (timespan / WEIGHT_TAU_MS).min(1.0);

        MotionEstimate {
            vx: vx / wsum,
            vy: vy / wsum,
            zoom_rate: (log_zoom / wsum).exp(),
            confidence,
        }
    }

    /// Extrapolate: center linearly, scale geometrically. Lookahead is
    /// clamped to [100, 500] ms and decays confidence as
    /// exp(−lookahead/300 ms).
    pub fn predict(&self, lookahead_ms: f64) -> Option<Prediction> {
        let last = *self.history.back()?;
        let lookahead = lookahead_ms.clamp(MIN_LOOKAHEAD_MS, MAX_LOOKAHEAD_MS);
        let est = self.estimate();
        Some(Prediction {
            cx: last.cx + est.vx * lookahead,
            cy: last.cy + est.vy * lookahead,
            scale: last.scale * est.zoom_rate.powf(lookahead),
            confidence: est.confidence * (-lookahead / CONFIDENCE_DECAY_MS).exp(),
        })
    }

    /// Dot product of the mean velocity over the latest 5 pairs against
    /// the previous 5; negative means the pan direction reversed.
    pub fn has_direction_changed(&self) -> bool {
        let pairs: Vec<(f64, f64)> = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .filter_map(|(a, b)| {
                let dt = b.t_ms - a.t_ms;
                if dt > 0.0 {
                    Some(((b.cx - a.cx) / dt, (b.cy - a.cy) / dt))
                } else {
                    None
                }
            })
            .collect();
        if pairs.len() < 4 {
            return false;
        }
        let recent_n = pairs.len().min(5);
        let older_n = (pairs.len() - recent_n).min(5);
        if older_n < 2 {
            return false;
        }
        let mean = |slice: &[(f64, f64)]| {
            let n = slice.len() as f64;
            (
                slice.iter().map(|v| v.0).sum::<f64>() / n,
                slice.iter().map(|v| v.1).sum::<f64>() / n,
            )
        };
        let recent = mean(&pairs[pairs.len() - recent_n..]);
        let older = mean(&pairs[pairs.len() - recent_n - older_n..pairs.len() - recent_n]);
        recent.0 * older.0 + recent.1 * older.1 < 0.0
    }

    /// True while the latest update is younger than 200 ms.
    pub fn is_interacting(&self, now_ms: f64) -> bool {
        self.history
            .back()
            .is_some_and(|s| now_ms - s.t_ms <= INTERACTION_TIMEOUT_MS)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
