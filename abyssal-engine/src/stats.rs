//! Rolling engine statistics for the host's `get_stats` surface.

use serde::Serialize;
use std::collections::VecDeque;

const FRAME_WINDOW_MS: f64 = 2000.0;
const RENDER_SAMPLES: usize = 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TileCounts {
    pub pending: usize,
    pub rendering: usize,
    pub complete: usize,
    pub error: usize,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct CacheBytes {
    pub l1: u64,
    pub l2: u64,
}

/// Snapshot handed to the host.
#[derive(Clone, Debug, Serialize)]
pub struct EngineStats {
    pub fps: f32,
    pub avg_render_time_ms: f32,
    pub precision_tier: &'static str,
    pub tile_counts: TileCounts,
    pub cache_bytes: CacheBytes,
    pub orbit_tiles_served: u64,
    pub orbits_computed: u64,
    pub jobs_dispatched: u64,
    pub l3_hits: u64,
    pub prefetch_cancelled: u64,
    pub l3_available: bool,
    pub precision_exhausted: bool,
}

/// Rolling windows behind the snapshot.
#[derive(Debug, Default)]
pub struct StatsTracker {
    frame_marks: VecDeque<f64>,
    render_times: VecDeque<f32>,
    pub jobs_dispatched: u64,
    pub l3_hits: u64,
    pub orbits_computed: u64,
    pub prefetch_cancelled: u64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&mut self, now_ms: f64) {
        self.frame_marks.push_back(now_ms);
        while let Some(&front) = self.frame_marks.front() {
            if now_ms - front > FRAME_WINDOW_MS {
                self.frame_marks.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_render(&mut self, ms: f32) {
        self.render_times.push_back(ms);
        while self.render_times.len() > RENDER_SAMPLES {
            self.render_times.pop_front();
        }
    }

    pub fn fps(&self, now_ms: f64) -> f32 {
        let recent = self
            .frame_marks
            .iter()
            .filter(|&&t| now_ms - t <= FRAME_WINDOW_MS)
            .count();
        (recent as f64 * 1000.0 / FRAME_WINDOW_MS) as f32
    }

    pub fn avg_render_time_ms(&self) -> f32 {
        if self.render_times.is_empty() {
            return 0.0;
        }
        self.render_times.iter().sum::<f32>() / self.render_times.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_counts_recent_frames() {
        let mut t = StatsTracker::new();
        for i in 0..20 {
            t.record_frame(i as f64 * 100.0);
        }
        let fps = t.fps(1900.0);
        assert!((fps - 10.0).abs() < 1.0, "fps {fps}");
    }

    #[test]
    fn old_frames_age_out() {
        let mut t = StatsTracker::new();
        t.record_frame(0.0);
        t.record_frame(10_000.0);
        assert!(t.fps(10_000.0) < 1.0);
    }

    #[test]
    fn render_average_is_windowed() {
        let mut t = StatsTracker::new();
        for _ in 0..100 {
            t.record_render(10.0);
        }
        t.record_render(20.0);
        let avg = t.avg_render_time_ms();
        assert!(avg > 10.0 && avg < 11.0);
        assert!(!avg.is_nan());
    }

    #[test]
    fn empty_tracker_reports_zeros() {
        let t = StatsTracker::new();
        assert_eq!(t.fps(0.0), 0.0);
        assert_eq!(t.avg_render_time_ms(), 0.0);
    }

    #[test]
    fn snapshot_serializes_for_the_host() {
        let stats = EngineStats {
            fps: 30.0,
            avg_render_time_ms: 4.5,
            precision_tier: "dd",
            tile_counts: TileCounts {
                pending: 1,
                rendering: 2,
                complete: 9,
                error: 0,
            },
            cache_bytes: CacheBytes { l1: 1024, l2: 4096 },
            orbit_tiles_served: 3,
            orbits_computed: 1,
            jobs_dispatched: 12,
            l3_hits: 4,
            prefetch_cancelled: 0,
            l3_available: true,
            precision_exhausted: false,
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains(r#""precision_tier":"dd""#));
        assert!(json.contains(r#""complete":9"#));
    }
}
