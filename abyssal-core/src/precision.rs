//! Precision tier selection.
//!
//! Four tiers form a small closed set; the inner loop is chosen by tag,
//! not by virtual dispatch. Selection is a pure scale → tier table with
//! a cooldown window that keeps the tier from flickering when the scale
//! hovers near a boundary.

use serde::{Deserialize, Serialize};

/// Numeric path for a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Direct f64 iteration.
    Standard,
    /// Direct iteration with double-double scalars.
    DoubleDouble,
    /// Perturbation with f64 deltas against a shared reference orbit.
    Perturbation,
    /// Perturbation with a BigFixed-sized reference orbit.
    Arbitrary,
}

impl Tier {
    /// Stable tag for tile blobs.
    pub fn tag(self) -> u8 {
        match self {
            Tier::Standard => 0,
            Tier::DoubleDouble => 1,
            Tier::Perturbation => 2,
            Tier::Arbitrary => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Tier::Standard),
            1 => Some(Tier::DoubleDouble),
            2 => Some(Tier::Perturbation),
            3 => Some(Tier::Arbitrary),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::DoubleDouble => "dd",
            Tier::Perturbation => "perturbation",
            Tier::Arbitrary => "arbitrary",
        }
    }

    /// Whether this tier consumes a shared reference orbit.
    pub fn needs_orbit(self) -> bool {
        matches!(self, Tier::Perturbation | Tier::Arbitrary)
    }

    /// Ranking for "finer data wins on overwrite" cache decisions.
    pub fn fineness(self) -> u8 {
        self.tag()
    }
}

/// Scale boundaries between tiers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub dd: f64,
    pub perturbation: f64,
    pub arbitrary: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            dd: 5e-6,
            perturbation: 1e-10,
            arbitrary: 1e-14,
        }
    }
}

/// Pure scale → tier decision.
pub fn tier_for_scale(scale: f64, thresholds: &TierThresholds) -> Tier {
    if scale >= thresholds.dd {
        Tier::Standard
    } else if scale >= thresholds.perturbation {
        Tier::DoubleDouble
    } else if scale >= thresholds.arbitrary {
        Tier::Perturbation
    } else {
        Tier::Arbitrary
    }
}

/// Limb count for the reference orbit at a given scale:
/// clamp(ceil(−log10(scale)/9.6) + 2, 4, 64). Each limb buys ~9.6
/// decimal digits.
pub fn limbs_for_scale(scale: f64) -> usize {
    let digits = -scale.log10();
    let limbs = (digits / 9.6).ceil() as i64 + 2;
    limbs.clamp(4, 64) as usize
}

/// Deepest scale the tile grid can index; below this the engine reports
/// `PrecisionExhausted` and keeps rendering at the floor.
pub const MIN_SCALE: f64 = 2e-18;

/// Iteration budget suggestion for a scale: 200 · zoom_exp^2.8 clamped
/// to [1000, 10_000_000]. Hosts may ignore it.
pub fn suggested_max_iter(scale: f64) -> u32 {
    let zoom_exp = (4.0 / scale).log10().max(1.0);
    let iters = 200.0 * zoom_exp.powf(2.8);
    (iters as u32).clamp(1000, 10_000_000)
}

/// Tier decision with hysteresis. A proposed change is suppressed while
/// the previous change is younger than the cooldown window.
#[derive(Clone, Debug)]
pub struct PrecisionSelector {
    thresholds: TierThresholds,
    cooldown_ms: f64,
    current: Tier,
    last_change_ms: f64,
}

impl PrecisionSelector {
    pub fn new(thresholds: TierThresholds, cooldown_ms: f64) -> Self {
        Self {
            thresholds,
            cooldown_ms,
            current: Tier::Standard,
            last_change_ms: f64::NEG_INFINITY,
        }
    }

    pub fn current(&self) -> Tier {
        self.current
    }

    pub fn select(&mut self, scale: f64, now_ms: f64) -> Tier {
        let proposed = tier_for_scale(scale, &self.thresholds);
        if proposed != self.current && now_ms - self.last_change_ms >= self.cooldown_ms {
            self.current = proposed;
            self.last_change_ms = now_ms;
        }
        self.current
    }
}
