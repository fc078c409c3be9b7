use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{SlippageDirection, SlippageSample};

/// Impact (percent) assumed when a pool/direction has no samples: treat as illiquid.
pub const UNKNOWN_IMPACT_PCT: Decimal = Decimal::TEN;

/// Slope multiplier applied when extrapolating past the largest sample.
fn extrapolation_amplifier() -> Decimal {
    Decimal::new(15, 1) // 1.5
}

// ---------------------------------------------------------------------------
// SlippageCurve
// ---------------------------------------------------------------------------

/// Sparse (size, impact%) samples for one pool and direction, sorted by size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlippageCurve {
    points: Vec<(Decimal, Decimal)>,
}

static EMPTY_CURVE: SlippageCurve = SlippageCurve { points: Vec::new() };

impl SlippageCurve {
    /// Build a curve from unordered samples. Duplicate sizes keep the first seen.
    pub fn new(mut points: Vec<(Decimal, Decimal)>) -> Self {
        points.retain(|(size, _)| *size >= Decimal::ZERO);
        points.sort_by(|a, b| a.0.cmp(&b.0));
        points.dedup_by(|later, earlier| later.0 == earlier.0);
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn max_sample_size(&self) -> Option<Decimal> {
        self.points.last().map(|(size, _)| *size)
    }

    /// Interpolated price impact (percent) for a trade of `size`.
    ///
    /// - no samples: [`UNKNOWN_IMPACT_PCT`]
    /// - at or below the smallest sample: that sample's impact
    /// - between samples: linear interpolation
    /// - above the largest: last impact plus the last segment's slope × 1.5
    pub fn impact_at(&self, size: Decimal) -> Decimal {
        let Some(&(first_size, first_impact)) = self.points.first() else {
            return UNKNOWN_IMPACT_PCT;
        };

        if size <= first_size {
            return first_impact;
        }

        for pair in self.points.windows(2) {
            let (s0, i0) = pair[0];
            let (s1, i1) = pair[1];
            if size <= s1 {
                return i0 + (i1 - i0) * (size - s0) / (s1 - s0);
            }
        }

        let n = self.points.len();
        let (last_size, last_impact) = self.points[n - 1];
        if n < 2 {
            return last_impact;
        }

        let (prev_size, prev_impact) = self.points[n - 2];
        // Impact is treated as non-decreasing in size.
        let slope = ((last_impact - prev_impact) / (last_size - prev_size)).max(Decimal::ZERO);

        last_impact + (size - last_size) * slope * extrapolation_amplifier()
    }
}

// ---------------------------------------------------------------------------
// SlippageTable
// ---------------------------------------------------------------------------

/// All curves for a pass, keyed by (netuid, direction).
#[derive(Debug, Clone, Default)]
pub struct SlippageTable {
    curves: HashMap<(i32, SlippageDirection), SlippageCurve>,
}

impl SlippageTable {
    pub fn from_samples(samples: &[SlippageSample]) -> Self {
        let mut grouped: HashMap<(i32, SlippageDirection), Vec<(Decimal, Decimal)>> =
            HashMap::new();

        for sample in samples {
            let Some(direction) = SlippageDirection::from_str(&sample.direction) else {
                tracing::warn!(
                    netuid = sample.netuid,
                    direction = %sample.direction,
                    "Skipping slippage sample with unknown direction"
                );
                continue;
            };
            grouped
                .entry((sample.netuid, direction))
                .or_default()
                .push((sample.size, sample.impact_pct));
        }

        let curves = grouped
            .into_iter()
            .map(|(key, points)| (key, SlippageCurve::new(points)))
            .collect();

        Self { curves }
    }

    pub fn insert(&mut self, netuid: i32, direction: SlippageDirection, curve: SlippageCurve) {
        self.curves.insert((netuid, direction), curve);
    }

    /// Curve for a pool/direction; an empty curve when nothing was sampled.
    pub fn curve(&self, netuid: i32, direction: SlippageDirection) -> &SlippageCurve {
        self.curves.get(&(netuid, direction)).unwrap_or(&EMPTY_CURVE)
    }

    /// Curve used for exit decisions.
    pub fn exit_curve(&self, netuid: i32) -> &SlippageCurve {
        self.curve(netuid, SlippageDirection::Unstake)
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Bounded binary search
// ---------------------------------------------------------------------------

/// Largest size in `[0, upper]` for which `within` holds, assuming `within`
/// is monotone (true below some boundary, false above).
///
/// Runs at most `iterations` halvings and stops early once the bracket is
/// narrower than `precision`. Always returns the last size known to satisfy
/// `within` (zero if none did).
pub fn largest_size_within<F>(
    upper: Decimal,
    iterations: u32,
    precision: Decimal,
    within: F,
) -> Decimal
where
    F: Fn(Decimal) -> bool,
{
    if upper <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if within(upper) {
        return upper;
    }

    let mut lo = Decimal::ZERO;
    let mut hi = upper;
    for _ in 0..iterations {
        if hi - lo < precision {
            break;
        }
        let mid = (lo + hi) / Decimal::TWO;
        if within(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    lo
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
