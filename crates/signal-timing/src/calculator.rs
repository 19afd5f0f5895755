//! Green-time calculator

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;
use traffic_model::Direction;

/// Inclusive green-time bounds in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreenBounds {
    pub min_green: u32,
    pub max_green: u32,
}

impl GreenBounds {
    /// Bounds with the endpoints put in order
    pub fn new(min_green: u32, max_green: u32) -> Self {
        Self {
            min_green: min_green.min(max_green),
            max_green: min_green.max(max_green),
        }
    }

    pub fn clamp(&self, seconds: u32) -> u32 {
        seconds.clamp(self.min_green, self.max_green)
    }

    pub fn span(&self) -> u32 {
        self.max_green - self.min_green
    }
}

impl Default for GreenBounds {
    fn default() -> Self {
        Self::new(15, 120)
    }
}

/// Proportional green-time allocator.
///
/// `min_green + floor(count / total * (max_green - min_green) * k)`, clamped.
/// Stateless: the same counts always produce the same allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveTimingCalculator {
    scaling: f64,
}

impl AdaptiveTimingCalculator {
    /// Create a calculator with scaling constant `k`; non-finite or negative
    /// values fall back to the plain proportional rule
    pub fn new(scaling: f64) -> Self {
        let scaling = if scaling.is_finite() && scaling >= 0.0 {
            scaling
        } else {
            1.0
        };
        Self { scaling }
    }

    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    /// Allocate green time to every direction present in `direction_counts`.
    ///
    /// Negative counts are treated as zero. Directions absent from the input
    /// are absent from the output.
    pub fn compute(
        &self,
        direction_counts: &BTreeMap<Direction, i64>,
        min_green: u32,
        max_green: u32,
    ) -> BTreeMap<Direction, u32> {
        let bounds = GreenBounds::new(min_green, max_green);
        let total: f64 = direction_counts.values().map(|&c| c.max(0) as f64).sum();

        let timings: BTreeMap<Direction, u32> = direction_counts
            .iter()
            .map(|(&direction, &count)| {
                let green = if total <= 0.0 {
                    bounds.min_green
                } else {
                    // multiply before dividing so exact shares stay exact
                    let weighted = count.max(0) as f64 * bounds.span() as f64 * self.scaling;
                    let extra = (weighted / total).floor();
                    let raw = bounds.min_green as f64 + extra;
                    raw.clamp(bounds.min_green as f64, bounds.max_green as f64) as u32
                };
                (direction, green)
            })
            .collect();

        trace!("Adaptive timing calculated: {:?}", timings);
        timings
    }
}

impl Default for AdaptiveTimingCalculator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn counts(entries: &[(Direction, i64)]) -> BTreeMap<Direction, i64> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_north_south_scenario() {
        let calc = AdaptiveTimingCalculator::default();
        let timings = calc.compute(
            &counts(&[(Direction::North, 25), (Direction::South, 10)]),
            15,
            120,
        );
        // 15 + floor(25/35 * 105) = 90, 15 + floor(10/35 * 105) = 45
        assert_eq!(timings[&Direction::North], 90);
        assert_eq!(timings[&Direction::South], 45);
        assert!(timings[&Direction::North] > timings[&Direction::South]);
    }

    #[test]
    fn test_no_traffic_gets_min_green() {
        let calc = AdaptiveTimingCalculator::default();
        let timings = calc.compute(
            &counts(&[(Direction::East, 0), (Direction::West, 0)]),
            15,
            120,
        );
        assert_eq!(timings[&Direction::East], 15);
        assert_eq!(timings[&Direction::West], 15);
    }

    #[test]
    fn test_inactive_directions_absent() {
        let calc = AdaptiveTimingCalculator::default();
        let timings = calc.compute(&counts(&[(Direction::West, 8)]), 15, 120);
        assert_eq!(timings.len(), 1);
        assert_eq!(timings[&Direction::West], 120);
        assert!(!timings.contains_key(&Direction::North));
    }

    #[test]
    fn test_negative_counts_treated_as_zero() {
        let calc = AdaptiveTimingCalculator::default();
        let timings = calc.compute(
            &counts(&[(Direction::North, -40), (Direction::South, 10)]),
            15,
            120,
        );
        assert_eq!(timings[&Direction::North], 15);
        assert_eq!(timings[&Direction::South], 120);
    }

    #[test]
    fn test_scaling_constant_clamped_to_max() {
        let calc = AdaptiveTimingCalculator::new(3.0);
        let timings = calc.compute(
            &counts(&[(Direction::North, 25), (Direction::South, 10)]),
            15,
            120,
        );
        assert_eq!(timings[&Direction::North], 120);
        assert_eq!(timings[&Direction::South], 120);
        assert_eq!(AdaptiveTimingCalculator::new(f64::NAN).scaling(), 1.0);
    }

    #[test]
    fn test_empty_input() {
        let calc = AdaptiveTimingCalculator::default();
        assert!(calc.compute(&BTreeMap::new(), 15, 120).is_empty());
    }

    fn direction_counts() -> impl Strategy<Value = BTreeMap<Direction, i64>> {
        proptest::collection::btree_map(
            prop_oneof![
                Just(Direction::North),
                Just(Direction::South),
                Just(Direction::East),
                Just(Direction::West),
            ],
            -50i64..10_000,
            1..=4,
        )
    }

    proptest! {
        #[test]
        fn prop_fairness_bound(
            counts in direction_counts(),
            min_green in 1u32..60,
            extra in 0u32..200,
            k in 0.0f64..4.0,
        ) {
            let max_green = min_green + extra;
            let timings = AdaptiveTimingCalculator::new(k).compute(&counts, min_green, max_green);
            prop_assert_eq!(timings.len(), counts.len());
            for green in timings.values() {
                prop_assert!(*green >= min_green && *green <= max_green);
            }
        }

        #[test]
        fn prop_zero_starvation(counts in direction_counts(), min_green in 1u32..60) {
            let max_green = min_green + 100;
            let timings = AdaptiveTimingCalculator::default().compute(&counts, min_green, max_green);
            for (direction, count) in &counts {
                if *count <= 0 {
                    prop_assert_eq!(timings[direction], min_green);
                }
            }
        }

        #[test]
        fn prop_deterministic(counts in direction_counts()) {
            let calc = AdaptiveTimingCalculator::default();
            prop_assert_eq!(calc.compute(&counts, 15, 120), calc.compute(&counts, 15, 120));
        }

        #[test]
        fn prop_monotonic_in_count(a in 0i64..500, b in 0i64..500) {
            let calc = AdaptiveTimingCalculator::default();
            let timings = calc.compute(
                &[(Direction::North, a), (Direction::South, b)].into_iter().collect(),
                15,
                120,
            );
            if a > b {
                prop_assert!(timings[&Direction::North] >= timings[&Direction::South]);
            }
        }
    }
}
