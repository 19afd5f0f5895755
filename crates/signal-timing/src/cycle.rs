//! Cycle length recommendation and timing efficiency

use std::collections::BTreeMap;
use traffic_model::Direction;

/// Upper bound for any recommended cycle
const MAX_CYCLE_SECONDS: u32 = 240;

/// Recommend a full signal cycle length from total demand.
///
/// Light traffic gets a short 60s cycle; heavier traffic lengthens the base
/// cycle (120s in peak hours, 90s otherwise).
pub fn recommend_cycle_length(direction_counts: &BTreeMap<Direction, i64>, peak_hour: bool) -> u32 {
    let total = direction_counts
        .values()
        .fold(0i64, |acc, &c| acc.saturating_add(c.max(0)));
    let base = if peak_hour { 120 } else { 90 };

    let cycle = match total {
        t if t < 10 => 60,
        t if t < 30 => base,
        t if t < 50 => base + 30,
        _ => base + 60,
    };

    cycle.min(MAX_CYCLE_SECONDS)
}

/// Score (0-100) of how closely green-time shares match traffic shares
pub fn timing_efficiency(
    direction_counts: &BTreeMap<Direction, i64>,
    timings: &BTreeMap<Direction, u32>,
) -> f64 {
    if direction_counts.is_empty() || timings.is_empty() {
        return 0.0;
    }

    let total_vehicles: f64 = direction_counts.values().map(|&c| c.max(0) as f64).sum();
    let total_green: f64 = timings.values().map(|&t| t as f64).sum();
    if total_green == 0.0 {
        return 0.0;
    }

    let scores: Vec<f64> = direction_counts
        .iter()
        .filter_map(|(direction, &count)| {
            let green = *timings.get(direction)? as f64;
            let traffic_share = if total_vehicles > 0.0 {
                count.max(0) as f64 / total_vehicles
            } else {
                0.0
            };
            let time_share = green / total_green;
            Some(1.0 - (traffic_share - time_share).abs())
        })
        .collect();

    if scores.is_empty() {
        return 0.0;
    }

    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    (mean * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(total_per_dir: &[(Direction, i64)]) -> BTreeMap<Direction, i64> {
        total_per_dir.iter().copied().collect()
    }

    #[test]
    fn test_cycle_length_bands() {
        assert_eq!(recommend_cycle_length(&counts(&[(Direction::North, 5)]), false), 60);
        assert_eq!(recommend_cycle_length(&counts(&[(Direction::North, 20)]), false), 90);
        assert_eq!(recommend_cycle_length(&counts(&[(Direction::North, 20)]), true), 120);
        assert_eq!(recommend_cycle_length(&counts(&[(Direction::North, 40)]), false), 120);
        assert_eq!(recommend_cycle_length(&counts(&[(Direction::North, 90)]), true), 180);
    }

    #[test]
    fn test_cycle_length_saturates() {
        let c = counts(&[(Direction::North, i64::MAX), (Direction::South, i64::MAX)]);
        assert_eq!(recommend_cycle_length(&c, true), 180);
    }

    #[test]
    fn test_perfect_efficiency() {
        let c = counts(&[(Direction::North, 30), (Direction::South, 30)]);
        let t: BTreeMap<_, _> = [(Direction::North, 40), (Direction::South, 40)].into_iter().collect();
        assert_eq!(timing_efficiency(&c, &t), 100.0);
    }

    #[test]
    fn test_mismatched_efficiency() {
        let c = counts(&[(Direction::North, 30), (Direction::South, 0)]);
        let t: BTreeMap<_, _> = [(Direction::North, 50), (Direction::South, 50)].into_iter().collect();
        assert_eq!(timing_efficiency(&c, &t), 50.0);
        assert_eq!(timing_efficiency(&BTreeMap::new(), &t), 0.0);
    }
}
