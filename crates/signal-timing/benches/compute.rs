use criterion::{black_box, criterion_group, criterion_main, Criterion};
use signal_timing::AdaptiveTimingCalculator;
use std::collections::BTreeMap;
use traffic_model::Direction;

fn bench_compute(c: &mut Criterion) {
    let calc = AdaptiveTimingCalculator::default();
    let counts: BTreeMap<Direction, i64> = [
        (Direction::North, 25),
        (Direction::South, 10),
        (Direction::East, 42),
        (Direction::West, 0),
    ]
    .into_iter()
    .collect();

    c.bench_function("adaptive_compute_4_directions", |b| {
        b.iter(|| calc.compute(black_box(&counts), 15, 120))
    });
}

criterion_group!(benches, bench_compute);
criterion_main!(benches);
