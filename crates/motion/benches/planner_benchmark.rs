//! Throughput benchmarks for the look-ahead planner.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use motion::{Feed, Planner, Settings};

fn bench_plan_and_recompute(c: &mut Criterion) {
    let settings = Settings::default();

    c.bench_function("plan_zigzag_chain_16", |b| {
        b.iter(|| {
            let mut planner = Planner::new();
            for i in 0..16 {
                let x = (i + 1) as f32 * 2.0;
                let y = if i % 2 == 0 { 1.0 } else { -1.0 };
                planner
                    .plan_buffer_line(
                        black_box([x, y, 0.0, 0.0]),
                        Feed::UnitsPerMin(1500.0),
                        &settings,
                    )
                    .unwrap();
            }
            black_box(planner.len())
        })
    });

    c.bench_function("plan_discard_stream", |b| {
        b.iter(|| {
            let mut planner = Planner::new();
            for i in 0..64 {
                let x = (i + 1) as f32;
                planner
                    .plan_buffer_line(
                        black_box([x, 0.0, 0.0, 0.0]),
                        Feed::UnitsPerMin(3000.0),
                        &settings,
                    )
                    .unwrap();
                if planner.is_full() {
                    planner.current_block();
                    planner.discard_current_block();
                }
            }
            black_box(planner.len())
        })
    });
}

criterion_group!(benches, bench_plan_and_recompute);
criterion_main!(benches);
