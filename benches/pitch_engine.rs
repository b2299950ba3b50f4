//! Per-block cost of the pitch engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use yoke_client::audio::{PitchControl, PitchEngine};

const RATE: u32 = 48_000;

fn sine(len: usize, freq: f32) -> Vec<f32> {
    (0..len)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32).sin() * 0.5)
        .collect()
}

fn bench_process_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("pitch_engine");

    for semitones in [0.0f32, 3.0, -7.0] {
        for block in [256usize, 1024] {
            let control = PitchControl::new(12.0);
            control.set_semitones(semitones);
            let mut engine = PitchEngine::new(control, RATE, block);

            let left = sine(block, 220.0);
            let right = sine(block, 330.0);
            let mut left_out = vec![0.0; block];
            let mut right_out = vec![0.0; block];

            group.bench_with_input(
                BenchmarkId::new(format!("{:+}st", semitones), block),
                &block,
                |b, _| {
                    b.iter(|| {
                        engine.process(
                            black_box(&left),
                            black_box(&right),
                            &mut left_out,
                            &mut right_out,
                        );
                    })
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_process_block);
criterion_main!(benches);
