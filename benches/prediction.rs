//! Benchmarks for client prediction and reconciliation.
//!
//! Run with: cargo bench --bench prediction

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rewindkit::config::{PredictionConfig, ScenarioConfig};
use rewindkit::harness::prediction_scenario::PredictionScenario;
use rewindkit::{ClientPrediction, PlayerInput, SequenceNumber, Vector3};

fn inputs(count: u32) -> Vec<PlayerInput> {
    (1..=count)
        .map(|seq| {
            let phase = f64::from(seq) * 0.1;
            PlayerInput::new(
                SequenceNumber::new(seq),
                f64::from(seq) / 60.0,
                Vector3::new(phase.cos(), 0.0, phase.sin()),
            )
        })
        .collect()
}

fn predicted_client(inputs: &[PlayerInput]) -> ClientPrediction {
    let mut client = ClientPrediction::new(PredictionConfig::default());
    for input in inputs {
        let _ = client.predict(input.clone());
    }
    client
}

fn bench_predict(c: &mut Criterion) {
    let inputs = inputs(120);
    c.bench_function("ClientPrediction/predict_120", |b| {
        b.iter_batched(
            || ClientPrediction::new(PredictionConfig::default()),
            |mut client| {
                for input in &inputs {
                    black_box(client.predict(input.clone()));
                }
                client
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("ClientPrediction/rollback");

    // Inputs still pending behind the corrected one.
    for pending in [1u32, 10, 60] {
        let inputs = inputs(pending + 1);
        let template = predicted_client(&inputs);
        let mut corrected = template
            .buffered_states()
            .next()
            .copied()
            .expect("first prediction is buffered");
        corrected.position = corrected.position + Vector3::new(1.0, 0.0, 0.0);
        corrected.refresh_checksum();

        group.bench_with_input(BenchmarkId::from_parameter(pending), &corrected, |b, corrected| {
            b.iter_batched(
                || predicted_client(&inputs),
                |mut client| client.reconcile(black_box(corrected)),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_scenario(c: &mut Criterion) {
    let config = ScenarioConfig {
        duration_seconds: 2.0,
        num_entities: 4,
        ..ScenarioConfig::average_conditions()
    };
    let scenario = PredictionScenario::new(config).expect("valid config");
    let mut group = c.benchmark_group("PredictionScenario");
    group.sample_size(20);
    group.bench_function("average_2s_4_clients", |b| {
        b.iter(|| scenario.run().expect("scenario runs"));
    });
    group.finish();
}

criterion_group!(benches, bench_predict, bench_rollback, bench_scenario);
criterion_main!(benches);
