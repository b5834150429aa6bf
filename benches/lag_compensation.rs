//! Benchmarks for history lookups and shot processing.
//!
//! Run with: cargo bench --bench lag_compensation

use std::collections::BTreeMap;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rewindkit::config::LagCompensationConfig;
use rewindkit::history::{PositionHistory, PositionSnapshot};
use rewindkit::{Entity, EntityId, LagCompensationEngine, Shot, Vector3};

const TICK: f64 = 1.0 / 60.0;

fn filled_history(seconds: f64) -> PositionHistory {
    let id = EntityId::new(1);
    let mut history = PositionHistory::new(id, seconds);
    let ticks = (seconds / TICK) as u32;
    for tick in 0..=ticks {
        let t = f64::from(tick) * TICK;
        let snapshot = PositionSnapshot::new(
            t,
            id,
            Vector3::new(t * 5.0, 0.0, t.sin()),
            Vector3::new(5.0, 0.0, t.cos()),
            100.0,
        );
        history.record(snapshot).expect("monotonic timestamps");
    }
    history
}

/// An engine with `entities` targets on a ring around the origin, recorded
/// for one second, and the matching live world.
fn ring_engine(entities: u32) -> (LagCompensationEngine, BTreeMap<EntityId, Entity>) {
    let engine = LagCompensationEngine::new(LagCompensationConfig::default());
    let mut world = BTreeMap::new();
    for tick in 0..=60 {
        let t = f64::from(tick) * TICK;
        for id in 1..=entities {
            let angle = f64::from(id) / f64::from(entities) * std::f64::consts::TAU + t;
            let entity = Entity::new(
                EntityId::new(id),
                Vector3::new(20.0 * angle.cos(), 0.0, 20.0 * angle.sin()),
            );
            engine
                .update_entity_position(&entity, t)
                .expect("monotonic timestamps");
            world.insert(entity.id, entity);
        }
    }
    (engine, world)
}

fn bench_history_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("PositionHistory");

    for seconds in [0.5, 1.0, 4.0] {
        let history = filled_history(seconds);
        group.bench_with_input(BenchmarkId::new("lookup", seconds), &history, |b, history| {
            let t = seconds * 0.37;
            b.iter(|| history.lookup(black_box(t)));
        });
    }

    group.bench_function("record_with_eviction", |b| {
        let mut history = filled_history(1.0);
        let id = history.entity_id();
        let mut t = 1.0;
        b.iter(|| {
            t += TICK;
            let snapshot = PositionSnapshot::new(t, id, Vector3::new(t, 0.0, 0.0), Vector3::ZERO, 100.0);
            history.record(black_box(snapshot)).expect("monotonic timestamps");
        });
    });

    group.finish();
}

fn bench_process_shot(c: &mut Criterion) {
    let mut group = c.benchmark_group("LagCompensationEngine");

    for entities in [4u32, 16, 64] {
        let (engine, world) = ring_engine(entities);
        let now = engine.server_time();
        let shot = Shot::new(1, EntityId::new(1), now, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.3))
            .with_latency(0.08);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("process_shot", entities),
            &(engine, world),
            |b, (engine, world)| {
                b.iter(|| engine.process_shot(black_box(&shot), world));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_history_lookup, bench_process_shot);
criterion_main!(benches);
