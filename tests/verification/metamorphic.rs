//! Metamorphic tests: transformations of the input that must not change the
//! outcome.
//!
//! # Relations
//!
//! 1. **Translation**: moving the whole world and the shooter by a constant
//!    offset gives the same verdicts
//! 2. **Update order**: recording entities of one tick in any order gives the
//!    same verdicts
//! 3. **Perceived time**: only `timestamp - latency` decides what a shot sees
//! 4. **Threshold**: a threshold above every error turns reconciliation into
//!    pure confirmation

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use std::collections::BTreeMap;

use crate::common::{forward_inputs, RECORD_INTERVAL, TARGET_SPEED};
use rewindkit::config::{LagCompensationConfig, PredictionConfig};
use rewindkit::{
    ClientPrediction, Entity, EntityId, HitResult, LagCompensationEngine, ReconcileOutcome, Shot,
    ShotOutcome, Vector3,
};

const SHOOTER: EntityId = EntityId::new(1);

/// Three targets crossing in front of the shooter, recorded for one second.
/// Entities are recorded each tick in the order given by `order`.
fn crossing_world(
    offset: Vector3,
    order: &[u32],
) -> (LagCompensationEngine, BTreeMap<EntityId, Entity>) {
    let engine = LagCompensationEngine::new(LagCompensationConfig::default());
    let start = |id: u32| match id {
        1 => Vector3::new(0.0, 0.0, -10.0),
        2 => Vector3::new(-5.0, 0.0, 0.0),
        3 => Vector3::new(5.0, 0.0, 4.0),
        _ => Vector3::new(0.0, 2.0, 8.0),
    };
    let velocity = |id: u32| match id {
        1 => Vector3::ZERO,
        2 => Vector3::new(TARGET_SPEED, 0.0, 0.0),
        3 => Vector3::new(-TARGET_SPEED, 0.0, 0.0),
        _ => Vector3::new(0.0, 0.0, -2.0),
    };

    let mut world = BTreeMap::new();
    for tick in 0..=60 {
        let t = f64::from(tick) * RECORD_INTERVAL;
        for &id in order {
            let entity = Entity::new(EntityId::new(id), start(id) + velocity(id) * t + offset)
                .with_velocity(velocity(id));
            engine.update_entity_position(&entity, t).unwrap();
            world.insert(entity.id, entity);
        }
    }
    (engine, world)
}

/// Shots aimed at each target's rewound and live positions at a few latencies.
fn volley(
    engine: &LagCompensationEngine,
    world: &BTreeMap<EntityId, Entity>,
    offset: Vector3,
) -> Vec<ShotOutcome> {
    let origin = world[&SHOOTER].position;
    let now = engine.server_time();
    let mut outcomes = Vec::new();
    let mut shot_id = 0;
    for latency in [0.0, 0.05, 0.125, 0.19, 0.3] {
        for target in [2, 3, 4] {
            let id = EntityId::new(target);
            let rewound = engine
                .rewind(id, now - latency)
                .map_or(world[&id].position, |s| s.position);
            for aim in [rewound, world[&id].position, Vector3::new(40.0, 0.0, 0.0) + offset] {
                shot_id += 1;
                let shot = Shot::new(shot_id, SHOOTER, now, origin, aim - origin)
                    .with_latency(latency)
                    .aimed_at(aim);
                outcomes.push(engine.process_shot(&shot, world));
            }
        }
    }
    outcomes
}

#[test]
fn translating_the_world_keeps_verdicts() {
    let (engine, world) = crossing_world(Vector3::ZERO, &[1, 2, 3, 4]);
    let baseline = volley(&engine, &world, Vector3::ZERO);
    assert!(baseline.iter().any(|o| o.result == HitResult::Hit));
    assert!(baseline.iter().any(|o| o.result == HitResult::Miss));
    assert!(baseline.iter().any(|o| o.result == HitResult::Rejected));
    let baseline_hits = engine.report().hits;

    let verdicts = |outcomes: &[ShotOutcome]| {
        outcomes
            .iter()
            .map(|o| (o.result, o.target))
            .collect::<Vec<_>>()
    };
    for offset in [
        Vector3::new(100.0, 0.0, 0.0),
        Vector3::new(-37.5, 12.0, 250.0),
        Vector3::new(0.0, 0.0, -512.0),
    ] {
        let (engine, world) = crossing_world(offset, &[1, 2, 3, 4]);
        let moved = volley(&engine, &world, offset);
        assert_eq!(verdicts(&baseline), verdicts(&moved), "offset {offset}");
        assert_eq!(engine.report().hits, baseline_hits);
    }
}

#[test]
fn update_order_does_not_matter() {
    let (engine, world) = crossing_world(Vector3::ZERO, &[1, 2, 3, 4]);
    let forward = volley(&engine, &world, Vector3::ZERO);
    let (engine, world) = crossing_world(Vector3::ZERO, &[4, 3, 2, 1]);
    let backward = volley(&engine, &world, Vector3::ZERO);
    assert_eq!(forward, backward);
}

#[test]
fn only_perceived_time_matters() {
    let (engine, world) = crossing_world(Vector3::ZERO, &[1, 2, 3, 4]);
    let now = engine.server_time();
    let origin = world[&SHOOTER].position;
    let aim = engine.rewind(EntityId::new(2), now - 0.0625).unwrap().position;

    // Received later with a proportionally larger latency: same instant seen.
    let early = Shot::new(1, SHOOTER, now - 0.03125, origin, aim - origin).with_latency(0.03125);
    let late = Shot::new(2, SHOOTER, now, origin, aim - origin).with_latency(0.0625);
    assert_eq!(early.perceived_time(), late.perceived_time());

    let a = engine.process_shot(&early, &world);
    let b = engine.process_shot(&late, &world);
    assert_eq!(a, b);
    assert_eq!(a.result, HitResult::Hit);
    assert_eq!(a.target, Some(EntityId::new(2)));
}

#[test]
fn generous_threshold_never_rolls_back() {
    let config = PredictionConfig {
        rollback_error_threshold: 1.0e6,
        ..PredictionConfig::default()
    };
    let mut client = ClientPrediction::new(config);
    let inputs = forward_inputs(20);
    for input in &inputs {
        let _ = client.predict(input.clone());
    }
    let trajectory = *client.current_state();

    let buffered: Vec<_> = client.buffered_states().copied().collect();
    for (i, state) in buffered.iter().enumerate().step_by(3) {
        let mut nudged = *state;
        nudged.position = nudged.position + Vector3::new(0.0, 0.0, i as f64);
        nudged.refresh_checksum();
        assert!(matches!(
            client.reconcile(&nudged),
            ReconcileOutcome::Confirmed { .. }
        ));
    }
    assert_eq!(*client.current_state(), trajectory);
    assert_eq!(client.report().rollback_count, 0);
}
