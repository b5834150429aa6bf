//! Fuzz target for `LagCompensationEngine::process_shot`.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary shots, including NaN and infinite fields
//! - Outcome counters always add up to the number of shots
//! - Only hits name a target, and never the shooter

#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rewindkit::config::LagCompensationConfig;
use rewindkit::{Entity, EntityId, HitResult, LagCompensationEngine, Shot, Vector3};

#[derive(Debug, Arbitrary)]
struct FuzzEntity {
    id: u8,
    x: i8,
    z: i8,
    vx: i8,
    radius: u8,
    health: i8,
    /// Ticks this entity is recorded for, capped at 120.
    ticks: u8,
}

#[derive(Debug, Arbitrary)]
struct FuzzShot {
    shooter: u8,
    timestamp: f64,
    latency: f64,
    origin: (f64, f64, f64),
    direction: (f64, f64, f64),
    target: (f64, f64, f64),
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    max_compensation_ms: u16,
    entities: Vec<FuzzEntity>,
    shots: Vec<FuzzShot>,
}

fn vector((x, y, z): (f64, f64, f64)) -> Vector3 {
    Vector3::new(x, y, z)
}

fuzz_target!(|input: FuzzInput| {
    let max_compensation = f64::from(input.max_compensation_ms.max(1)) / 1000.0;
    let config = LagCompensationConfig {
        max_compensation_time: max_compensation,
        history_retention: max_compensation.max(1.0),
        ..LagCompensationConfig::default()
    };
    let engine = LagCompensationEngine::new(config);

    let mut world = BTreeMap::new();
    for fuzz in input.entities.iter().take(32) {
        let mut entity = Entity::new(
            EntityId::new(u32::from(fuzz.id)),
            Vector3::new(f64::from(fuzz.x), 0.0, f64::from(fuzz.z)),
        )
        .with_velocity(Vector3::new(f64::from(fuzz.vx), 0.0, 0.0))
        .with_hitbox_radius(f64::from(fuzz.radius) / 32.0)
        .with_health(f64::from(fuzz.health));
        for tick in 0..=fuzz.ticks.min(120) {
            let t = f64::from(tick) / 60.0;
            entity.position.x = f64::from(fuzz.x) + f64::from(fuzz.vx) * t;
            // Duplicate ids may already be ahead; those records are rejected.
            let _ = engine.update_entity_position(&entity, t);
        }
        world.insert(entity.id, entity);
    }

    let shots = input.shots.iter().take(64);
    let mut processed = 0;
    for (shot_id, fuzz) in (0u64..).zip(shots) {
        let shooter = EntityId::new(u32::from(fuzz.shooter));
        let shot = Shot::new(
            shot_id,
            shooter,
            fuzz.timestamp,
            vector(fuzz.origin),
            vector(fuzz.direction),
        )
        .with_latency(fuzz.latency)
        .aimed_at(vector(fuzz.target));

        let outcome = engine.process_shot(&shot, &world);
        processed += 1;
        match outcome.result {
            HitResult::Hit => {
                let target = outcome.target.expect("hits name their target");
                assert_ne!(target, shooter);
                assert!(world.contains_key(&target));
            },
            HitResult::Rejected => {
                let c = outcome.compensation_time;
                assert!(c.is_nan() || c < 0.0 || c > max_compensation);
            },
            HitResult::Miss | HitResult::Invalid => assert!(outcome.target.is_none()),
        }
    }

    let metrics = engine.metrics();
    assert_eq!(metrics.total_shots, processed);
    assert_eq!(
        metrics.hits + metrics.misses + metrics.rejected + metrics.invalid,
        metrics.total_shots
    );
    assert!(metrics.compensation_times.iter().all(|c| c.is_finite()));
});
