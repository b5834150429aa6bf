//! Lag compensation engine tests.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::{straight_line_engine, RECORD_INTERVAL, TARGET_SPEED};
use rewindkit::config::LagCompensationConfig;
use rewindkit::telemetry::EventKind;
use rewindkit::{Entity, EntityId, HitResult, LagCompensationEngine, Shot, Vector3};

const SHOOTER: EntityId = EntityId::new(1);
const TARGET: EntityId = EntityId::new(2);

fn shooter_origin() -> Vector3 {
    Vector3::new(0.0, 0.0, -10.0)
}

/// A shot fired at server time 1.0 by a client `latency` seconds behind,
/// aimed at `aim`.
fn shot_at(aim: Vector3, latency: f64) -> Shot {
    Shot::new(1, SHOOTER, 1.0, shooter_origin(), aim - shooter_origin())
        .with_latency(latency)
        .aimed_at(aim)
}

// ============================================================================
// Rewind lookups
// ============================================================================

#[test]
fn rewind_returns_recorded_positions_exactly() {
    let (engine, _, _) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let t = 30.0 * RECORD_INTERVAL;
    let rewound = engine.rewind(TARGET, t).unwrap();
    assert_eq!(rewound.position, Vector3::new(TARGET_SPEED * t, 0.0, 0.0));
}

#[test]
fn rewind_interpolates_between_ticks() {
    let (engine, _, _) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let t = 30.5 * RECORD_INTERVAL;
    let rewound = engine.rewind(TARGET, t).unwrap();
    assert!((rewound.position.x - TARGET_SPEED * t).abs() < 1e-9);
    assert!(rewound.position.x > TARGET_SPEED * 30.0 * RECORD_INTERVAL);
    assert!(rewound.position.x < TARGET_SPEED * 31.0 * RECORD_INTERVAL);
}

#[test]
fn rewind_extrapolates_only_briefly() {
    let (engine, _, _) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let ahead = engine.rewind(TARGET, 1.05).unwrap();
    assert!((ahead.position.x - TARGET_SPEED * 1.05).abs() < 1e-9);
    assert!(engine.rewind(TARGET, 1.2).is_none());
}

#[test]
fn rewind_before_retention_finds_nothing() {
    let config = LagCompensationConfig {
        history_retention: 0.5,
        ..LagCompensationConfig::default()
    };
    let (engine, _, _) = straight_line_engine(config, 1.0);
    assert!(engine.rewind(TARGET, 0.2).is_none());
    assert!(engine.rewind(TARGET, 0.6).is_some());
    assert!(engine.rewind(EntityId::new(99), 0.6).is_none());
}

#[test]
fn out_of_order_updates_are_rejected() {
    let (engine, world, observer) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let target = world[&TARGET];
    assert!(engine.update_entity_position(&target, 0.5).is_err());
    assert!(observer.has_event(EventKind::OutOfOrderSnapshot));
    assert_eq!(engine.server_time(), 1.0);
}

// ============================================================================
// Shot classification
// ============================================================================

#[test]
fn aiming_where_the_target_was_hits() {
    let (engine, world, _) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    // 100 ms behind, the shooter saw the target at x = 9.
    let outcome = engine.process_shot(&shot_at(Vector3::new(9.0, 0.0, 0.0), 0.1), &world);
    assert_eq!(outcome.result, HitResult::Hit);
    assert_eq!(outcome.target, Some(TARGET));
    assert!((outcome.compensation_time - 0.1).abs() < 1e-9);
}

#[test]
fn aiming_where_the_target_is_now_misses_after_rewind() {
    let (engine, world, _) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let outcome = engine.process_shot(&shot_at(Vector3::new(10.0, 0.0, 0.0), 0.1), &world);
    assert_eq!(outcome.result, HitResult::Miss);
    assert_eq!(outcome.target, None);
    // The aim point was on the live target, so the miss is counted as suspicious.
    assert_eq!(engine.metrics().false_negatives, 1);
}

#[test]
fn shots_beyond_the_window_are_rejected_without_a_hit_test() {
    let (engine, world, observer) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let outcome = engine.process_shot(&shot_at(Vector3::new(7.0, 0.0, 0.0), 0.3), &world);
    assert_eq!(outcome.result, HitResult::Rejected);
    assert_eq!(outcome.target, None);
    assert!(observer.has_event(EventKind::InvalidCompensationWindow));

    let report = engine.report();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.hits, 0);
}

#[test]
fn shots_from_the_future_are_rejected() {
    let (engine, world, _) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let outcome = engine.process_shot(&shot_at(Vector3::new(10.0, 0.0, 0.0), -0.05), &world);
    assert_eq!(outcome.result, HitResult::Rejected);
    assert!(outcome.compensation_time < 0.0);
}

#[test]
fn the_window_edge_is_accepted() {
    let (engine, world, _) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let outcome = engine.process_shot(&shot_at(Vector3::new(8.0, 0.0, 0.0), 0.2), &world);
    assert_ne!(outcome.result, HitResult::Rejected);
}

#[test]
fn nan_latency_is_rejected() {
    let (engine, world, _) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let outcome = engine.process_shot(&shot_at(Vector3::new(9.0, 0.0, 0.0), f64::NAN), &world);
    assert_eq!(outcome.result, HitResult::Rejected);
    // Not a finite sample, so it does not skew the averages.
    assert!(engine.metrics().compensation_times.is_empty());
}

#[test]
fn shooting_backwards_misses() {
    let (engine, world, _) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let shot = Shot::new(1, SHOOTER, 1.0, shooter_origin(), Vector3::new(0.0, 0.0, -1.0))
        .with_latency(0.05)
        .aimed_at(Vector3::new(0.0, 0.0, -20.0));
    assert_eq!(engine.process_shot(&shot, &world).result, HitResult::Miss);
    assert_eq!(engine.metrics().false_negatives, 0);
}

#[test]
fn the_closest_entity_along_the_ray_takes_the_hit() {
    let engine = LagCompensationEngine::new(LagCompensationConfig::default());
    let shooter = Entity::new(SHOOTER, Vector3::ZERO);
    let near = Entity::new(EntityId::new(7), Vector3::new(5.0, 0.0, 0.0));
    let far = Entity::new(EntityId::new(3), Vector3::new(10.0, 0.0, 0.0));
    for entity in [&shooter, &near, &far] {
        engine.update_entity_position(entity, 1.0).unwrap();
    }
    let world: BTreeMap<EntityId, Entity> = [(shooter.id, shooter), (near.id, near), (far.id, far)]
        .into_iter()
        .collect();

    let shot = Shot::new(1, SHOOTER, 1.0, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0));
    let outcome = engine.process_shot(&shot, &world);
    assert_eq!(outcome.result, HitResult::Hit);
    assert_eq!(outcome.target, Some(near.id));
}

#[test]
fn a_target_dead_at_the_rewound_time_is_an_invalid_hit() {
    let observer = Arc::new(rewindkit::telemetry::CollectingObserver::new());
    let engine = LagCompensationEngine::with_observer(LagCompensationConfig::default(), observer.clone());
    let shooter = Entity::new(SHOOTER, Vector3::ZERO);
    let target = Entity::new(TARGET, Vector3::new(5.0, 0.0, 0.0));
    engine.update_entity_position(&shooter, 1.0).unwrap();
    engine.update_entity_position(&target.with_health(0.0), 0.9).unwrap();
    engine.update_entity_position(&target, 1.0).unwrap();
    let world: BTreeMap<EntityId, Entity> = [(shooter.id, shooter), (target.id, target)].into_iter().collect();

    let shot = Shot::new(1, SHOOTER, 1.0, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0)).with_latency(0.1);
    let outcome = engine.process_shot(&shot, &world);
    assert_eq!(outcome.result, HitResult::Invalid);
    assert_eq!(engine.metrics().false_positives, 1);
    assert!(observer.has_event(EventKind::InvalidHit));
}

#[test]
fn a_target_without_history_is_tested_live_but_never_validated() {
    let engine = LagCompensationEngine::new(LagCompensationConfig::default());
    let shooter = Entity::new(SHOOTER, Vector3::ZERO);
    engine.update_entity_position(&shooter, 1.0).unwrap();
    let stranger = Entity::new(EntityId::new(5), Vector3::new(4.0, 0.0, 0.0));
    let world: BTreeMap<EntityId, Entity> = [(shooter.id, shooter), (stranger.id, stranger)].into_iter().collect();

    let shot = Shot::new(1, SHOOTER, 1.0, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0)).with_latency(0.05);
    assert_eq!(engine.process_shot(&shot, &world).result, HitResult::Invalid);
}

#[test]
fn report_counts_add_up() {
    let (engine, world, _) = straight_line_engine(LagCompensationConfig::default(), 1.0);
    let aims = [
        (Vector3::new(9.0, 0.0, 0.0), 0.1),
        (Vector3::new(10.0, 0.0, 0.0), 0.1),
        (Vector3::new(9.0, 0.0, 0.0), 0.5),
        (Vector3::new(9.5, 0.0, 0.0), 0.05),
    ];
    for (aim, latency) in aims {
        let _ = engine.process_shot(&shot_at(aim, latency), &world);
    }
    let report = engine.report();
    assert_eq!(report.total_shots, 4);
    assert_eq!(report.total_shots, report.hits + report.misses + report.rejected + report.invalid);
    assert_eq!(report.hits, 2);
    assert_eq!(report.rejected, 1);
    assert!((report.hit_rate - 0.5).abs() < 1e-12);

    engine.reset_metrics();
    assert_eq!(engine.report().total_shots, 0);
    assert_eq!(engine.tracked_entities(), 2);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_recorders_and_shooters_agree_on_totals() {
    let engine = Arc::new(LagCompensationEngine::new(LagCompensationConfig::default()));
    let entities: Vec<Entity> = (1..=4)
        .map(|raw| Entity::new(EntityId::new(raw), Vector3::new(f64::from(raw) * 3.0, 0.0, 0.0)))
        .collect();
    let world: BTreeMap<EntityId, Entity> = entities.iter().map(|e| (e.id, *e)).collect();

    std::thread::scope(|scope| {
        for entity in &entities {
            let engine = &engine;
            scope.spawn(move || {
                for tick in 0..=60 {
                    engine.update_entity_position(entity, f64::from(tick) / 60.0).unwrap();
                }
            });
        }
        for shooter in 1..=4u32 {
            let engine = &engine;
            let world = &world;
            scope.spawn(move || {
                for n in 0..50u64 {
                    let shot = Shot::new(
                        u64::from(shooter) * 1000 + n,
                        EntityId::new(shooter),
                        1.0,
                        Vector3::new(0.0, 0.0, -5.0),
                        Vector3::new(0.0, 0.0, 1.0),
                    )
                    .with_latency(0.05);
                    let _ = engine.process_shot(&shot, world);
                }
            });
        }
    });

    let report = engine.report();
    assert_eq!(report.total_shots, 200);
    assert_eq!(report.total_shots, report.hits + report.misses + report.rejected + report.invalid);
    assert_eq!(engine.server_time(), 1.0);
    assert_eq!(engine.tracked_entities(), 4);
}
