//! Shared helpers for the integration tests.
//!
//! # Usage
//!
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{input, straight_line_engine};
//! ```

// Not every test binary uses every helper.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;

use rewindkit::config::{LagCompensationConfig, PredictionConfig, ScenarioConfig};
use rewindkit::prediction::{ClientPrediction, PlayerInput};
use rewindkit::telemetry::CollectingObserver;
use rewindkit::{Entity, EntityId, LagCompensationEngine, SequenceNumber, Vector3};

/// Speed of the entity recorded by [`straight_line_engine`], in units per second.
pub const TARGET_SPEED: f64 = 10.0;

/// Interval between recorded snapshots in [`straight_line_engine`].
pub const RECORD_INTERVAL: f64 = 1.0 / 60.0;

/// An input with sequence number `seq`, sampled at `seq / 60` seconds.
pub fn input(seq: u32, movement: Vector3) -> PlayerInput {
    PlayerInput::new(SequenceNumber::new(seq), f64::from(seq) / 60.0, movement)
}

/// `count` inputs pushing along +x.
pub fn forward_inputs(count: u32) -> Vec<PlayerInput> {
    (1..=count).map(|seq| input(seq, Vector3::new(1.0, 0.0, 0.0))).collect()
}

/// A prediction client with a collecting observer.
pub fn observed_client(config: PredictionConfig) -> (ClientPrediction, Arc<CollectingObserver>) {
    let observer = Arc::new(CollectingObserver::new());
    let client = ClientPrediction::with_observer(config, observer.clone());
    (client, observer)
}

/// An engine with entity 2 moving along +x at [`TARGET_SPEED`] from the
/// origin, recorded at 60 Hz for `seconds`, plus a stationary shooter
/// (entity 1) at `(0, 0, -10)`. Returns the engine, the live world and the
/// observer.
pub fn straight_line_engine(
    config: LagCompensationConfig,
    seconds: f64,
) -> (LagCompensationEngine, BTreeMap<EntityId, Entity>, Arc<CollectingObserver>) {
    let observer = Arc::new(CollectingObserver::new());
    let engine = LagCompensationEngine::with_observer(config, observer.clone());
    let shooter = Entity::new(EntityId::new(1), Vector3::new(0.0, 0.0, -10.0));
    let mut target = Entity::new(EntityId::new(2), Vector3::ZERO)
        .with_velocity(Vector3::new(TARGET_SPEED, 0.0, 0.0));

    let ticks = (seconds / RECORD_INTERVAL).round() as u32;
    for tick in 0..=ticks {
        let t = f64::from(tick) * RECORD_INTERVAL;
        target.position = Vector3::new(TARGET_SPEED * t, 0.0, 0.0);
        engine.update_entity_position(&shooter, t).unwrap();
        engine.update_entity_position(&target, t).unwrap();
    }

    let world = [(shooter.id, shooter), (target.id, target)].into_iter().collect();
    (engine, world, observer)
}

/// Routes library logs to the test output, filtered by `RUST_LOG`. Later
/// calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A short, lossless scenario.
pub fn quick_scenario(seed: u64) -> ScenarioConfig {
    ScenarioConfig {
        duration_seconds: 2.0,
        num_entities: 4,
        ..ScenarioConfig::deterministic(seed)
    }
}
