//! Reproducibility of the virtual-clock scenarios.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use crate::common::quick_scenario;
use rewindkit::config::ScenarioConfig;
use rewindkit::harness::lag_scenario::LagCompensationScenario;
use rewindkit::harness::prediction_scenario::PredictionScenario;
use rewindkit::telemetry::CollectingObserver;
use rewindkit::MovementPattern;

fn lossy(seed: u64) -> ScenarioConfig {
    ScenarioConfig {
        packet_loss_rate: 0.05,
        jitter_ms: 10.0,
        movement_pattern: MovementPattern::RandomWalk,
        ..quick_scenario(seed)
    }
}

#[test]
fn lag_scenario_is_reproducible() {
    let first = LagCompensationScenario::new(lossy(42)).unwrap().run().unwrap();
    let second = LagCompensationScenario::new(lossy(42)).unwrap().run().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.digest, second.digest);
}

#[test]
fn prediction_scenario_is_reproducible() {
    let first = PredictionScenario::new(lossy(7)).unwrap().run().unwrap();
    let second = PredictionScenario::new(lossy(7)).unwrap().run().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.digest, second.digest);
}

#[test]
fn different_seeds_diverge() {
    let a = LagCompensationScenario::new(lossy(1)).unwrap().run().unwrap();
    let b = LagCompensationScenario::new(lossy(2)).unwrap().run().unwrap();
    assert_ne!(a.digest, b.digest);
}

#[test]
fn observers_do_not_change_results() {
    let plain = PredictionScenario::new(lossy(9)).unwrap().run().unwrap();
    let observer = Arc::new(CollectingObserver::new());
    let observed = PredictionScenario::with_observer(lossy(9), observer.clone())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(plain.digest, observed.digest);

    let plain = LagCompensationScenario::new(lossy(9)).unwrap().run().unwrap();
    let observed = LagCompensationScenario::with_observer(lossy(9), observer)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(plain.digest, observed.digest);
}

#[test]
fn every_pattern_is_reproducible() {
    for pattern in [
        MovementPattern::RandomWalk,
        MovementPattern::Circular,
        MovementPattern::Static,
        MovementPattern::Zigzag,
    ] {
        let config = ScenarioConfig {
            movement_pattern: pattern,
            ..lossy(3)
        };
        let a = LagCompensationScenario::new(config.clone()).unwrap().run().unwrap();
        let b = LagCompensationScenario::new(config).unwrap().run().unwrap();
        assert_eq!(a.digest, b.digest, "pattern {pattern}");
    }
}
