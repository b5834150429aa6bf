//! Lag compensation scenario tests.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use std::sync::Arc;

use crate::common::quick_scenario;
use rewindkit::config::ScenarioConfig;
use rewindkit::harness::lag_scenario::LagCompensationScenario;
use rewindkit::telemetry::{CollectingObserver, EventKind};
use rewindkit::{MovementPattern, NetworkConditions};

#[test]
fn every_pattern_produces_a_consistent_report() {
    for pattern in MovementPattern::ALL {
        let config = ScenarioConfig {
            movement_pattern: pattern,
            ..quick_scenario(21)
        };
        let report = LagCompensationScenario::new(config).unwrap().run().unwrap();
        let lag = report.lag_compensation.unwrap();
        assert_eq!(lag.total_shots, lag.hits + lag.misses + lag.rejected + lag.invalid);
        assert!(lag.total_shots > 0, "{pattern}: no shots");
        assert!(report.prediction.is_none());
        assert_eq!(report.name, format!("lag-compensation/{pattern}"));
    }
}

#[test]
fn latency_beyond_the_window_is_always_rejected() {
    let observer = Arc::new(CollectingObserver::new());
    let config = ScenarioConfig {
        latency_range_ms: (250.0, 300.0),
        ..quick_scenario(22)
    };
    let report = LagCompensationScenario::with_observer(config, observer.clone())
        .unwrap()
        .run()
        .unwrap();
    let lag = report.lag_compensation.unwrap();
    assert_eq!(lag.rejected, lag.total_shots);
    assert_eq!(lag.rejection_rate, 1.0);
    assert_eq!(
        observer.count_of_kind(EventKind::InvalidCompensationWindow) as u64,
        lag.total_shots
    );
    assert_eq!(report.quality, rewindkit::Quality::Poor);
}

#[test]
fn compensation_tracks_link_latency() {
    let config = ScenarioConfig {
        latency_range_ms: (80.0, 80.0),
        ..quick_scenario(23)
    };
    let lag = LagCompensationScenario::new(config)
        .unwrap()
        .run()
        .unwrap()
        .lag_compensation
        .unwrap();
    // Without jitter every shot is rewound by exactly the link delay.
    assert!((lag.average_compensation_time - 0.08).abs() < 1e-6);
    assert!((lag.max_compensation_time - 0.08).abs() < 1e-6);
}

#[test]
fn a_lossy_preset_drops_some_shots() {
    let config = ScenarioConfig {
        duration_seconds: 30.0,
        shots_per_second: 10.0,
        ..ScenarioConfig::deterministic(24).with_network(&NetworkConditions::mobile_3g())
    };
    let report = LagCompensationScenario::new(config).unwrap().run().unwrap();
    assert!(report.network.dropped > 0);
    let lag = report.lag_compensation.unwrap();
    // Dropped shots never reach the server.
    assert_eq!(lag.total_shots + report.network.dropped, report.network.sent);
}
