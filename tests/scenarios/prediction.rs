//! Prediction scenario tests.

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
use rewindkit::config::{ScenarioConfig, ServerConfig};
use rewindkit::harness::prediction_scenario::PredictionScenario;
use rewindkit::telemetry::{CollectingObserver, EventKind};
use rewindkit::{MovementPattern, Quality};

#[test]
fn a_clean_link_confirms_every_prediction() {
    for pattern in MovementPattern::ALL {
        let config = ScenarioConfig {
            movement_pattern: pattern,
            ..quick_scenario(31)
        };
        let report = PredictionScenario::new(config).unwrap().run().unwrap();
        let prediction = report.prediction.unwrap();
        assert_eq!(prediction.total_inputs, 4 * 119, "{pattern}");
        assert_eq!(prediction.rollback_count, 0, "{pattern}");
        assert_eq!(prediction.desync_events, 0, "{pattern}");
        assert_eq!(prediction.prediction_accuracy, 1.0, "{pattern}");
        assert_eq!(report.quality, Quality::Excellent, "{pattern}");
        assert!(report.lag_compensation.is_none());
    }
}

#[test]
fn loss_shows_up_as_rollbacks_not_desyncs() {
    let observer = Arc::new(CollectingObserver::new());
    let config = ScenarioConfig {
        packet_loss_rate: 0.25,
        jitter_ms: 15.0,
        ..quick_scenario(32)
    };
    let report = PredictionScenario::with_observer(config, observer.clone())
        .unwrap()
        .run()
        .unwrap();
    let prediction = report.prediction.unwrap();
    let server = report.server.unwrap();

    assert!(prediction.rollback_count > 0);
    assert_eq!(
        observer.count_of_kind(EventKind::Rollback) as u64,
        prediction.rollback_count
    );
    // The default buffer covers two seconds, far more than one round trip.
    assert_eq!(prediction.desync_events, 0);
    assert!(server.processed_inputs < prediction.total_inputs);
}

#[test]
fn a_cramped_world_forces_server_corrections() {
    let config = ScenarioConfig {
        movement_pattern: MovementPattern::Zigzag,
        ..quick_scenario(33)
    };
    let cramped = ServerConfig {
        max_speed: 0.5,
        ..ServerConfig::default()
    };
    let report = PredictionScenario::new(config)
        .unwrap()
        .with_server_config(cramped)
        .unwrap()
        .run()
        .unwrap();
    let server = report.server.unwrap();
    let prediction = report.prediction.unwrap();
    assert!(server.speed_clamps > 0);
    // The client does not know the speed limit, so it keeps being corrected.
    assert!(prediction.rollback_count > 0);
}
