//! Tokio runner tests on a paused clock.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use crate::common::{init_tracing, quick_scenario};
use rewindkit::config::ScenarioConfig;
use rewindkit::harness::concurrent::{run_concurrent, ConcurrentScenario};
use rewindkit::telemetry::{CollectingObserver, EventKind};
use rewindkit::MovementPattern;

#[tokio::test(start_paused = true)]
async fn every_client_finishes_and_reports() {
    let report = run_concurrent(quick_scenario(51)).await.unwrap();
    let prediction = report.prediction.unwrap();
    let server = report.server.unwrap();
    let lag = report.lag_compensation.unwrap();

    assert!(prediction.total_inputs >= 4);
    assert_eq!(server.processed_inputs, prediction.total_inputs);
    assert_eq!(prediction.desync_events, 0);
    assert_eq!(lag.total_shots, lag.hits + lag.misses + lag.rejected + lag.invalid);
    assert!(lag.total_shots > 0);
    assert_eq!(report.network.sent, report.network.delivered);
}

#[tokio::test(start_paused = true)]
async fn paused_clock_runs_many_seconds_instantly() {
    let config = ScenarioConfig {
        duration_seconds: 30.0,
        num_entities: 6,
        movement_pattern: MovementPattern::Zigzag,
        ..ScenarioConfig::deterministic(52)
    };
    let started = std::time::Instant::now();
    let report = run_concurrent(config).await.unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(30));
    assert_eq!(report.duration_seconds, 30.0);
}

#[tokio::test(start_paused = true)]
async fn lossy_links_never_desync_a_client() {
    init_tracing();
    let observer = Arc::new(CollectingObserver::new());
    let config = ScenarioConfig {
        packet_loss_rate: 0.2,
        jitter_ms: 20.0,
        ..quick_scenario(53)
    };
    let report = ConcurrentScenario::with_observer(config, observer.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert!(report.network.dropped > 0);
    assert!(!observer.has_event(EventKind::Desync));
    assert!(!observer.has_event(EventKind::OutOfOrderSnapshot));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runs_on_a_multi_threaded_runtime() {
    init_tracing();
    let config = ScenarioConfig {
        duration_seconds: 0.5,
        ..quick_scenario(54)
    };
    let report = run_concurrent(config).await.unwrap();
    assert_eq!(report.name, "concurrent/circular");
    assert!(report.prediction.unwrap().total_inputs > 0);
}
