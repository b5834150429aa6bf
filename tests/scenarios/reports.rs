//! Report rendering, digests and suites.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use crate::common::quick_scenario;
use rewindkit::config::ScenarioConfig;
use rewindkit::harness::lag_scenario::LagCompensationScenario;
use rewindkit::harness::prediction_scenario::PredictionScenario;
use rewindkit::harness::suite::{prediction_suite, run_suite, ScenarioKind};
use rewindkit::Quality;

#[test]
fn digest_depends_on_the_seed_but_not_the_name() {
    let a = PredictionScenario::new(quick_scenario(41)).unwrap().run().unwrap();
    let b = PredictionScenario::new(quick_scenario(41)).unwrap().run().unwrap();
    let c = PredictionScenario::new(quick_scenario(42)).unwrap().run().unwrap();
    assert_eq!(a.digest, b.digest);
    assert_ne!(a.digest, c.digest);

    let mut renamed = a.clone();
    renamed.name = "renamed".to_owned();
    assert_eq!(renamed.clone().finish().unwrap().digest, a.digest);
}

#[test]
fn reports_serialize_with_lowercase_quality() {
    let report = LagCompensationScenario::new(quick_scenario(43)).unwrap().run().unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["name"], "lag-compensation/circular");
    assert_eq!(value["seed"], 43);
    assert!(value["lag_compensation"]["total_shots"].as_u64().unwrap() > 0);
    assert!(value["prediction"].is_null());
    let quality = value["quality"].as_str().unwrap();
    assert!(["poor", "good", "excellent"].contains(&quality));
}

#[test]
fn text_report_ends_with_the_grade() {
    let report = PredictionScenario::new(quick_scenario(44)).unwrap().run().unwrap();
    let text = report.to_string();
    assert!(text.starts_with("=== prediction/circular ==="));
    assert!(text.contains("Prediction Accuracy"));
    assert!(text.trim_end().ends_with(&format!("Quality: {}", report.quality)));
}

#[test]
fn configs_load_from_partial_json() {
    let config: ScenarioConfig =
        serde_json::from_str(r#"{ "seed": 9, "latency_range_ms": [10.0, 20.0], "movement_pattern": "combat" }"#)
            .unwrap();
    assert_eq!(config.seed, 9);
    assert_eq!(config.latency_range_ms, (10.0, 20.0));
    assert_eq!(config.movement_pattern, rewindkit::MovementPattern::Zigzag);
    assert_eq!(config.duration_seconds, ScenarioConfig::default().duration_seconds);
    config.validate().unwrap();
}

#[test]
fn suite_grades_degrade_with_the_connection() {
    let base = ScenarioConfig {
        duration_seconds: 3.0,
        num_entities: 3,
        ..ScenarioConfig::deterministic(45)
    };
    let entries = prediction_suite(&base);
    assert!(entries.iter().all(|e| e.kind == ScenarioKind::Prediction));

    let summary = run_suite(&entries[..1]).unwrap();
    let (label, good) = &summary.results[0];
    assert_eq!(label, "good connection");
    // 20 ms, no loss: every prediction is confirmed.
    assert_eq!(good.quality, Quality::Excellent);
    assert_eq!(summary.overall(), Some(Quality::Excellent));
}
