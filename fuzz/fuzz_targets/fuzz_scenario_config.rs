//! Fuzz target for `ScenarioConfig` validation.
//!
//! # Safety Properties Tested
//! - Validation never panics on arbitrary (including non-finite) values
//! - Every config that validates, and is short enough to run quickly, runs
//!   both virtual-clock scenarios without error, whatever its link delays
//! - Reports of valid runs have consistent counters

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rewindkit::config::ScenarioConfig;
use rewindkit::harness::lag_scenario::LagCompensationScenario;
use rewindkit::harness::prediction_scenario::PredictionScenario;
use rewindkit::MovementPattern;

#[derive(Debug, Arbitrary)]
struct FuzzConfig {
    duration_seconds: f64,
    client_tick_rate_hz: u32,
    server_tick_rate_hz: u32,
    max_compensation_time_seconds: f64,
    rollback_error_threshold: f64,
    history_retention_seconds: f64,
    num_entities: u8,
    pattern: u8,
    latency_range_ms: (f64, f64),
    packet_loss_rate: f64,
    jitter_ms: f64,
    shots_per_second: f64,
    seed: u64,
}

impl FuzzConfig {
    fn to_config(&self) -> ScenarioConfig {
        let movement_pattern = match self.pattern % 4 {
            0 => MovementPattern::RandomWalk,
            1 => MovementPattern::Circular,
            2 => MovementPattern::Static,
            _ => MovementPattern::Zigzag,
        };
        ScenarioConfig {
            duration_seconds: self.duration_seconds,
            client_tick_rate_hz: self.client_tick_rate_hz,
            server_tick_rate_hz: self.server_tick_rate_hz,
            max_compensation_time_seconds: self.max_compensation_time_seconds,
            rollback_error_threshold: self.rollback_error_threshold,
            history_retention_seconds: self.history_retention_seconds,
            num_entities: usize::from(self.num_entities),
            movement_pattern,
            latency_range_ms: self.latency_range_ms,
            packet_loss_rate: self.packet_loss_rate,
            jitter_ms: self.jitter_ms,
            shots_per_second: self.shots_per_second,
            seed: self.seed,
        }
    }
}

/// Keeps fuzz iterations fast; larger configs are only validated.
fn small_enough(config: &ScenarioConfig) -> bool {
    config.duration_seconds <= 0.5
        && config.num_entities <= 8
        && config.client_tick_rate_hz <= 240
        && config.server_tick_rate_hz <= 240
        && config.shots_per_second <= 50.0
}

fuzz_target!(|fuzz: FuzzConfig| {
    let config = fuzz.to_config();
    if config.validate().is_err() {
        assert!(LagCompensationScenario::new(config.clone()).is_err());
        assert!(PredictionScenario::new(config).is_err());
        return;
    }
    if !small_enough(&config) {
        return;
    }

    let lag = LagCompensationScenario::new(config.clone())
        .expect("validated")
        .run()
        .expect("valid config runs");
    let rewind = lag.lag_compensation.expect("lag report");
    assert_eq!(
        rewind.hits + rewind.misses + rewind.rejected + rewind.invalid,
        rewind.total_shots
    );

    let prediction = PredictionScenario::new(config)
        .expect("validated")
        .run()
        .expect("valid config runs");
    let predicted = prediction.prediction.expect("prediction report");
    assert!(predicted.rollback_count <= predicted.total_inputs);
});
