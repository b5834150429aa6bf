//! Configuration for the engines and the scenario drivers.
//!
//! Every config struct follows the same pattern:
//!
//! - `Default` gives the standard values (60 Hz client, 30 Hz server, 200 ms
//!   compensation ceiling, one second of history, 0.1 unit rollback threshold)
//! - named presets cover common setups
//! - `validate()` rejects values the engines cannot work with
//!
//! The rewind and prediction engines do not validate on construction; a
//! scenario driver validates its [`ScenarioConfig`] once up front and derives
//! their configs from it. [`ServerSimulation`](crate::server::ServerSimulation)
//! validates its [`ServerConfig`] when it is created.
//!
//! ```
//! use rewindkit::config::ScenarioConfig;
//!
//! let config = ScenarioConfig {
//!     num_entities: 4,
//!     ..ScenarioConfig::poor_conditions()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.lag_compensation().max_compensation_time, 0.2);
//! ```

use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::harness::patterns::MovementPattern;
use crate::network::conditions::NetworkConditions;
use crate::RewindError;

/// Upper bound on any tick rate we accept.
const MAX_TICK_RATE_HZ: u32 = 1000;

/// Upper bound on one-way latency and on jitter, in milliseconds.
pub const MAX_LINK_DELAY_MS: f64 = 60_000.0;

fn invalid(info: impl Into<String>) -> RewindError {
    RewindError::InvalidConfig { info: info.into() }
}

/// Seconds as a [`Duration`]; negative and NaN become zero, huge values
/// saturate at [`Duration::MAX`].
pub(crate) fn saturating_secs(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

fn check_positive_finite(field: &str, value: f64) -> Result<(), RewindError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(format!(
            "{field} must be a positive finite number, got {value}"
        )));
    }
    Ok(())
}

fn check_tick_rate(field: &str, value: u32) -> Result<(), RewindError> {
    if value == 0 || value > MAX_TICK_RATE_HZ {
        return Err(invalid(format!(
            "{field} must be in 1..={MAX_TICK_RATE_HZ}, got {value}"
        )));
    }
    Ok(())
}

/// Server-side rewind settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[must_use = "LagCompensationConfig has no effect unless passed to LagCompensationEngine::new()"]
pub struct LagCompensationConfig {
    /// Largest rewind, in seconds, the server will perform for a shot.
    ///
    /// Default: 0.2
    pub max_compensation_time: f64,

    /// How much position history, in seconds, is kept per entity.
    ///
    /// Must be at least `max_compensation_time`, otherwise accepted shots
    /// could rewind past the retained window.
    ///
    /// Default: 1.0
    pub history_retention: f64,

    /// Rate at which entity positions are recorded.
    ///
    /// Default: 60
    pub tick_rate_hz: u32,
}

impl Default for LagCompensationConfig {
    fn default() -> Self {
        Self {
            max_compensation_time: 0.2,
            history_retention: 1.0,
            tick_rate_hz: 60,
        }
    }
}

impl LagCompensationConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tight window for competitive play: 100 ms of rewind at 128 Hz.
    pub fn competitive() -> Self {
        Self {
            max_compensation_time: 0.1,
            history_retention: 0.5,
            tick_rate_hz: 128,
        }
    }

    /// Generous window for high-latency players: 400 ms of rewind.
    pub fn lenient() -> Self {
        Self {
            max_compensation_time: 0.4,
            history_retention: 1.0,
            tick_rate_hz: 60,
        }
    }

    /// Interval between recorded snapshots, in seconds.
    #[must_use]
    pub fn tick_interval(&self) -> f64 {
        1.0 / f64::from(self.tick_rate_hz.max(1))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if a value is out of range.
    pub fn validate(&self) -> Result<(), RewindError> {
        check_positive_finite("max_compensation_time", self.max_compensation_time)?;
        check_positive_finite("history_retention", self.history_retention)?;
        check_tick_rate("tick_rate_hz", self.tick_rate_hz)?;
        if self.history_retention < self.max_compensation_time {
            return Err(invalid(format!(
                "history_retention ({}) must be >= max_compensation_time ({})",
                self.history_retention, self.max_compensation_time
            )));
        }
        Ok(())
    }
}

/// Client-side prediction settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[must_use = "PredictionConfig has no effect unless passed to ClientPrediction::new()"]
pub struct PredictionConfig {
    /// Client simulation rate. Fixes the movement model's integration step.
    ///
    /// Default: 60
    pub tick_rate_hz: u32,

    /// Number of predicted states kept for reconciliation.
    ///
    /// Default: 120 (two seconds at 60 Hz)
    pub state_buffer_capacity: usize,

    /// Position error above which reconciliation rolls back and replays.
    ///
    /// Default: 0.1
    pub rollback_error_threshold: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            state_buffer_capacity: 120,
            rollback_error_threshold: 0.1,
        }
    }
}

impl PredictionConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Larger buffer for connections with long round trips (four seconds).
    pub fn high_latency() -> Self {
        Self {
            state_buffer_capacity: 240,
            ..Self::default()
        }
    }

    /// Integration step of the movement model, in seconds.
    #[must_use]
    pub fn tick_interval(&self) -> f64 {
        1.0 / f64::from(self.tick_rate_hz.max(1))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if a value is out of range.
    pub fn validate(&self) -> Result<(), RewindError> {
        check_tick_rate("tick_rate_hz", self.tick_rate_hz)?;
        if self.state_buffer_capacity == 0 {
            return Err(invalid("state_buffer_capacity must be at least 1"));
        }
        if !self.rollback_error_threshold.is_finite() || self.rollback_error_threshold < 0.0 {
            return Err(invalid(format!(
                "rollback_error_threshold must be a non-negative finite number, got {}",
                self.rollback_error_threshold
            )));
        }
        Ok(())
    }
}

/// Authoritative server bounds.
///
/// The server integrates movement with the *client's* tick interval (see
/// [`MovementModel`](crate::movement::MovementModel)); these values only
/// control the corrections applied afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[must_use = "ServerConfig has no effect unless passed to ServerSimulation::new()"]
pub struct ServerConfig {
    /// Positions are clamped to `[-world_half_extent, world_half_extent]` on x and z.
    ///
    /// Default: 1000.0
    pub world_half_extent: f64,

    /// Positions are clamped to `[0, max_height]` on y.
    ///
    /// Default: 100.0
    pub max_height: f64,

    /// Speeds above this are rescaled down to it, preserving direction.
    ///
    /// Default: 20.0
    pub max_speed: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            world_half_extent: 1000.0,
            max_height: 100.0,
            max_speed: 20.0,
        }
    }
}

impl ServerConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if a value is out of range.
    pub fn validate(&self) -> Result<(), RewindError> {
        check_positive_finite("world_half_extent", self.world_half_extent)?;
        check_positive_finite("max_height", self.max_height)?;
        check_positive_finite("max_speed", self.max_speed)?;
        Ok(())
    }
}

/// Everything a scenario driver needs to run one scenario.
///
/// Deserializable from JSON; missing fields take their default values.
///
/// ```
/// # #[cfg(feature = "json")]
/// # {
/// use rewindkit::config::ScenarioConfig;
/// use rewindkit::MovementPattern;
///
/// let config: ScenarioConfig =
///     serde_json::from_str(r#"{ "num_entities": 8, "movement_pattern": "zigzag" }"#).unwrap();
/// assert_eq!(config.num_entities, 8);
/// assert_eq!(config.movement_pattern, MovementPattern::Zigzag);
/// assert_eq!(config.client_tick_rate_hz, 60);
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[must_use = "ScenarioConfig has no effect unless passed to a scenario driver"]
pub struct ScenarioConfig {
    /// Simulated duration during which new inputs and shots are generated.
    ///
    /// Default: 10.0
    pub duration_seconds: f64,

    /// Client input and prediction rate.
    ///
    /// Default: 60
    pub client_tick_rate_hz: u32,

    /// Server processing rate; also the rate entity positions are recorded.
    ///
    /// Default: 30
    pub server_tick_rate_hz: u32,

    /// See [`LagCompensationConfig::max_compensation_time`].
    ///
    /// Default: 0.2
    pub max_compensation_time_seconds: f64,

    /// See [`PredictionConfig::rollback_error_threshold`].
    ///
    /// Default: 0.1
    pub rollback_error_threshold: f64,

    /// See [`LagCompensationConfig::history_retention`].
    ///
    /// Default: 1.0
    pub history_retention_seconds: f64,

    /// Number of simulated entities (players or clients).
    ///
    /// Default: 10
    pub num_entities: usize,

    /// How entities move / what inputs clients generate.
    ///
    /// Default: [`MovementPattern::Circular`]
    pub movement_pattern: MovementPattern,

    /// Inclusive range of one-way latencies, in milliseconds.
    ///
    /// Default: (50.0, 100.0)
    pub latency_range_ms: (f64, f64),

    /// Probability that a single transit is dropped.
    ///
    /// Default: 0.01
    pub packet_loss_rate: f64,

    /// Uniform jitter, in milliseconds, added on top of the drawn latency.
    ///
    /// Default: 10.0
    pub jitter_ms: f64,

    /// Shots generated per simulated second in lag-compensation scenarios.
    ///
    /// Default: 2.0
    pub shots_per_second: f64,

    /// Seed for every random decision the scenario makes.
    ///
    /// Default: 0
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 10.0,
            client_tick_rate_hz: 60,
            server_tick_rate_hz: 30,
            max_compensation_time_seconds: 0.2,
            rollback_error_threshold: 0.1,
            history_retention_seconds: 1.0,
            num_entities: 10,
            movement_pattern: MovementPattern::Circular,
            latency_range_ms: (50.0, 100.0),
            packet_loss_rate: 0.01,
            jitter_ms: 10.0,
            shots_per_second: 2.0,
            seed: 0,
        }
    }
}

impl ScenarioConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// 20–50 ms latency, light jitter, no loss.
    pub fn good_conditions() -> Self {
        Self {
            latency_range_ms: (20.0, 50.0),
            jitter_ms: 5.0,
            packet_loss_rate: 0.0,
            ..Self::default()
        }
    }

    /// 50–100 ms latency with 1% loss (the defaults).
    pub fn average_conditions() -> Self {
        Self::default()
    }

    /// 100–200 ms latency, heavy jitter, 2% loss. Many shots fall outside the
    /// default compensation window.
    pub fn poor_conditions() -> Self {
        Self {
            latency_range_ms: (100.0, 200.0),
            jitter_ms: 20.0,
            packet_loss_rate: 0.02,
            ..Self::default()
        }
    }

    /// A fully reproducible config for tests: fixed seed, no loss, no jitter.
    pub fn deterministic(seed: u64) -> Self {
        Self {
            seed,
            packet_loss_rate: 0.0,
            jitter_ms: 0.0,
            ..Self::default()
        }
    }

    /// Replaces the network settings with those of a named condition preset.
    ///
    /// The latency range collapses to the preset's base latency; variation
    /// comes from its jitter instead.
    pub fn with_network(mut self, conditions: &NetworkConditions) -> Self {
        let latency_ms = conditions.latency.as_secs_f64() * 1000.0;
        self.latency_range_ms = (latency_ms, latency_ms);
        self.jitter_ms = conditions.jitter.as_secs_f64() * 1000.0;
        self.packet_loss_rate = conditions.loss_rate;
        self
    }

    /// The configured duration as a [`Duration`].
    #[must_use]
    pub fn duration(&self) -> Duration {
        saturating_secs(self.duration_seconds)
    }

    /// Derives the server-side rewind config.
    pub fn lag_compensation(&self) -> LagCompensationConfig {
        LagCompensationConfig {
            max_compensation_time: self.max_compensation_time_seconds,
            history_retention: self.history_retention_seconds,
            tick_rate_hz: self.server_tick_rate_hz,
        }
    }

    /// Derives the client prediction config.
    pub fn prediction(&self) -> PredictionConfig {
        PredictionConfig {
            tick_rate_hz: self.client_tick_rate_hz,
            rollback_error_threshold: self.rollback_error_threshold,
            ..PredictionConfig::default()
        }
    }

    /// Derives the network conditions for one link, given a base latency drawn
    /// from `latency_range_ms`.
    pub fn network_conditions(&self, base_latency_ms: f64) -> NetworkConditions {
        NetworkConditions::new(
            saturating_secs(base_latency_ms / 1000.0),
            saturating_secs(self.jitter_ms / 1000.0),
            self.packet_loss_rate,
        )
    }

    /// Validates the configuration, including the derived engine configs.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if a value is out of range.
    pub fn validate(&self) -> Result<(), RewindError> {
        check_positive_finite("duration_seconds", self.duration_seconds)?;
        check_tick_rate("client_tick_rate_hz", self.client_tick_rate_hz)?;
        check_tick_rate("server_tick_rate_hz", self.server_tick_rate_hz)?;
        check_positive_finite("shots_per_second", self.shots_per_second)?;

        if self.num_entities < 2 {
            return Err(invalid(format!(
                "num_entities must be at least 2 (a shooter and a target), got {}",
                self.num_entities
            )));
        }

        let (low, high) = self.latency_range_ms;
        if !(0.0..=MAX_LINK_DELAY_MS).contains(&low)
            || !(0.0..=MAX_LINK_DELAY_MS).contains(&high)
            || high < low
        {
            return Err(invalid(format!(
                "latency_range_ms must satisfy 0 <= low <= high <= {MAX_LINK_DELAY_MS}, got ({low}, {high})"
            )));
        }
        if !(0.0..=MAX_LINK_DELAY_MS).contains(&self.jitter_ms) {
            return Err(invalid(format!(
                "jitter_ms must be in [0, {MAX_LINK_DELAY_MS}], got {}",
                self.jitter_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.packet_loss_rate) {
            return Err(invalid(format!(
                "packet_loss_rate must be in [0, 1], got {}",
                self.packet_loss_rate
            )));
        }

        self.lag_compensation().validate()?;
        self.prediction().validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        LagCompensationConfig::default().validate().unwrap();
        PredictionConfig::default().validate().unwrap();
        ServerConfig::default().validate().unwrap();
        ScenarioConfig::default().validate().unwrap();
    }

    #[test]
    fn presets_validate() {
        for config in [
            LagCompensationConfig::competitive(),
            LagCompensationConfig::lenient(),
        ] {
            config.validate().unwrap();
        }
        PredictionConfig::high_latency().validate().unwrap();
        for config in [
            ScenarioConfig::good_conditions(),
            ScenarioConfig::average_conditions(),
            ScenarioConfig::poor_conditions(),
            ScenarioConfig::deterministic(7),
        ] {
            config.validate().unwrap();
        }
    }

    #[test]
    fn retention_shorter_than_window_is_rejected() {
        let config = LagCompensationConfig {
            max_compensation_time: 0.5,
            history_retention: 0.25,
            ..LagCompensationConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("history_retention"));
    }

    #[test]
    fn zero_tick_rate_is_rejected() {
        let config = PredictionConfig {
            tick_rate_hz: 0,
            ..PredictionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RewindError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn scenario_rejects_bad_ranges() {
        let cases = [
            ScenarioConfig {
                num_entities: 1,
                ..ScenarioConfig::default()
            },
            ScenarioConfig {
                latency_range_ms: (100.0, 50.0),
                ..ScenarioConfig::default()
            },
            ScenarioConfig {
                packet_loss_rate: 1.5,
                ..ScenarioConfig::default()
            },
            ScenarioConfig {
                duration_seconds: f64::NAN,
                ..ScenarioConfig::default()
            },
            ScenarioConfig {
                rollback_error_threshold: -1.0,
                ..ScenarioConfig::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }

    #[test]
    fn link_delays_are_bounded() {
        let at_limit = ScenarioConfig {
            latency_range_ms: (MAX_LINK_DELAY_MS, MAX_LINK_DELAY_MS),
            jitter_ms: MAX_LINK_DELAY_MS,
            ..ScenarioConfig::default()
        };
        at_limit.validate().unwrap();

        let huge_latency = ScenarioConfig {
            latency_range_ms: (1e25, 1e25),
            ..ScenarioConfig::default()
        };
        assert!(huge_latency.validate().is_err());
        let huge_jitter = ScenarioConfig {
            jitter_ms: 1e25,
            ..ScenarioConfig::default()
        };
        assert!(huge_jitter.validate().is_err());
        let just_over = ScenarioConfig {
            jitter_ms: MAX_LINK_DELAY_MS + 1.0,
            ..ScenarioConfig::default()
        };
        assert!(just_over.validate().is_err());
    }

    #[test]
    fn durations_saturate_instead_of_panicking() {
        assert_eq!(saturating_secs(f64::NAN), Duration::ZERO);
        assert_eq!(saturating_secs(-1.0), Duration::ZERO);
        assert_eq!(saturating_secs(1e30), Duration::MAX);
        assert_eq!(saturating_secs(f64::INFINITY), Duration::MAX);
        assert_eq!(saturating_secs(0.25), Duration::from_millis(250));

        let unchecked = ScenarioConfig {
            jitter_ms: 1e25,
            ..ScenarioConfig::default()
        };
        assert_eq!(unchecked.network_conditions(1e25).latency, Duration::MAX);
    }

    #[test]
    fn tick_intervals() {
        assert!((PredictionConfig::default().tick_interval() - 1.0 / 60.0).abs() < 1e-12);
        assert!((LagCompensationConfig::competitive().tick_interval() - 1.0 / 128.0).abs() < 1e-12);
    }

    #[test]
    fn derived_configs_carry_scenario_values() {
        let scenario = ScenarioConfig {
            max_compensation_time_seconds: 0.3,
            rollback_error_threshold: 0.25,
            client_tick_rate_hz: 120,
            ..ScenarioConfig::default()
        };
        assert_eq!(scenario.lag_compensation().max_compensation_time, 0.3);
        assert_eq!(scenario.lag_compensation().tick_rate_hz, 30);
        assert_eq!(scenario.prediction().rollback_error_threshold, 0.25);
        assert_eq!(scenario.prediction().tick_rate_hz, 120);
    }

    #[test]
    fn with_network_uses_preset_values() {
        let config = ScenarioConfig::default().with_network(&NetworkConditions::satellite());
        assert!((config.latency_range_ms.0 - 600.0).abs() < 1e-9);
        assert_eq!(config.latency_range_ms.0, config.latency_range_ms.1);
        assert!((config.jitter_ms - 20.0).abs() < 1e-9);
        assert_eq!(config.packet_loss_rate, 0.01);
    }
}
