//! Named batteries of scenarios covering good to bad network conditions.
//!
//! A suite is a list of [`SuiteEntry`] values derived from a base config,
//! which keeps the caller's duration, tick rates and seed while each entry
//! overrides the network and movement settings it is about.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ScenarioConfig;
use crate::harness::lag_scenario::LagCompensationScenario;
use crate::harness::patterns::MovementPattern;
use crate::harness::prediction_scenario::PredictionScenario;
use crate::report::{Quality, ScenarioReport};
use crate::RewindError;

/// Which virtual-clock driver a suite entry runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// [`LagCompensationScenario`].
    LagCompensation,
    /// [`PredictionScenario`].
    Prediction,
}

impl ScenarioKind {
    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LagCompensation => "lag-compensation",
            Self::Prediction => "prediction",
        }
    }

    /// Runs `config` on this driver.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if `config` does not validate.
    pub fn run(self, config: ScenarioConfig) -> Result<ScenarioReport, RewindError> {
        match self {
            Self::LagCompensation => LagCompensationScenario::new(config)?.run(),
            Self::Prediction => PredictionScenario::new(config)?.run(),
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioKind {
    type Err = RewindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "lag" | "lag-compensation" => Ok(Self::LagCompensation),
            "prediction" => Ok(Self::Prediction),
            other => Err(RewindError::InvalidConfig {
                info: format!("unknown scenario kind '{other}' (expected lag-compensation or prediction)"),
            }),
        }
    }
}

/// One labelled scenario of a suite.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteEntry {
    /// Short description of the conditions.
    pub label: &'static str,
    /// Driver to run on.
    pub kind: ScenarioKind,
    /// Fully derived configuration.
    pub config: ScenarioConfig,
}

impl SuiteEntry {
    /// Runs the entry.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if the entry's config does not validate.
    pub fn run(&self) -> Result<ScenarioReport, RewindError> {
        self.kind.run(self.config.clone())
    }
}

/// Rewind scenarios: latency bands, movement patterns, fire rates and a
/// crowded server.
pub fn lag_compensation_suite(base: &ScenarioConfig) -> Vec<SuiteEntry> {
    // (label, entities, latency range, pattern, shots per second)
    let rows: [(&'static str, usize, (f64, f64), MovementPattern, f64); 6] = [
        ("good conditions", 10, (20.0, 50.0), MovementPattern::Circular, 2.0),
        ("average conditions", 10, (50.0, 100.0), MovementPattern::Circular, 2.0),
        ("poor conditions", 10, (100.0, 200.0), MovementPattern::Circular, 2.0),
        ("random movement", 10, (50.0, 100.0), MovementPattern::RandomWalk, 3.0),
        ("static targets", 10, (50.0, 100.0), MovementPattern::Static, 5.0),
        ("crowded server", 20, (20.0, 150.0), MovementPattern::RandomWalk, 2.0),
    ];
    rows.into_iter()
        .map(|(label, entities, latency, pattern, fire_rate)| SuiteEntry {
            label,
            kind: ScenarioKind::LagCompensation,
            config: ScenarioConfig {
                num_entities: entities,
                latency_range_ms: latency,
                movement_pattern: pattern,
                shots_per_second: fire_rate,
                ..base.clone()
            },
        })
        .collect()
}

/// Prediction scenarios: connection quality bands and movement patterns.
pub fn prediction_suite(base: &ScenarioConfig) -> Vec<SuiteEntry> {
    // (label, latency, jitter, loss, pattern)
    let rows: [(&'static str, f64, f64, f64, MovementPattern); 6] = [
        ("good connection", 20.0, 5.0, 0.0, MovementPattern::Circular),
        ("average connection", 50.0, 10.0, 0.01, MovementPattern::Circular),
        ("poor connection", 100.0, 20.0, 0.02, MovementPattern::Circular),
        ("bad connection", 200.0, 50.0, 0.05, MovementPattern::Circular),
        ("zigzag movement", 50.0, 10.0, 0.01, MovementPattern::Zigzag),
        ("random movement", 50.0, 10.0, 0.01, MovementPattern::RandomWalk),
    ];
    rows.into_iter()
        .map(|(label, latency, jitter, loss, pattern)| SuiteEntry {
            label,
            kind: ScenarioKind::Prediction,
            config: ScenarioConfig {
                latency_range_ms: (latency, latency),
                jitter_ms: jitter,
                packet_loss_rate: loss,
                movement_pattern: pattern,
                ..base.clone()
            },
        })
        .collect()
}

/// Reports of a suite run, in entry order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteSummary {
    /// `(label, report)` per entry.
    pub results: Vec<(String, ScenarioReport)>,
}

impl SuiteSummary {
    /// The worst grade of any entry, or `None` for an empty suite.
    #[must_use]
    pub fn overall(&self) -> Option<Quality> {
        self.results.iter().map(|(_, report)| report.quality).min()
    }

    /// Serializes the summary as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::SerializationError`] if encoding fails.
    #[cfg(feature = "json")]
    pub fn to_json_pretty(&self) -> Result<String, RewindError> {
        serde_json::to_string_pretty(self).map_err(|e| RewindError::SerializationError {
            context: format!("suite summary: {e}"),
        })
    }
}

impl std::fmt::Display for SuiteSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (label, report) in &self.results {
            write!(f, "{label:<20} {:<10}", report.quality)?;
            if let Some(lag) = &report.lag_compensation {
                write!(
                    f,
                    " hit {:5.1}%  rejected {:5.1}%  comp {:6.1}ms",
                    lag.hit_rate * 100.0,
                    lag.rejection_rate * 100.0,
                    lag.average_compensation_time * 1000.0
                )?;
            }
            if let Some(prediction) = &report.prediction {
                write!(
                    f,
                    " error {:.3}  rollback {:5.1}%  desync {}",
                    prediction.average_position_error,
                    prediction.rollback_rate * 100.0,
                    prediction.desync_events
                )?;
            }
            writeln!(f)?;
        }
        match self.overall() {
            Some(quality) => writeln!(f, "Overall: {quality}"),
            None => writeln!(f, "Overall: (no scenarios)"),
        }
    }
}

/// Runs every entry in order.
///
/// # Errors
///
/// Stops at the first entry whose config does not validate.
pub fn run_suite(entries: &[SuiteEntry]) -> Result<SuiteSummary, RewindError> {
    let mut results = Vec::with_capacity(entries.len());
    for entry in entries {
        let report = entry.run()?;
        info!(
            label = entry.label,
            kind = entry.kind.as_str(),
            quality = report.quality.as_str(),
            "suite entry finished"
        );
        results.push((entry.label.to_owned(), report));
    }
    Ok(SuiteSummary { results })
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

    fn base() -> ScenarioConfig {
        ScenarioConfig {
            duration_seconds: 1.0,
            ..ScenarioConfig::deterministic(11)
        }
    }

    #[test]
    fn suites_keep_the_base_duration_and_seed() {
        for entry in lag_compensation_suite(&base()).iter().chain(&prediction_suite(&base())) {
            assert_eq!(entry.config.duration_seconds, 1.0);
            assert_eq!(entry.config.seed, 11);
            entry.config.validate().unwrap();
        }
    }

    #[test]
    fn prediction_suite_pins_latency() {
        let suite = prediction_suite(&base());
        assert_eq!(suite.len(), 6);
        assert_eq!(suite[3].config.latency_range_ms, (200.0, 200.0));
        assert_eq!(suite[3].config.packet_loss_rate, 0.05);
    }

    #[test]
    fn run_suite_reports_in_entry_order() {
        let entries = lag_compensation_suite(&base());
        let summary = run_suite(&entries[..2]).unwrap();
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results[0].0, "good conditions");
        assert!(summary.results.iter().all(|(_, r)| r.lag_compensation.is_some()));

        let worst = summary.results.iter().map(|(_, r)| r.quality).min();
        assert_eq!(summary.overall(), worst);
        assert!(summary.to_string().contains("Overall:"));
    }

    #[test]
    fn empty_suite_has_no_overall_grade() {
        let summary = run_suite(&[]).unwrap();
        assert_eq!(summary.overall(), None);
    }

    #[test]
    fn kinds_parse_from_short_names() {
        assert_eq!("lag".parse::<ScenarioKind>().unwrap(), ScenarioKind::LagCompensation);
        assert_eq!("Prediction".parse::<ScenarioKind>().unwrap(), ScenarioKind::Prediction);
        assert!("chaos".parse::<ScenarioKind>().is_err());
    }
}
