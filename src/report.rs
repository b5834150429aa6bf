//! Result records emitted when a scenario finishes.
//!
//! A [`ScenarioReport`] bundles the derived reports of whichever engines a
//! scenario exercised, the link counters, a [`Quality`] grade and a digest
//! that identifies the exact numbers (two runs with the same seed produce the
//! same digest).

use serde::Serialize;

use crate::checksum::compute_checksum;
use crate::lag_compensation::LagCompensationReport;
use crate::network::link_stats::LinkStats;
use crate::prediction::PredictionReport;
use crate::server::ServerStats;
use crate::RewindError;

/// Arithmetic mean; `0.0` for an empty slice.
#[must_use]
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Largest sample; `0.0` for an empty slice.
#[must_use]
pub fn max_of(samples: &[f64]) -> f64 {
    samples.iter().copied().fold(0.0, f64::max)
}

/// The `p`-th percentile (`0..=100`) with linear interpolation between
/// closest ranks; `0.0` for an empty slice.
#[must_use]
pub fn percentile(samples: &[f64], p: f64) -> f64 {
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|s| !s.is_nan()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(f64::total_cmp);

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    match (sorted.get(lower), sorted.get(upper)) {
        (Some(&low), Some(&high)) => low + (high - low) * (rank - lower as f64),
        (Some(&low), None) => low,
        _ => 0.0,
    }
}

/// Coarse grade of how well an engine coped with the scenario.
///
/// Ordered from worst to best, so the overall grade of a scenario is the
/// minimum of its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Below the "good" thresholds.
    Poor,
    /// Acceptable.
    Good,
    /// Nothing to improve.
    Excellent,
}

impl Quality {
    /// Grades rewind results.
    ///
    /// Excellent above 80% hits with under 5% rejections; good above 60% hits
    /// with under 10% rejections.
    pub fn of_lag_compensation(report: &LagCompensationReport) -> Self {
        if report.hit_rate > 0.8 && report.rejection_rate < 0.05 {
            Self::Excellent
        } else if report.hit_rate > 0.6 && report.rejection_rate < 0.1 {
            Self::Good
        } else {
            Self::Poor
        }
    }

    /// Grades prediction results.
    ///
    /// Excellent under 0.1 units of average error with under 5% rollbacks;
    /// good under 0.5 units with under 10% rollbacks.
    pub fn of_prediction(report: &PredictionReport) -> Self {
        if report.average_position_error < 0.1 && report.rollback_rate < 0.05 {
            Self::Excellent
        } else if report.average_position_error < 0.5 && report.rollback_rate < 0.1 {
            Self::Good
        } else {
            Self::Poor
        }
    }

    /// Upper-case label used in text reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Poor => "POOR",
            Self::Good => "GOOD",
            Self::Excellent => "EXCELLENT",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a finished scenario measured.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[must_use = "ScenarioReport should be inspected or rendered"]
pub struct ScenarioReport {
    /// Human-readable scenario label.
    pub name: String,
    /// Seed the scenario ran with.
    pub seed: u64,
    /// Simulated duration during which events were generated, in seconds.
    pub duration_seconds: f64,
    /// Rewind results, if the scenario fired shots.
    pub lag_compensation: Option<LagCompensationReport>,
    /// Prediction results, if the scenario ran clients.
    pub prediction: Option<PredictionReport>,
    /// Server counters, summed over all clients.
    pub server: Option<ServerStats>,
    /// Link counters, summed over every direction of every client.
    pub network: LinkStats,
    /// Worst grade over the present sections; excellent when nothing was measured.
    pub quality: Quality,
    /// Fingerprint of the measured numbers.
    pub digest: u64,
}

impl ScenarioReport {
    /// Starts an empty report.
    pub fn new(name: impl Into<String>, seed: u64, duration_seconds: f64) -> Self {
        Self {
            name: name.into(),
            seed,
            duration_seconds,
            lag_compensation: None,
            prediction: None,
            server: None,
            network: LinkStats::default(),
            quality: Quality::Excellent,
            digest: 0,
        }
    }

    /// Attaches rewind results.
    pub fn with_lag_compensation(mut self, report: LagCompensationReport) -> Self {
        self.lag_compensation = Some(report);
        self
    }

    /// Attaches prediction results.
    pub fn with_prediction(mut self, report: PredictionReport) -> Self {
        self.prediction = Some(report);
        self
    }

    /// Attaches server counters.
    pub fn with_server(mut self, stats: ServerStats) -> Self {
        self.server = Some(stats);
        self
    }

    /// Attaches link counters.
    pub fn with_network(mut self, stats: LinkStats) -> Self {
        self.network = stats;
        self
    }

    /// Grades the report and computes its digest.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::SerializationError`] if the sections cannot be
    /// encoded for hashing.
    pub fn finish(mut self) -> Result<Self, RewindError> {
        let lag = self.lag_compensation.as_ref().map(Quality::of_lag_compensation);
        let prediction = self.prediction.as_ref().map(Quality::of_prediction);
        self.quality = lag
            .into_iter()
            .chain(prediction)
            .min()
            .unwrap_or(Quality::Excellent);
        self.digest = compute_checksum(&(
            self.seed,
            &self.lag_compensation,
            &self.prediction,
            &self.server,
            &self.network,
        ))?;
        Ok(self)
    }

    /// Serializes the report as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::SerializationError`] if serialization fails.
    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String, RewindError> {
        serde_json::to_string(self).map_err(|e| RewindError::SerializationError {
            context: format!("scenario report: {e}"),
        })
    }

    /// Serializes the report as indented JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::SerializationError`] if serialization fails.
    #[cfg(feature = "json")]
    pub fn to_json_pretty(&self) -> Result<String, RewindError> {
        serde_json::to_string_pretty(self).map_err(|e| RewindError::SerializationError {
            context: format!("scenario report: {e}"),
        })
    }
}

impl std::fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== {} ===", self.name)?;
        writeln!(
            f,
            "  seed: {}, duration: {:.1}s, digest: {:016x}",
            self.seed, self.duration_seconds, self.digest
        )?;

        if let Some(lag) = &self.lag_compensation {
            writeln!(f, "  Lag compensation:")?;
            writeln!(
                f,
                "    - Shots: {} (hits {}, misses {}, rejected {}, invalid {})",
                lag.total_shots, lag.hits, lag.misses, lag.rejected, lag.invalid
            )?;
            writeln!(f, "    - Hit Rate: {:.1}%", lag.hit_rate * 100.0)?;
            writeln!(f, "    - Rejection Rate: {:.1}%", lag.rejection_rate * 100.0)?;
            writeln!(
                f,
                "    - False Positives: {:.1}%",
                lag.false_positive_rate * 100.0
            )?;
            writeln!(
                f,
                "    - False Negatives: {:.1}%",
                lag.false_negative_rate * 100.0
            )?;
            writeln!(
                f,
                "    - Compensation: avg {:.1}ms, p95 {:.1}ms, max {:.1}ms",
                lag.average_compensation_time * 1000.0,
                lag.p95_compensation_time * 1000.0,
                lag.max_compensation_time * 1000.0
            )?;
        }

        if let Some(prediction) = &self.prediction {
            writeln!(f, "  Prediction:")?;
            writeln!(f, "    - Inputs: {}", prediction.total_inputs)?;
            writeln!(
                f,
                "    - Position Error: avg {:.3}, max {:.3}",
                prediction.average_position_error, prediction.max_position_error
            )?;
            writeln!(
                f,
                "    - Rollback Rate: {:.1}%",
                prediction.rollback_rate * 100.0
            )?;
            writeln!(
                f,
                "    - Prediction Accuracy: {:.1}%",
                prediction.prediction_accuracy * 100.0
            )?;
            writeln!(f, "    - Desync Events: {}", prediction.desync_events)?;
        }

        if let Some(server) = &self.server {
            writeln!(
                f,
                "  Server: {} processed, {} duplicates, {} position clamps, {} speed clamps",
                server.processed_inputs,
                server.duplicate_inputs,
                server.position_clamps,
                server.speed_clamps
            )?;
        }

        writeln!(f, "  Network: {}", self.network)?;
        write!(f, "  Quality: {}", self.quality)
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
    fn empty_aggregates_are_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(max_of(&[]), 0.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn aggregates() {
        let samples = [0.05, 0.1, 0.15, 0.2];
        assert!((mean(&samples) - 0.125).abs() < 1e-12);
        assert_eq!(max_of(&samples), 0.2);
    }

    #[test]
    fn percentile_interpolates() {
        let samples: Vec<f64> = (1..=5).map(f64::from).collect();
        assert_eq!(percentile(&samples, 0.0), 1.0);
        assert_eq!(percentile(&samples, 50.0), 3.0);
        assert_eq!(percentile(&samples, 100.0), 5.0);
        assert!((percentile(&samples, 95.0) - 4.8).abs() < 1e-12);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
    }

    #[test]
    fn prediction_grades() {
        let mut report = PredictionReport {
            average_position_error: 0.05,
            rollback_rate: 0.01,
            ..PredictionReport::default()
        };
        assert_eq!(Quality::of_prediction(&report), Quality::Excellent);
        report.average_position_error = 0.3;
        assert_eq!(Quality::of_prediction(&report), Quality::Good);
        report.rollback_rate = 0.5;
        assert_eq!(Quality::of_prediction(&report), Quality::Poor);
    }

    #[test]
    fn lag_compensation_grades() {
        let mut report = LagCompensationReport {
            hit_rate: 0.9,
            rejection_rate: 0.01,
            ..LagCompensationReport::default()
        };
        assert_eq!(Quality::of_lag_compensation(&report), Quality::Excellent);
        report.hit_rate = 0.7;
        assert_eq!(Quality::of_lag_compensation(&report), Quality::Good);
        report.rejection_rate = 0.2;
        assert_eq!(Quality::of_lag_compensation(&report), Quality::Poor);
    }

    #[test]
    fn overall_quality_is_the_worst_section() {
        let report = ScenarioReport::new("mixed", 1, 1.0)
            .with_lag_compensation(LagCompensationReport {
                hit_rate: 0.9,
                ..LagCompensationReport::default()
            })
            .with_prediction(PredictionReport {
                average_position_error: 2.0,
                ..PredictionReport::default()
            })
            .finish()
            .unwrap();
        assert_eq!(report.quality, Quality::Poor);
    }

    #[test]
    fn digest_tracks_content() {
        let a = ScenarioReport::new("a", 1, 1.0)
            .with_prediction(PredictionReport::default())
            .finish()
            .unwrap();
        let b = ScenarioReport::new("b", 1, 1.0)
            .with_prediction(PredictionReport::default())
            .finish()
            .unwrap();
        let c = ScenarioReport::new("a", 1, 1.0)
            .with_prediction(PredictionReport {
                rollback_count: 1,
                ..PredictionReport::default()
            })
            .finish()
            .unwrap();
        // The label is not part of the measured numbers.
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, c.digest);
    }

    #[test]
    fn text_report_lists_sections() {
        let text = ScenarioReport::new("text", 3, 2.0)
            .with_prediction(PredictionReport::default())
            .finish()
            .unwrap()
            .to_string();
        assert!(text.contains("=== text ==="));
        assert!(text.contains("Prediction Accuracy"));
        assert!(!text.contains("Lag compensation"));
        assert!(text.ends_with("Quality: EXCELLENT"));
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_carries_quality_label() {
        let json = ScenarioReport::new("json", 0, 1.0)
            .finish()
            .unwrap()
            .to_json()
            .unwrap();
        assert!(json.contains("\"quality\":\"excellent\""));
    }
}
