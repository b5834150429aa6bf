//! Named network conditions for driving scenarios.
//!
//! A [`NetworkConditions`] value describes one direction of a link: a base
//! one-way latency, a uniform jitter bound, and an independent per-transit
//! loss probability.
//!
//! ```
//! use rewindkit::network::conditions::NetworkConditions;
//! use web_time::Duration;
//!
//! let mobile = NetworkConditions::mobile_poor();
//! assert_eq!(mobile.latency, Duration::from_millis(150));
//!
//! let custom = NetworkConditions::builder()
//!     .latency_ms(40)
//!     .jitter_ms(8)
//!     .loss_rate(0.02)
//!     .build();
//! assert!(custom.validate().is_ok());
//! ```

use serde::Serialize;
use web_time::Duration;

use crate::RewindError;

/// Latency, jitter and loss of one link direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NetworkConditions {
    /// Base one-way latency.
    pub latency: Duration,
    /// Each transit's delay is `latency` plus a uniform offset in `[-jitter, +jitter]`,
    /// floored at zero.
    pub jitter: Duration,
    /// Probability (0.0 - 1.0) that a single transit is dropped.
    pub loss_rate: f64,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::perfect()
    }
}

impl NetworkConditions {
    /// Names accepted by [`NetworkConditions::preset`].
    pub const PRESET_NAMES: [&'static str; 9] = [
        "perfect",
        "fiber",
        "cable",
        "mobile-good",
        "mobile-poor",
        "mobile-3g",
        "satellite",
        "congested-wifi",
        "competitive",
    ];

    /// Creates conditions from their parts. `loss_rate` is clamped to `[0, 1]`.
    #[must_use]
    pub fn new(latency: Duration, jitter: Duration, loss_rate: f64) -> Self {
        Self {
            latency,
            jitter,
            loss_rate: loss_rate.clamp(0.0, 1.0),
        }
    }

    /// Creates a builder starting from perfect conditions.
    #[must_use]
    pub fn builder() -> NetworkConditionsBuilder {
        NetworkConditionsBuilder::new()
    }

    const fn preset_ms(latency_ms: u64, jitter_ms: u64, loss_rate: f64) -> Self {
        Self {
            latency: Duration::from_millis(latency_ms),
            jitter: Duration::from_millis(jitter_ms),
            loss_rate,
        }
    }

    /// LAN: 1 ms, no jitter, no loss.
    #[must_use]
    pub const fn perfect() -> Self {
        Self::preset_ms(1, 0, 0.0)
    }

    /// Fiber broadband: 5 ms ± 1 ms, 0.01% loss.
    #[must_use]
    pub const fn fiber() -> Self {
        Self::preset_ms(5, 1, 0.0001)
    }

    /// Cable internet: 20 ms ± 5 ms, 0.1% loss.
    #[must_use]
    pub const fn cable() -> Self {
        Self::preset_ms(20, 5, 0.001)
    }

    /// Good 4G signal: 50 ms ± 10 ms, 0.1% loss.
    #[must_use]
    pub const fn mobile_good() -> Self {
        Self::preset_ms(50, 10, 0.001)
    }

    /// Poor 4G signal: 150 ms ± 50 ms, 2% loss.
    #[must_use]
    pub const fn mobile_poor() -> Self {
        Self::preset_ms(150, 50, 0.02)
    }

    /// 3G: 200 ms ± 100 ms, 5% loss.
    #[must_use]
    pub const fn mobile_3g() -> Self {
        Self::preset_ms(200, 100, 0.05)
    }

    /// Satellite: 600 ms ± 20 ms, 1% loss.
    #[must_use]
    pub const fn satellite() -> Self {
        Self::preset_ms(600, 20, 0.01)
    }

    /// Overloaded Wi-Fi: 100 ms ± 150 ms, 8% loss.
    #[must_use]
    pub const fn congested_wifi() -> Self {
        Self::preset_ms(100, 150, 0.08)
    }

    /// The worst connection still acceptable for competitive play: 30 ms ± 5 ms.
    #[must_use]
    pub const fn competitive() -> Self {
        Self::preset_ms(30, 5, 0.001)
    }

    /// Looks up a preset by name. Underscores and hyphens are interchangeable
    /// and case is ignored.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        let conditions = match normalized.as_str() {
            "perfect" | "lan" => Self::perfect(),
            "fiber" => Self::fiber(),
            "cable" => Self::cable(),
            "mobile-good" | "4g-good" => Self::mobile_good(),
            "mobile-poor" | "4g-poor" => Self::mobile_poor(),
            "mobile-3g" | "3g" => Self::mobile_3g(),
            "satellite" => Self::satellite(),
            "congested-wifi" | "wifi" => Self::congested_wifi(),
            "competitive" => Self::competitive(),
            _ => return None,
        };
        Some(conditions)
    }

    /// Validates the loss rate.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if `loss_rate` is outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), RewindError> {
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(RewindError::InvalidConfig {
                info: format!("loss_rate must be in [0, 1], got {}", self.loss_rate),
            });
        }
        Ok(())
    }
}

/// Builder for [`NetworkConditions`].
#[derive(Debug, Clone, Default)]
pub struct NetworkConditionsBuilder {
    conditions: NetworkConditions,
}

impl NetworkConditionsBuilder {
    /// Creates a builder starting from [`NetworkConditions::perfect`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base latency.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.conditions.latency = latency;
        self
    }

    /// Sets the base latency in milliseconds.
    #[must_use]
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.conditions.latency = Duration::from_millis(ms);
        self
    }

    /// Sets the jitter bound.
    #[must_use]
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.conditions.jitter = jitter;
        self
    }

    /// Sets the jitter bound in milliseconds.
    #[must_use]
    pub fn jitter_ms(mut self, ms: u64) -> Self {
        self.conditions.jitter = Duration::from_millis(ms);
        self
    }

    /// Sets the loss rate, clamped to `[0, 1]`.
    #[must_use]
    pub fn loss_rate(mut self, rate: f64) -> Self {
        self.conditions.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Builds the conditions.
    #[must_use]
    pub fn build(self) -> NetworkConditions {
        self.conditions
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
    fn every_listed_preset_resolves() {
        for name in NetworkConditions::PRESET_NAMES {
            let conditions = NetworkConditions::preset(name)
                .unwrap_or_else(|| panic!("preset {name} should exist"));
            conditions.validate().unwrap();
        }
    }

    #[test]
    fn preset_names_are_forgiving() {
        assert_eq!(
            NetworkConditions::preset("Congested_WiFi"),
            Some(NetworkConditions::congested_wifi())
        );
        assert_eq!(NetworkConditions::preset("3g"), Some(NetworkConditions::mobile_3g()));
        assert_eq!(NetworkConditions::preset("dial-up"), None);
    }

    #[test]
    fn builder_clamps_loss() {
        let conditions = NetworkConditions::builder()
            .latency_ms(10)
            .jitter(Duration::from_millis(3))
            .loss_rate(2.0)
            .build();
        assert_eq!(conditions.latency, Duration::from_millis(10));
        assert_eq!(conditions.jitter, Duration::from_millis(3));
        assert_eq!(conditions.loss_rate, 1.0);
    }

    #[test]
    fn validate_rejects_out_of_range_loss() {
        let conditions = NetworkConditions {
            loss_rate: -0.1,
            ..NetworkConditions::perfect()
        };
        assert!(conditions.validate().is_err());
    }
}
