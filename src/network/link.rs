//! Simulated transit of one payload across a link.
//!
//! The scenario drivers never move real packets. They ask a [`TransitModel`]
//! what would have happened to a payload, and schedule delivery on their own
//! (virtual or tokio) clock.
//!
//! ```
//! use rewindkit::network::conditions::NetworkConditions;
//! use rewindkit::network::link::{SimulatedLink, Transit, TransitModel};
//!
//! let mut link = SimulatedLink::new(NetworkConditions::cable(), 42);
//! match link.transit() {
//!     Transit::Delivered(delay) => assert!(delay.as_millis() <= 25),
//!     Transit::Dropped => {},
//! }
//! assert_eq!(link.stats().sent, 1);
//! ```

use web_time::Duration;

use super::conditions::NetworkConditions;
use super::link_stats::LinkStats;
use crate::config::saturating_secs;
use crate::rng::{Pcg32, Rng, SeedableRng};

/// What happened to one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transit {
    /// Delivered after the given one-way delay.
    Delivered(Duration),
    /// Lost in transit.
    Dropped,
}

impl Transit {
    /// The delay if delivered.
    #[must_use]
    pub fn delay(self) -> Option<Duration> {
        match self {
            Self::Delivered(delay) => Some(delay),
            Self::Dropped => None,
        }
    }
}

/// Decides the fate of each payload sent over a link.
pub trait TransitModel: Send {
    /// Decides the fate of the next payload.
    fn transit(&mut self) -> Transit;

    /// Counters accumulated so far.
    fn stats(&self) -> LinkStats;
}

/// Seeded link applying [`NetworkConditions`]:
/// `delay = max(0, latency + uniform(-jitter, jitter))`, dropped with
/// probability `loss_rate`.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    conditions: NetworkConditions,
    rng: Pcg32,
    stats: LinkStats,
}

impl SimulatedLink {
    /// Creates a link seeded with `seed`.
    #[must_use]
    pub fn new(conditions: NetworkConditions, seed: u64) -> Self {
        Self::with_rng(conditions, Pcg32::seed_from_u64(seed))
    }

    /// Creates a link drawing from an existing generator.
    #[must_use]
    pub fn with_rng(conditions: NetworkConditions, rng: Pcg32) -> Self {
        Self {
            conditions,
            rng,
            stats: LinkStats::default(),
        }
    }

    /// The conditions this link applies.
    #[must_use]
    pub fn conditions(&self) -> &NetworkConditions {
        &self.conditions
    }

    /// Replaces the conditions; counters are kept.
    pub fn set_conditions(&mut self, conditions: NetworkConditions) {
        self.conditions = conditions;
    }

    fn should_drop(&mut self) -> bool {
        let rate = self.conditions.loss_rate;
        if rate <= 0.0 {
            false
        } else if rate >= 1.0 {
            true
        } else {
            self.rng.gen_bool(rate)
        }
    }

    fn draw_delay(&mut self) -> Duration {
        let base = self.conditions.latency.as_secs_f64();
        let jitter = self.conditions.jitter.as_secs_f64();
        let offset = if jitter > 0.0 {
            self.rng.gen_range_f64(-jitter, jitter)
        } else {
            0.0
        };
        // Negative jitter reduces latency but not below zero.
        saturating_secs(base + offset)
    }
}

impl TransitModel for SimulatedLink {
    fn transit(&mut self) -> Transit {
        if self.should_drop() {
            self.stats.record_drop();
            return Transit::Dropped;
        }
        let delay = self.draw_delay();
        self.stats.record_delivery(delay);
        Transit::Delivered(delay)
    }

    fn stats(&self) -> LinkStats {
        self.stats
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
    fn perfect_link_never_drops() {
        let mut link = SimulatedLink::new(NetworkConditions::perfect(), 1);
        for _ in 0..1000 {
            assert_eq!(link.transit(), Transit::Delivered(Duration::from_millis(1)));
        }
        assert_eq!(link.stats().dropped, 0);
    }

    #[test]
    fn total_loss_drops_everything() {
        let conditions = NetworkConditions::builder().loss_rate(1.0).build();
        let mut link = SimulatedLink::new(conditions, 1);
        for _ in 0..100 {
            assert_eq!(link.transit(), Transit::Dropped);
        }
        assert_eq!(link.stats().loss_rate(), 1.0);
    }

    #[test]
    fn delay_stays_within_jitter_bounds() {
        let conditions = NetworkConditions::builder()
            .latency_ms(50)
            .jitter_ms(10)
            .build();
        let mut link = SimulatedLink::new(conditions, 9);
        for _ in 0..1000 {
            let delay = link.transit().delay().unwrap();
            assert!(delay >= Duration::from_millis(40));
            assert!(delay <= Duration::from_millis(60));
        }
    }

    #[test]
    fn delay_is_floored_at_zero() {
        let conditions = NetworkConditions::builder()
            .latency_ms(5)
            .jitter_ms(100)
            .build();
        let mut link = SimulatedLink::new(conditions, 3);
        let mut saw_zero = false;
        for _ in 0..1000 {
            let delay = link.transit().delay().unwrap();
            saw_zero |= delay == Duration::ZERO;
        }
        assert!(saw_zero);
    }

    #[test]
    fn loss_rate_is_roughly_honored() {
        let conditions = NetworkConditions::builder().loss_rate(0.1).build();
        let mut link = SimulatedLink::new(conditions, 77);
        for _ in 0..10_000 {
            let _ = link.transit();
        }
        let rate = link.stats().loss_rate();
        assert!((0.08..0.12).contains(&rate), "rate = {rate}");
    }

    #[test]
    fn same_seed_same_fates() {
        let conditions = NetworkConditions::mobile_poor();
        let mut a = SimulatedLink::new(conditions, 5);
        let mut b = SimulatedLink::new(conditions, 5);
        for _ in 0..500 {
            assert_eq!(a.transit(), b.transit());
        }
    }

    #[test]
    fn extreme_delays_saturate() {
        let conditions = NetworkConditions::new(Duration::MAX, Duration::MAX, 0.0);
        let mut link = SimulatedLink::new(conditions, 3);
        for _ in 0..100 {
            assert!(link.transit().delay().is_some());
        }
        assert_eq!(link.stats().delivered, 100);
        assert_eq!(link.stats().total_delay, Duration::MAX);
    }
}
