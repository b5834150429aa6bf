//! Counters describing link behavior.

use serde::Serialize;
use web_time::Duration;

/// Counters describing what a [`SimulatedLink`](super::link::SimulatedLink) did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
#[must_use = "LinkStats should be inspected or used after being queried"]
pub struct LinkStats {
    /// Transits requested.
    pub sent: u64,
    /// Transits delivered.
    pub delivered: u64,
    /// Transits dropped.
    pub dropped: u64,
    /// Sum of all delivery delays.
    pub total_delay: Duration,
    /// Longest delivery delay.
    pub max_delay: Duration,
}

impl LinkStats {
    /// Creates empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one delivered transit.
    pub fn record_delivery(&mut self, delay: Duration) {
        self.sent += 1;
        self.delivered += 1;
        self.total_delay = self.total_delay.saturating_add(delay);
        self.max_delay = self.max_delay.max(delay);
    }

    /// Records one dropped transit.
    pub fn record_drop(&mut self) {
        self.sent += 1;
        self.dropped += 1;
    }

    /// Fraction of transits dropped.
    #[must_use]
    pub fn loss_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.dropped as f64 / self.sent as f64
        }
    }

    /// Mean delay over delivered transits.
    #[must_use]
    pub fn average_delay(&self) -> Duration {
        if self.delivered == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((self.total_delay.as_nanos() / u128::from(self.delivered)) as u64)
        }
    }

    /// Adds another link's counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.sent += other.sent;
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.total_delay = self.total_delay.saturating_add(other.total_delay);
        self.max_delay = self.max_delay.max(other.max_delay);
    }
}

impl std::fmt::Display for LinkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            sent,
            delivered,
            dropped,
            total_delay: _,
            max_delay,
        } = self;

        write!(
            f,
            "LinkStats {{ sent: {}, delivered: {}, dropped: {} ({:.2}%), avg_delay: {:.1}ms, max_delay: {:.1}ms }}",
            sent,
            delivered,
            dropped,
            self.loss_rate() * 100.0,
            self.average_delay().as_secs_f64() * 1000.0,
            max_delay.as_secs_f64() * 1000.0
        )
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
    fn empty_stats_have_zero_rates() {
        let stats = LinkStats::new();
        assert_eq!(stats.loss_rate(), 0.0);
        assert_eq!(stats.average_delay(), Duration::ZERO);
    }

    #[test]
    fn records_deliveries_and_drops() {
        let mut stats = LinkStats::new();
        stats.record_delivery(Duration::from_millis(10));
        stats.record_delivery(Duration::from_millis(30));
        stats.record_drop();

        assert_eq!(stats.sent, 3);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.average_delay(), Duration::from_millis(20));
        assert_eq!(stats.max_delay, Duration::from_millis(30));
        assert!((stats.loss_rate() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn merge_combines() {
        let mut a = LinkStats::new();
        a.record_delivery(Duration::from_millis(5));
        let mut b = LinkStats::new();
        b.record_drop();
        b.record_delivery(Duration::from_millis(50));
        a.merge(&b);
        assert_eq!(a.sent, 3);
        assert_eq!(a.max_delay, Duration::from_millis(50));
    }

    #[test]
    fn display_mentions_counts() {
        let mut stats = LinkStats::new();
        stats.record_drop();
        let text = stats.to_string();
        assert!(text.contains("dropped: 1 (100.00%)"));
    }
}
