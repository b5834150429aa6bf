//! # rewindkit
//!
//! Server-side lag compensation and client-side prediction, with the
//! scenario harness needed to measure both under simulated network conditions.
//!
//! The crate has two halves that solve the same problem from opposite ends:
//! reconciling divergent, time-skewed views of moving entities.
//!
//! - **Rewind** ([`lag_compensation`], [`history`]): the server keeps a short,
//!   time-indexed history of every entity and evaluates each shot against the
//!   world *as the shooter saw it*, bounded by a compensation window.
//! - **Predict and reconcile** ([`prediction`], [`server`], [`movement`]): the
//!   client applies its own input immediately, then corrects itself when the
//!   authoritative state arrives, rolling back and replaying unacknowledged
//!   inputs when the two disagree.
//!
//! Nothing in the core aborts a scenario. Anomalies (rejected shots, desyncs,
//! duplicate inputs, lookups outside the retained window) degrade metrics and
//! are reported through an injected [`telemetry::EventObserver`]; the only
//! `Err` values are caller mistakes ([`RewindError`]).
//!
//! ```
//! use rewindkit::config::PredictionConfig;
//! use rewindkit::prediction::{ClientPrediction, PlayerInput};
//! use rewindkit::{SequenceNumber, Vector3};
//!
//! let mut client = ClientPrediction::new(PredictionConfig::default());
//! let input = PlayerInput::new(SequenceNumber::new(1), 0.016, Vector3::new(1.0, 0.0, 0.0));
//! let predicted = client.predict(input);
//! assert!(predicted.position.x > 0.0);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use error::RewindError;
pub use harness::patterns::MovementPattern;
pub use lag_compensation::{
    Entity, HitResult, LagCompensationEngine, LagCompensationReport, Shot, ShotOutcome,
};
pub use network::conditions::NetworkConditions;
pub use network::link::{SimulatedLink, Transit, TransitModel};
pub use prediction::{ClientPrediction, GameState, PlayerInput, PredictionReport, ReconcileOutcome};
pub use report::{Quality, ScenarioReport};
pub use server::ServerSimulation;
pub use vector::Vector3;

pub mod checksum;
pub mod config;
pub mod error;
pub mod hash;
pub mod history;
pub mod lag_compensation;
pub mod movement;
pub mod prediction;
pub mod report;
pub mod rng;
pub mod server;
pub mod telemetry;
pub mod vector;

pub mod network {
    //! The seeded network-transit collaborator used by the scenario drivers.
    pub mod conditions;
    pub mod link;
    pub mod link_stats;
}

pub mod harness {
    //! Scenario drivers that feed the core engines and aggregate results.
    pub mod lag_scenario;
    pub mod patterns;
    pub mod prediction_scenario;
    pub mod suite;

    #[cfg(feature = "tokio")]
    pub mod concurrent;
}

/// Stable identity of a simulated entity (player).
///
/// Ordered so that per-entity maps iterate deterministically.
///
/// ```
/// use rewindkit::EntityId;
///
/// let a = EntityId::new(1);
/// let b = EntityId::new(2);
/// assert!(a < b);
/// assert_eq!(a.to_string(), "1");
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct EntityId(u32);

impl EntityId {
    /// Creates an id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        EntityId(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-client input sequence number.
///
/// Clients number their inputs 1, 2, 3, ...; [`SequenceNumber::ZERO`] marks the
/// initial state that no input produced. A [`GameState`] carries the sequence
/// number of the input that produced it, which is how reconciliation pairs a
/// server state with the client's own prediction.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct SequenceNumber(u32);

impl SequenceNumber {
    /// The sequence number of the initial state.
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    /// The first sequence number a client assigns.
    pub const FIRST: SequenceNumber = SequenceNumber(1);

    /// Creates a sequence number from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(seq: u32) -> Self {
        SequenceNumber(seq)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the following sequence number, saturating at `u32::MAX`.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        SequenceNumber(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn sequence_number_next_saturates() {
        assert_eq!(SequenceNumber::ZERO.next(), SequenceNumber::FIRST);
        assert_eq!(
            SequenceNumber::new(u32::MAX).next(),
            SequenceNumber::new(u32::MAX)
        );
    }

    #[test]
    fn entity_ids_order_numerically() {
        let mut ids = vec![EntityId::new(3), EntityId::new(1), EntityId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![EntityId::new(1), EntityId::new(2), EntityId::new(3)]);
        assert_eq!(EntityId::new(9).as_u32(), 9);
    }
}
