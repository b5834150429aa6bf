//! The movement model shared by client prediction and the authoritative server.
//!
//! One integration step:
//!
//! ```text
//! v' = (v + movement * acceleration * dt) * friction
//! p' = p + v' * dt
//! ```
//!
//! Client and server MUST integrate with the same [`MovementModel`] value,
//! including the same `tick_interval`. Any difference turns every reconcile
//! into a rollback, and the measured prediction error stops reflecting latency.
//! [`ClientPrediction`](crate::prediction::ClientPrediction) and
//! [`ServerSimulation`](crate::server::ServerSimulation) therefore both take the
//! model by value rather than building their own.

use serde::{Deserialize, Serialize};

use crate::prediction::{GameState, PlayerInput};

/// Deterministic velocity/position integrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementModel {
    /// Velocity gained per second per unit of movement input.
    pub acceleration: f64,
    /// Multiplicative damping applied to velocity every step.
    pub friction: f64,
    /// Integration step in seconds.
    pub tick_interval: f64,
}

impl MovementModel {
    /// Default acceleration per unit of input.
    pub const DEFAULT_ACCELERATION: f64 = 10.0;

    /// Default per-step velocity damping.
    pub const DEFAULT_FRICTION: f64 = 0.9;

    /// Creates the default model stepping at `tick_rate_hz`.
    #[must_use]
    pub fn from_tick_rate(tick_rate_hz: u32) -> Self {
        Self::with_tick_interval(1.0 / f64::from(tick_rate_hz.max(1)))
    }

    /// Creates the default model with an explicit step length.
    #[must_use]
    pub const fn with_tick_interval(tick_interval: f64) -> Self {
        Self {
            acceleration: Self::DEFAULT_ACCELERATION,
            friction: Self::DEFAULT_FRICTION,
            tick_interval,
        }
    }

    /// Applies one input to `state`.
    ///
    /// The result carries the input's timestamp and sequence number, the
    /// previous health, and a fresh checksum.
    #[must_use]
    pub fn apply(&self, state: &GameState, input: &PlayerInput) -> GameState {
        let dt = self.tick_interval;
        let velocity = (state.velocity + input.movement * (self.acceleration * dt)) * self.friction;
        let position = state.position + velocity * dt;
        GameState::new(
            input.timestamp,
            position,
            velocity,
            state.health,
            input.sequence_number,
        )
    }
}

impl Default for MovementModel {
    fn default() -> Self {
        Self::from_tick_rate(60)
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
    use crate::{SequenceNumber, Vector3};

    #[test]
    fn one_step_matches_closed_form() {
        let model = MovementModel::with_tick_interval(0.1);
        let state = GameState::initial(0.0, Vector3::ZERO);
        let input = PlayerInput::new(SequenceNumber::new(1), 0.1, Vector3::new(1.0, 0.0, 0.0));

        let next = model.apply(&state, &input);

        // v = (0 + 1 * 10 * 0.1) * 0.9 = 0.9; p = 0.9 * 0.1 = 0.09
        assert!((next.velocity.x - 0.9).abs() < 1e-12);
        assert!((next.position.x - 0.09).abs() < 1e-12);
        assert_eq!(next.sequence_number, SequenceNumber::new(1));
        assert_eq!(next.timestamp, 0.1);
    }

    #[test]
    fn zero_input_decays_velocity() {
        let model = MovementModel::default();
        let mut state = GameState::new(
            0.0,
            Vector3::ZERO,
            Vector3::new(5.0, 0.0, 0.0),
            100.0,
            SequenceNumber::ZERO,
        );
        for seq in 1..=5 {
            let input = PlayerInput::new(SequenceNumber::new(seq), 0.0, Vector3::ZERO);
            let next = model.apply(&state, &input);
            assert!(next.velocity.x < state.velocity.x);
            state = next;
        }
    }

    #[test]
    fn apply_is_deterministic_and_preserves_health() {
        let model = MovementModel::default();
        let state = GameState::new(
            1.0,
            Vector3::new(3.0, 0.0, -2.0),
            Vector3::new(0.5, 0.0, 0.5),
            42.0,
            SequenceNumber::new(7),
        );
        let input = PlayerInput::new(SequenceNumber::new(8), 1.016, Vector3::new(-0.3, 0.0, 0.8));
        let a = model.apply(&state, &input);
        let b = model.apply(&state, &input);
        assert_eq!(a, b);
        assert_eq!(a.health, 42.0);
        assert_eq!(a.checksum, b.checksum);
    }

    #[test]
    fn from_tick_rate_sets_interval() {
        let model = MovementModel::from_tick_rate(30);
        assert!((model.tick_interval - 1.0 / 30.0).abs() < 1e-12);
        assert_eq!(model.acceleration, MovementModel::DEFAULT_ACCELERATION);
        assert_eq!(model.friction, MovementModel::DEFAULT_FRICTION);
    }
}
