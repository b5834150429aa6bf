//! Authoritative server-side processing of one client's inputs.
//!
//! The server integrates inputs with the same [`MovementModel`] the client
//! predicts with, then applies corrections the client cannot know about:
//! positions are clamped into the world volume and speeds above the limit are
//! scaled down, keeping their direction. Corrections never reject an input.
//!
//! Re-delivered inputs are idempotent: a sequence number the server has
//! already processed returns the current state unchanged.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::config::ServerConfig;
use crate::hash::DeterministicBuildHasher;
use crate::movement::MovementModel;
use crate::net_event;
use crate::prediction::{GameState, PlayerInput};
use crate::telemetry::{default_observer, EventKind, EventObserver, EventSeverity};
use crate::{EntityId, RewindError, SequenceNumber, Vector3};

/// Counters kept by a [`ServerSimulation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Inputs applied.
    pub processed_inputs: u64,
    /// Inputs ignored because their sequence number was already processed.
    pub duplicate_inputs: u64,
    /// Applied inputs whose resulting position had to be clamped.
    pub position_clamps: u64,
    /// Applied inputs whose resulting speed had to be limited.
    pub speed_clamps: u64,
}

impl ServerStats {
    /// Adds another server's counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.processed_inputs += other.processed_inputs;
        self.duplicate_inputs += other.duplicate_inputs;
        self.position_clamps += other.position_clamps;
        self.speed_clamps += other.speed_clamps;
    }
}

/// Authoritative simulation of one player.
pub struct ServerSimulation {
    config: ServerConfig,
    model: MovementModel,
    client: Option<EntityId>,
    current: GameState,
    processed: HashSet<SequenceNumber, DeterministicBuildHasher>,
    stats: ServerStats,
    observer: Arc<dyn EventObserver>,
}

impl ServerSimulation {
    /// Creates a server for a player at the origin.
    ///
    /// `model` must be the client's model (see
    /// [`ClientPrediction::movement_model`](crate::prediction::ClientPrediction::movement_model)).
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: ServerConfig, model: MovementModel) -> Result<Self, RewindError> {
        Self::with_observer(config, model, default_observer())
    }

    /// Creates a server that reports events to `observer`.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if `config` does not validate.
    pub fn with_observer(
        config: ServerConfig,
        model: MovementModel,
        observer: Arc<dyn EventObserver>,
    ) -> Result<Self, RewindError> {
        config.validate()?;
        Ok(Self {
            config,
            model,
            client: None,
            current: GameState::initial(0.0, Vector3::ZERO),
            processed: HashSet::with_hasher(DeterministicBuildHasher),
            stats: ServerStats::default(),
            observer,
        })
    }

    /// Tags reported events with this client's id.
    #[must_use]
    pub fn for_client(mut self, client: EntityId) -> Self {
        self.client = Some(client);
        self
    }

    /// Starts from `state` instead of the origin.
    #[must_use]
    pub fn with_initial_state(mut self, state: GameState) -> Self {
        self.current = state;
        self
    }

    /// The latest authoritative state.
    #[must_use]
    pub fn current_state(&self) -> &GameState {
        &self.current
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    /// Returns `true` if `sequence` was already applied.
    #[must_use]
    pub fn has_processed(&self, sequence: SequenceNumber) -> bool {
        self.processed.contains(&sequence)
    }

    /// Applies `input` authoritatively and returns the resulting state.
    ///
    /// An already-processed sequence number is a no-op that returns the
    /// current state.
    pub fn process_input(&mut self, input: &PlayerInput) -> GameState {
        if self.processed.contains(&input.sequence_number) {
            self.stats.duplicate_inputs += 1;
            let mut event = net_event!(
                EventSeverity::Warning,
                EventKind::DuplicateInput,
                "duplicate input {}",
                input.sequence_number
            )
            .with_sequence(input.sequence_number)
            .with_timestamp(input.timestamp);
            if let Some(client) = self.client {
                event = event.with_entity(client);
            }
            self.observer.on_event(&event);
            return self.current;
        }

        let next = self.enforce_bounds(self.model.apply(&self.current, input));
        self.processed.insert(input.sequence_number);
        self.stats.processed_inputs += 1;
        self.current = next;
        trace!(
            sequence = input.sequence_number.as_u32(),
            "server state {}",
            next.position
        );
        next
    }

    /// Clamps position into the world volume and limits speed.
    fn enforce_bounds(&mut self, mut state: GameState) -> GameState {
        let ServerConfig {
            world_half_extent,
            max_height,
            max_speed,
        } = self.config;

        let clamped = Vector3::new(
            state.position.x.clamp(-world_half_extent, world_half_extent),
            state.position.y.clamp(0.0, max_height),
            state.position.z.clamp(-world_half_extent, world_half_extent),
        );
        if clamped != state.position {
            self.stats.position_clamps += 1;
            state.position = clamped;
            state.refresh_checksum();
        }

        let speed = state.velocity.length();
        if speed > max_speed {
            self.stats.speed_clamps += 1;
            state.velocity = state.velocity * (max_speed / speed);
        }
        state
    }
}

impl std::fmt::Debug for ServerSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSimulation")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("current", &self.current)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
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
    use crate::telemetry::CollectingObserver;

    fn server() -> (ServerSimulation, Arc<CollectingObserver>) {
        let observer = Arc::new(CollectingObserver::new());
        let server = ServerSimulation::with_observer(
            ServerConfig::default(),
            MovementModel::default(),
            observer.clone(),
        )
        .unwrap();
        (server, observer)
    }

    fn input(seq: u32, movement: Vector3) -> PlayerInput {
        PlayerInput::new(SequenceNumber::new(seq), f64::from(seq) / 60.0, movement)
    }

    #[test]
    fn applies_shared_movement_model() {
        let (mut server, _) = server();
        let i = input(1, Vector3::new(1.0, 0.0, 0.0));
        let expected = MovementModel::default().apply(&GameState::initial(0.0, Vector3::ZERO), &i);
        assert_eq!(server.process_input(&i), expected);
        assert!(server.has_processed(SequenceNumber::new(1)));
    }

    #[test]
    fn duplicate_input_returns_unchanged_state() {
        let (mut server, observer) = server();
        let i = input(1, Vector3::new(1.0, 0.0, 1.0));
        let once = server.process_input(&i);
        let twice = server.process_input(&i);

        assert_eq!(once, twice);
        assert_eq!(server.current_state(), &once);
        assert_eq!(server.stats().processed_inputs, 1);
        assert_eq!(server.stats().duplicate_inputs, 1);
        assert_eq!(observer.count_of_kind(EventKind::DuplicateInput), 1);
    }

    #[test]
    fn position_is_clamped_into_world() {
        let (server, _) = server();
        let start = GameState::new(
            0.0,
            Vector3::new(999.99, 0.0, -999.99),
            Vector3::new(10.0, -5.0, -10.0),
            100.0,
            SequenceNumber::ZERO,
        );
        let mut server = server.with_initial_state(start);
        let state = server.process_input(&input(1, Vector3::ZERO));

        assert_eq!(state.position.x, 1000.0);
        assert_eq!(state.position.y, 0.0);
        assert_eq!(state.position.z, -1000.0);
        assert!(state.checksum_matches());
        assert_eq!(server.stats().position_clamps, 1);
    }

    #[test]
    fn speed_is_limited_preserving_direction() {
        let (server, _) = server();
        let start = GameState::new(
            0.0,
            Vector3::ZERO,
            Vector3::new(30.0, 0.0, 40.0),
            100.0,
            SequenceNumber::ZERO,
        );
        let mut server = server.with_initial_state(start);
        let state = server.process_input(&input(1, Vector3::ZERO));

        assert!((state.velocity.length() - 20.0).abs() < 1e-9);
        let direction = state.velocity.normalize();
        assert!((direction.x - 0.6).abs() < 1e-9);
        assert!((direction.z - 0.8).abs() < 1e-9);
        assert_eq!(server.stats().speed_clamps, 1);
    }

    #[test]
    fn stats_merge() {
        let mut a = ServerStats {
            processed_inputs: 1,
            duplicate_inputs: 2,
            position_clamps: 3,
            speed_clamps: 4,
        };
        let copy = a;
        a.merge(&copy);
        assert_eq!(a.processed_inputs, 2);
        assert_eq!(a.speed_clamps, 8);
    }
}
