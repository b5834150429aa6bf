//! Client-side prediction and server reconciliation.
//!
//! A [`ClientPrediction`] applies each local input immediately
//! ([`predict`](ClientPrediction::predict)), remembers the predicted state and
//! the unacknowledged input, and later compares its own prediction against the
//! authoritative state for the same sequence number
//! ([`reconcile`](ClientPrediction::reconcile)).
//!
//! When the two disagree by more than the rollback threshold, the client
//! discards its prediction, adopts the server state, and replays every input
//! the server has not yet acknowledged, in ascending sequence order. Replay
//! never reorders inputs.
//!
//! A server state the client has no buffered prediction for is a desync: it is
//! counted and reported, and the current prediction is kept as is.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::checksum::position_checksum;
use crate::config::PredictionConfig;
use crate::movement::MovementModel;
use crate::net_event;
use crate::report::{max_of, mean};
use crate::telemetry::{default_observer, EventKind, EventObserver, EventSeverity};
use crate::{EntityId, SequenceNumber, Vector3};

/// Named boolean actions (fire, jump, ...) attached to an input.
pub type ActionMap = BTreeMap<String, bool>;

/// Health every state starts with.
pub const DEFAULT_HEALTH: f64 = 100.0;

/// One tick of player input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Client time at which the input was sampled, in seconds.
    pub timestamp: f64,
    /// Desired movement direction; components are typically in `[-1, 1]`.
    pub movement: Vector3,
    /// Discrete actions pressed this tick.
    pub actions: ActionMap,
    /// Strictly increasing per client, starting at 1.
    pub sequence_number: SequenceNumber,
}

impl PlayerInput {
    /// Creates an input with no actions.
    #[must_use]
    pub fn new(sequence_number: SequenceNumber, timestamp: f64, movement: Vector3) -> Self {
        Self {
            timestamp,
            movement,
            actions: ActionMap::new(),
            sequence_number,
        }
    }

    /// Sets one named action.
    #[must_use]
    pub fn with_action(mut self, name: impl Into<String>, pressed: bool) -> Self {
        self.actions.insert(name.into(), pressed);
        self
    }
}

/// A simulated player state at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Time of the input that produced this state, in seconds.
    pub timestamp: f64,
    /// Position in world units.
    pub position: Vector3,
    /// Velocity in world units per second.
    pub velocity: Vector3,
    /// Health; `<= 0` means dead.
    pub health: f64,
    /// Sequence number of the input that produced this state.
    pub sequence_number: SequenceNumber,
    /// Quantized-position checksum, see [`position_checksum`].
    pub checksum: u32,
}

impl GameState {
    /// Creates a state and computes its checksum.
    #[must_use]
    pub fn new(
        timestamp: f64,
        position: Vector3,
        velocity: Vector3,
        health: f64,
        sequence_number: SequenceNumber,
    ) -> Self {
        Self {
            timestamp,
            position,
            velocity,
            health,
            sequence_number,
            checksum: position_checksum(position),
        }
    }

    /// The state before any input: at rest, full health, sequence zero.
    #[must_use]
    pub fn initial(timestamp: f64, position: Vector3) -> Self {
        Self::new(
            timestamp,
            position,
            Vector3::ZERO,
            DEFAULT_HEALTH,
            SequenceNumber::ZERO,
        )
    }

    /// Recomputes the checksum after the position was changed in place.
    pub fn refresh_checksum(&mut self) {
        self.checksum = position_checksum(self.position);
    }

    /// Returns `true` if the stored checksum matches the position.
    #[must_use]
    pub fn checksum_matches(&self) -> bool {
        self.checksum == position_checksum(self.position)
    }
}

/// What [`ClientPrediction::reconcile`] did with a server state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// No buffered prediction had the server's sequence number. The current
    /// prediction was left untouched.
    Desync,
    /// The prediction was off by more than the threshold. The client adopted
    /// the server state and replayed `replayed` pending inputs on top of it.
    Rolledback {
        /// Distance between predicted and authoritative position.
        error: f64,
        /// Number of inputs replayed.
        replayed: usize,
    },
    /// The prediction was within the threshold.
    Confirmed {
        /// Distance between predicted and authoritative position.
        error: f64,
    },
}

impl ReconcileOutcome {
    /// Returns `true` for [`ReconcileOutcome::Rolledback`].
    #[must_use]
    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::Rolledback { .. })
    }

    /// The measured position error, if a prediction was found.
    #[must_use]
    pub fn error(&self) -> Option<f64> {
        match self {
            Self::Desync => None,
            Self::Rolledback { error, .. } | Self::Confirmed { error } => Some(*error),
        }
    }
}

/// Raw prediction counters. Only the owning [`ClientPrediction`] mutates them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictionMetrics {
    /// Inputs predicted.
    pub total_inputs: u64,
    /// Position error of every matched reconcile.
    pub position_errors: Vec<f64>,
    /// Velocity error of every matched reconcile.
    pub velocity_errors: Vec<f64>,
    /// Reconciles that rolled back.
    pub rollback_count: u64,
    /// Reconciles within the threshold.
    pub prediction_hits: u64,
    /// Reconciles beyond the threshold.
    pub prediction_misses: u64,
    /// Server states with no matching prediction.
    pub desync_events: u64,
}

impl PredictionMetrics {
    /// Derives rates and aggregates without modifying the counters.
    #[must_use]
    pub fn calculate(&self) -> PredictionReport {
        let compared = self.prediction_hits + self.prediction_misses;
        PredictionReport {
            total_inputs: self.total_inputs,
            average_position_error: mean(&self.position_errors),
            max_position_error: max_of(&self.position_errors),
            average_velocity_error: mean(&self.velocity_errors),
            rollback_count: self.rollback_count,
            rollback_rate: if self.total_inputs > 0 {
                self.rollback_count as f64 / self.total_inputs as f64
            } else {
                0.0
            },
            // Nothing compared means nothing disagreed.
            prediction_accuracy: if compared > 0 {
                self.prediction_hits as f64 / compared as f64
            } else {
                1.0
            },
            desync_events: self.desync_events,
        }
    }

    /// Adds another client's counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.total_inputs += other.total_inputs;
        self.position_errors.extend_from_slice(&other.position_errors);
        self.velocity_errors.extend_from_slice(&other.velocity_errors);
        self.rollback_count += other.rollback_count;
        self.prediction_hits += other.prediction_hits;
        self.prediction_misses += other.prediction_misses;
        self.desync_events += other.desync_events;
    }
}

/// Derived prediction statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[must_use = "PredictionReport should be inspected or used after being calculated"]
pub struct PredictionReport {
    /// Inputs predicted.
    pub total_inputs: u64,
    /// Mean position error over matched reconciles.
    pub average_position_error: f64,
    /// Largest position error over matched reconciles.
    pub max_position_error: f64,
    /// Mean velocity error over matched reconciles.
    pub average_velocity_error: f64,
    /// Reconciles that rolled back.
    pub rollback_count: u64,
    /// Rollbacks per predicted input.
    pub rollback_rate: f64,
    /// `hits / (hits + misses)`; 1.0 when nothing was compared.
    pub prediction_accuracy: f64,
    /// Server states with no matching prediction.
    pub desync_events: u64,
}

impl std::fmt::Display for PredictionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            total_inputs,
            average_position_error,
            max_position_error,
            average_velocity_error,
            rollback_count,
            rollback_rate,
            prediction_accuracy,
            desync_events,
        } = self;
        write!(
            f,
            "PredictionReport {{ inputs: {}, avg_error: {:.3}, max_error: {:.3}, avg_velocity_error: {:.3}, \
             rollbacks: {} ({:.1}%), accuracy: {:.1}%, desyncs: {} }}",
            total_inputs,
            average_position_error,
            max_position_error,
            average_velocity_error,
            rollback_count,
            rollback_rate * 100.0,
            prediction_accuracy * 100.0,
            desync_events
        )
    }
}

/// Client-side predict/reconcile state machine for one player.
pub struct ClientPrediction {
    config: PredictionConfig,
    model: MovementModel,
    client: Option<EntityId>,
    current: GameState,
    state_buffer: VecDeque<GameState>,
    pending_inputs: VecDeque<PlayerInput>,
    metrics: PredictionMetrics,
    observer: Arc<dyn EventObserver>,
}

impl ClientPrediction {
    /// Creates a client at the origin, logging events through tracing.
    #[must_use]
    pub fn new(config: PredictionConfig) -> Self {
        Self::with_observer(config, default_observer())
    }

    /// Creates a client at the origin that reports events to `observer`.
    #[must_use]
    pub fn with_observer(config: PredictionConfig, observer: Arc<dyn EventObserver>) -> Self {
        Self {
            model: MovementModel::from_tick_rate(config.tick_rate_hz),
            client: None,
            current: GameState::initial(0.0, Vector3::ZERO),
            state_buffer: VecDeque::with_capacity(config.state_buffer_capacity),
            pending_inputs: VecDeque::new(),
            metrics: PredictionMetrics::default(),
            observer,
            config,
        }
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

    /// The movement model used for prediction and replay. The server must use
    /// the same one.
    #[must_use]
    pub fn movement_model(&self) -> MovementModel {
        self.model
    }

    /// The current (possibly predicted) state.
    #[must_use]
    pub fn current_state(&self) -> &GameState {
        &self.current
    }

    /// Predicted states still available for reconciliation, oldest first.
    pub fn buffered_states(&self) -> impl Iterator<Item = &GameState> {
        self.state_buffer.iter()
    }

    /// Inputs not yet acknowledged by the server, oldest first.
    pub fn pending_inputs(&self) -> impl Iterator<Item = &PlayerInput> {
        self.pending_inputs.iter()
    }

    /// Number of unacknowledged inputs.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending_inputs.len()
    }

    /// Raw counters.
    #[must_use]
    pub fn metrics(&self) -> &PredictionMetrics {
        &self.metrics
    }

    /// Derived statistics.
    pub fn report(&self) -> PredictionReport {
        self.metrics.calculate()
    }

    /// Applies `input` to the current state immediately and remembers both.
    ///
    /// Inputs must arrive with strictly increasing sequence numbers.
    pub fn predict(&mut self, input: PlayerInput) -> GameState {
        let predicted = self.model.apply(&self.current, &input);

        if self.state_buffer.len() >= self.config.state_buffer_capacity {
            self.state_buffer.pop_front();
        }
        self.state_buffer.push_back(predicted);
        self.pending_inputs.push_back(input);
        self.current = predicted;
        self.metrics.total_inputs += 1;

        trace!(
            sequence = predicted.sequence_number.as_u32(),
            "predicted state {}",
            predicted.position
        );
        predicted
    }

    /// Compares the authoritative `server_state` with the client's own
    /// prediction for the same sequence number and corrects course.
    ///
    /// In every outcome, pending inputs up to and including the acknowledged
    /// sequence number are dropped.
    pub fn reconcile(&mut self, server_state: &GameState) -> ReconcileOutcome {
        let acknowledged = server_state.sequence_number;
        let matched = self
            .state_buffer
            .iter()
            .find(|state| state.sequence_number == acknowledged)
            .copied();

        let outcome = match matched {
            None => {
                self.metrics.desync_events += 1;
                let mut event = net_event!(
                    EventSeverity::Warning,
                    EventKind::Desync,
                    "no predicted state for sequence {}",
                    acknowledged
                )
                .with_sequence(acknowledged)
                .with_timestamp(server_state.timestamp)
                .with_context("buffered", self.state_buffer.len());
                if let Some(client) = self.client {
                    event = event.with_entity(client);
                }
                self.observer.on_event(&event);
                ReconcileOutcome::Desync
            },
            Some(local) => {
                let error = local.position.distance(server_state.position);
                self.metrics.position_errors.push(error);
                self.metrics
                    .velocity_errors
                    .push(local.velocity.distance(server_state.velocity));

                if error > self.config.rollback_error_threshold {
                    self.metrics.rollback_count += 1;
                    self.metrics.prediction_misses += 1;
                    let replayed = self.rollback_and_replay(server_state);
                    debug!(
                        sequence = acknowledged.as_u32(),
                        "Rollback performed: error={:.3}, replayed {} inputs", error, replayed
                    );
                    let mut event = net_event!(
                        EventSeverity::Info,
                        EventKind::Rollback,
                        "rolled back {:.3} units, replayed {} inputs",
                        error,
                        replayed
                    )
                    .with_sequence(acknowledged)
                    .with_timestamp(server_state.timestamp);
                    if let Some(client) = self.client {
                        event = event.with_entity(client);
                    }
                    self.observer.on_event(&event);
                    ReconcileOutcome::Rolledback { error, replayed }
                } else {
                    self.metrics.prediction_hits += 1;
                    ReconcileOutcome::Confirmed { error }
                }
            },
        };

        self.pending_inputs
            .retain(|input| input.sequence_number > acknowledged);
        outcome
    }

    /// Adopts `server_state` and replays every pending input newer than it.
    /// Buffered predictions for the replayed sequence numbers are replaced by
    /// the corrected states. Returns the number of inputs replayed.
    fn rollback_and_replay(&mut self, server_state: &GameState) -> usize {
        let acknowledged = server_state.sequence_number;
        self.current = *server_state;
        self.replace_buffered(*server_state);

        let mut to_replay: Vec<&PlayerInput> = self
            .pending_inputs
            .iter()
            .filter(|input| input.sequence_number > acknowledged)
            .collect();
        to_replay.sort_by_key(|input| input.sequence_number);

        let mut corrected = Vec::with_capacity(to_replay.len());
        let mut state = *server_state;
        for input in to_replay {
            state = self.model.apply(&state, input);
            corrected.push(state);
        }

        let replayed = corrected.len();
        for state in corrected {
            self.replace_buffered(state);
        }
        self.current = state;
        replayed
    }

    fn replace_buffered(&mut self, state: GameState) {
        if let Some(slot) = self
            .state_buffer
            .iter_mut()
            .find(|buffered| buffered.sequence_number == state.sequence_number)
        {
            *slot = state;
        }
    }
}

impl std::fmt::Debug for ClientPrediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPrediction")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("current", &self.current)
            .field("buffered", &self.state_buffer.len())
            .field("pending", &self.pending_inputs.len())
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

    fn input(seq: u32, x: f64) -> PlayerInput {
        PlayerInput::new(
            SequenceNumber::new(seq),
            f64::from(seq) / 60.0,
            Vector3::new(x, 0.0, 0.0),
        )
    }

    fn client_with_observer() -> (ClientPrediction, Arc<CollectingObserver>) {
        let observer = Arc::new(CollectingObserver::new());
        let client = ClientPrediction::with_observer(PredictionConfig::default(), observer.clone());
        (client, observer)
    }

    #[test]
    fn predict_buffers_state_and_input() {
        let (mut client, _) = client_with_observer();
        let state = client.predict(input(1, 1.0));
        assert_eq!(state.sequence_number, SequenceNumber::new(1));
        assert_eq!(client.current_state(), &state);
        assert_eq!(client.buffered_states().count(), 1);
        assert_eq!(client.pending_len(), 1);
        assert!(state.checksum_matches());
    }

    #[test]
    fn state_buffer_is_bounded() {
        let config = PredictionConfig {
            state_buffer_capacity: 4,
            ..PredictionConfig::default()
        };
        let mut client = ClientPrediction::new(config);
        for seq in 1..=10 {
            client.predict(input(seq, 1.0));
        }
        let buffered: Vec<u32> = client
            .buffered_states()
            .map(|s| s.sequence_number.as_u32())
            .collect();
        assert_eq!(buffered, vec![7, 8, 9, 10]);
    }

    #[test]
    fn matching_server_state_confirms() {
        let (mut client, observer) = client_with_observer();
        let predicted = client.predict(input(1, 1.0));
        client.predict(input(2, 1.0));

        let outcome = client.reconcile(&predicted);

        assert_eq!(outcome, ReconcileOutcome::Confirmed { error: 0.0 });
        assert_eq!(client.pending_len(), 1);
        assert_eq!(client.report().prediction_accuracy, 1.0);
        assert!(observer.is_empty());
    }

    #[test]
    fn divergent_server_state_rolls_back_and_replays_newer_inputs() {
        let (mut client, observer) = client_with_observer();
        for seq in 1..=5 {
            client.predict(input(seq, 1.0));
        }
        let mut server = *client.buffered_states().nth(1).unwrap();
        server.position = server.position + Vector3::new(0.0, 0.0, 0.5);
        server.refresh_checksum();

        let outcome = client.reconcile(&server);

        assert_eq!(
            outcome,
            ReconcileOutcome::Rolledback {
                error: 0.5,
                replayed: 3
            }
        );
        let pending: Vec<u32> = client
            .pending_inputs()
            .map(|i| i.sequence_number.as_u32())
            .collect();
        assert_eq!(pending, vec![3, 4, 5]);
        assert_eq!(client.current_state().sequence_number, SequenceNumber::new(5));
        assert!((client.current_state().position.z - 0.5).abs() < 1e-12);
        assert_eq!(client.metrics().rollback_count, 1);
        assert!(observer.has_event(EventKind::Rollback));
    }

    #[test]
    fn replay_matches_fresh_application_from_server_state() {
        let (mut client, _) = client_with_observer();
        let inputs: Vec<PlayerInput> = (1..=6).map(|s| input(s, f64::from(s) * 0.1)).collect();
        for i in &inputs {
            client.predict(i.clone());
        }
        let server = GameState::new(
            inputs[2].timestamp,
            Vector3::new(4.0, 0.0, 4.0),
            Vector3::new(1.0, 0.0, 0.0),
            100.0,
            SequenceNumber::new(3),
        );

        client.reconcile(&server);

        let model = client.movement_model();
        let mut expected = server;
        for i in &inputs[3..] {
            expected = model.apply(&expected, i);
        }
        assert_eq!(client.current_state(), &expected);
        let corrected = client.buffered_states().last().unwrap();
        assert_eq!(corrected, &expected);
    }

    #[test]
    fn unknown_sequence_is_a_desync_and_keeps_state() {
        let (mut client, observer) = client_with_observer();
        client.predict(input(1, 1.0));
        let before = *client.current_state();
        let server = GameState::new(
            1.0,
            Vector3::new(9.0, 0.0, 9.0),
            Vector3::ZERO,
            100.0,
            SequenceNumber::new(42),
        );

        let outcome = client.reconcile(&server);

        assert_eq!(outcome, ReconcileOutcome::Desync);
        assert_eq!(client.current_state(), &before);
        assert_eq!(client.metrics().desync_events, 1);
        assert_eq!(observer.count_of_kind(EventKind::Desync), 1);
        // Sequence 42 acknowledges everything older.
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn accuracy_counts_hits_over_comparisons() {
        let (mut client, _) = client_with_observer();
        let a = client.predict(input(1, 1.0));
        let b = client.predict(input(2, 1.0));
        client.reconcile(&a);
        let mut off = b;
        off.position.x += 1.0;
        client.reconcile(&off);

        let report = client.report();
        assert_eq!(report.prediction_accuracy, 0.5);
        assert_eq!(report.rollback_count, 1);
        assert_eq!(report.rollback_rate, 0.5);
        assert!((report.max_position_error - 1.0).abs() < 1e-12);
    }

    #[test]
    fn calculate_does_not_mutate() {
        let (mut client, _) = client_with_observer();
        let a = client.predict(input(1, 1.0));
        client.reconcile(&a);
        let before = client.metrics().clone();
        let _ = client.report();
        let _ = client.report();
        assert_eq!(client.metrics(), &before);
    }

    #[test]
    fn merge_adds_counters() {
        let mut a = PredictionMetrics {
            total_inputs: 2,
            position_errors: vec![0.1],
            prediction_hits: 1,
            ..PredictionMetrics::default()
        };
        let b = PredictionMetrics {
            total_inputs: 3,
            position_errors: vec![0.3],
            prediction_misses: 1,
            rollback_count: 1,
            ..PredictionMetrics::default()
        };
        a.merge(&b);
        assert_eq!(a.total_inputs, 5);
        assert_eq!(a.position_errors, vec![0.1, 0.3]);
        assert_eq!(a.calculate().prediction_accuracy, 0.5);
    }

    #[test]
    fn report_display_is_readable() {
        let text = PredictionReport::default().to_string();
        assert!(text.starts_with("PredictionReport {"));
        assert!(text.contains("desyncs: 0"));
    }
}
