//! Client prediction and reconciliation tests.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use crate::common::{forward_inputs, input, observed_client};
use rewindkit::config::{PredictionConfig, ServerConfig};
use rewindkit::movement::MovementModel;
use rewindkit::telemetry::EventKind;
use rewindkit::{
    ClientPrediction, GameState, ReconcileOutcome, SequenceNumber, ServerSimulation, Vector3,
};

/// Feeds `count` inputs to `client` and to a server sharing its movement
/// model; returns the server's states in order.
fn in_lockstep(client: &mut ClientPrediction, count: u32) -> Vec<GameState> {
    let mut server = ServerSimulation::new(ServerConfig::default(), client.movement_model()).unwrap();
    forward_inputs(count)
        .into_iter()
        .map(|inp| {
            let _ = client.predict(inp.clone());
            server.process_input(&inp)
        })
        .collect()
}

fn shifted(state: &GameState, dx: f64) -> GameState {
    let mut moved = *state;
    moved.position = moved.position + Vector3::new(dx, 0.0, 0.0);
    moved.refresh_checksum();
    moved
}

#[test]
fn agreeing_server_never_rolls_back() {
    let mut client = ClientPrediction::new(PredictionConfig::default());
    let authoritative = in_lockstep(&mut client, 10);
    for state in &authoritative {
        let outcome = client.reconcile(state);
        assert_eq!(outcome, ReconcileOutcome::Confirmed { error: 0.0 });
    }
    let report = client.report();
    assert_eq!(report.rollback_count, 0);
    assert_eq!(report.prediction_accuracy, 1.0);
    assert_eq!(report.average_position_error, 0.0);
    assert_eq!(client.pending_len(), 0);
}

#[test]
fn disagreement_rolls_back_once_and_replays_newer_inputs() {
    let (mut client, observer) = observed_client(PredictionConfig::default());
    let authoritative = in_lockstep(&mut client, 10);

    let corrected = shifted(&authoritative[4], 0.5);
    let outcome = client.reconcile(&corrected);
    match outcome {
        ReconcileOutcome::Rolledback { error, replayed } => {
            assert!((error - 0.5).abs() < 1e-9);
            assert_eq!(replayed, 5);
        }
        other => panic!("expected a rollback, got {other:?}"),
    }
    assert_eq!(client.report().rollback_count, 1);
    assert_eq!(observer.count_of_kind(EventKind::Rollback), 1);

    // Replaying inputs 6..=10 on top of the corrected state.
    let model = client.movement_model();
    let mut expected = corrected;
    for inp in forward_inputs(10).iter().skip(5) {
        expected = model.apply(&expected, inp);
    }
    assert_eq!(client.current_state().position, expected.position);
    assert_eq!(client.current_state().sequence_number, SequenceNumber::new(10));

    // Buffered predictions now carry the corrected trajectory.
    let buffered_5 = client
        .buffered_states()
        .find(|s| s.sequence_number == SequenceNumber::new(5))
        .copied()
        .unwrap();
    assert_eq!(buffered_5.position, corrected.position);
    assert_eq!(client.pending_len(), 5);
}

#[test]
fn small_errors_are_tolerated() {
    let mut client = ClientPrediction::new(PredictionConfig::default());
    let authoritative = in_lockstep(&mut client, 3);
    let nudged = shifted(&authoritative[1], 0.05);
    let before = *client.current_state();
    match client.reconcile(&nudged) {
        ReconcileOutcome::Confirmed { error } => assert!((error - 0.05).abs() < 1e-9),
        other => panic!("expected confirmation, got {other:?}"),
    }
    assert_eq!(*client.current_state(), before);
    assert_eq!(client.pending_len(), 1);
}

#[test]
fn unknown_sequence_is_a_desync_that_keeps_the_prediction() {
    let (mut client, observer) = observed_client(PredictionConfig::default());
    for inp in forward_inputs(4) {
        let _ = client.predict(inp);
    }
    let before = *client.current_state();
    let stranger = GameState::new(
        1.0,
        Vector3::new(50.0, 0.0, 0.0),
        Vector3::ZERO,
        100.0,
        SequenceNumber::new(99),
    );
    assert_eq!(client.reconcile(&stranger), ReconcileOutcome::Desync);
    assert_eq!(*client.current_state(), before);
    assert_eq!(client.report().desync_events, 1);
    assert!(observer.has_event(EventKind::Desync));
    // Everything up to 99 counts as acknowledged.
    assert_eq!(client.pending_len(), 0);
}

#[test]
fn evicted_predictions_cannot_be_reconciled() {
    let config = PredictionConfig {
        state_buffer_capacity: 4,
        ..PredictionConfig::default()
    };
    let mut client = ClientPrediction::new(config);
    let mut server = ServerSimulation::new(ServerConfig::default(), client.movement_model()).unwrap();
    let mut first = None;
    for inp in forward_inputs(8) {
        let _ = client.predict(inp.clone());
        let state = server.process_input(&inp);
        first.get_or_insert(state);
    }
    assert_eq!(client.buffered_states().count(), 4);
    assert_eq!(client.reconcile(&first.unwrap()), ReconcileOutcome::Desync);
}

#[test]
fn reconciling_the_same_state_twice_is_harmless() {
    let mut client = ClientPrediction::new(PredictionConfig::default());
    let authoritative = in_lockstep(&mut client, 5);
    let state = shifted(&authoritative[2], 1.0);
    assert!(client.reconcile(&state).is_rollback());
    let after_first = *client.current_state();
    // The buffered prediction for 3 is now the server state itself.
    assert_eq!(client.reconcile(&state), ReconcileOutcome::Confirmed { error: 0.0 });
    assert_eq!(*client.current_state(), after_first);
    assert_eq!(client.report().rollback_count, 1);
}

#[test]
fn actions_do_not_affect_movement() {
    let model = MovementModel::default();
    let plain = input(1, Vector3::new(0.0, 0.0, 1.0));
    let firing = plain.clone().with_action("fire", true);
    let start = GameState::initial(0.0, Vector3::ZERO);
    assert_eq!(model.apply(&start, &plain), model.apply(&start, &firing));
}
