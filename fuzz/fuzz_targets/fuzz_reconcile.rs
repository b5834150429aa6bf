//! Fuzz target for client prediction and reconciliation.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary predict/reconcile interleavings
//! - Acknowledged inputs never stay pending
//! - The state buffer never exceeds its capacity
//! - Every reconciliation is counted exactly once

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rewindkit::config::PredictionConfig;
use rewindkit::{ClientPrediction, GameState, PlayerInput, ReconcileOutcome, SequenceNumber, Vector3};

#[derive(Debug, Arbitrary)]
enum ClientOp {
    /// Predict the next input with the given movement.
    Predict { x: i8, z: i8, fire: bool },
    /// Reconcile against a buffered prediction shifted by `dx / 16` units.
    ConfirmBuffered { index: u8, dx: i8 },
    /// Reconcile against an arbitrary server state.
    Reconcile { sequence: u16, x: f64, z: f64 },
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    capacity: u8,
    threshold_sixteenths: u8,
    operations: Vec<ClientOp>,
}

fuzz_target!(|input: FuzzInput| {
    let config = PredictionConfig {
        state_buffer_capacity: usize::from(input.capacity.max(1)),
        rollback_error_threshold: f64::from(input.threshold_sixteenths) / 16.0,
        ..PredictionConfig::default()
    };
    let mut client = ClientPrediction::new(config);
    let mut next_sequence = 1u32;
    let mut reconciled = 0u64;

    for op in input.operations.iter().take(1000) {
        let acknowledged = match op {
            ClientOp::Predict { x, z, fire } => {
                let movement = Vector3::new(f64::from(*x) / 128.0, 0.0, f64::from(*z) / 128.0);
                let player_input = PlayerInput::new(
                    SequenceNumber::new(next_sequence),
                    f64::from(next_sequence) / 60.0,
                    movement,
                )
                .with_action("fire", *fire);
                let predicted = client.predict(player_input);
                assert_eq!(predicted.sequence_number, SequenceNumber::new(next_sequence));
                next_sequence += 1;
                None
            },
            ClientOp::ConfirmBuffered { index, dx } => {
                let buffered: Vec<GameState> = client.buffered_states().copied().collect();
                if buffered.is_empty() {
                    continue;
                }
                let mut state = buffered[usize::from(*index) % buffered.len()];
                state.position = state.position + Vector3::new(f64::from(*dx) / 16.0, 0.0, 0.0);
                state.refresh_checksum();
                let outcome = client.reconcile(&state);
                assert_ne!(outcome, ReconcileOutcome::Desync, "buffered state not found");
                Some(state.sequence_number)
            },
            ClientOp::Reconcile { sequence, x, z } => {
                let state = GameState::new(
                    f64::from(*sequence) / 60.0,
                    Vector3::new(*x, 0.0, *z),
                    Vector3::ZERO,
                    100.0,
                    SequenceNumber::new(u32::from(*sequence)),
                );
                let _ = client.reconcile(&state);
                Some(state.sequence_number)
            },
        };

        if let Some(acknowledged) = acknowledged {
            reconciled += 1;
            assert!(client
                .pending_inputs()
                .all(|pending| pending.sequence_number > acknowledged));
        }
        assert!(client.buffered_states().count() <= usize::from(input.capacity.max(1)));
    }

    let report = client.report();
    assert_eq!(report.total_inputs, u64::from(next_sequence - 1));
    let metrics = client.metrics();
    assert_eq!(
        metrics.prediction_hits + metrics.prediction_misses + metrics.desync_events,
        reconciled
    );
});
