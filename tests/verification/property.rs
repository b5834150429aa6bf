//! Property-based tests for rewind lookups, the compensation window and
//! reconciliation.
//!
//! # Properties Tested
//!
//! ## Position history
//! - Looking up a recorded timestamp returns the recorded position
//! - Interpolated positions lie between their neighbours
//! - Lookups before the oldest snapshot or too far past the newest fail
//!
//! ## Rewind engine
//! - Compensation beyond the ceiling, or negative, is always rejected
//! - Compensation inside the window is never rejected
//! - Outcome counters always add up to the shot count
//!
//! ## Prediction
//! - A rollback replays exactly the inputs newer than the acknowledged one
//! - Reconciliation never leaves an acknowledged input pending

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use rewindkit::config::{LagCompensationConfig, PredictionConfig};
use rewindkit::history::{PositionHistory, PositionSnapshot, MAX_EXTRAPOLATION};
use rewindkit::{
    ClientPrediction, Entity, EntityId, GameState, HitResult, LagCompensationEngine, PlayerInput,
    ReconcileOutcome, SequenceNumber, Shot, Vector3,
};

// ============================================================================
// Strategies
// ============================================================================

fn vector_strategy(range: f64) -> impl Strategy<Value = Vector3> {
    (-range..range, -range..range, -range..range).prop_map(|(x, y, z)| Vector3::new(x, y, z))
}

/// Strictly increasing timestamps paired with positions.
fn track_strategy() -> impl Strategy<Value = Vec<(f64, Vector3)>> {
    prop::collection::vec((0.001f64..0.1, vector_strategy(100.0)), 1..40).prop_map(|steps| {
        let mut t = 0.0;
        steps
            .into_iter()
            .map(|(dt, position)| {
                t += dt;
                (t, position)
            })
            .collect()
    })
}

fn movement_strategy() -> impl Strategy<Value = Vec<Vector3>> {
    prop::collection::vec(vector_strategy(1.0), 2..40)
}

fn history_of(track: &[(f64, Vector3)]) -> PositionHistory {
    let id = EntityId::new(1);
    let mut history = PositionHistory::new(id, 1.0e6);
    for (t, position) in track {
        history
            .record(PositionSnapshot::new(*t, id, *position, Vector3::new(1.0, -2.0, 0.5), 100.0))
            .unwrap();
    }
    history
}

/// One entity recorded at 60 Hz for a second; returns the engine and world.
fn recorded_engine() -> (LagCompensationEngine, BTreeMap<EntityId, Entity>) {
    let engine = LagCompensationEngine::new(LagCompensationConfig::default());
    let target = Entity::new(EntityId::new(2), Vector3::new(0.0, 0.0, 5.0));
    for tick in 0..=60 {
        engine.update_entity_position(&target, f64::from(tick) / 60.0).unwrap();
    }
    let world = [(target.id, target)].into_iter().collect();
    (engine, world)
}

fn inputs_from(movements: &[Vector3]) -> Vec<PlayerInput> {
    movements
        .iter()
        .zip(1u32..)
        .map(|(movement, seq)| {
            PlayerInput::new(SequenceNumber::new(seq), f64::from(seq) / 60.0, *movement)
        })
        .collect()
}

// ============================================================================
// Position History
// ============================================================================

proptest! {
    #[test]
    fn prop_exact_lookup_returns_recorded_position(
        track in track_strategy(),
        pick in any::<prop::sample::Index>(),
    ) {
        let history = history_of(&track);
        let (t, position) = track[pick.index(track.len())];
        let found = history.lookup(t).unwrap();
        prop_assert_eq!(found.position, position);
        prop_assert_eq!(found.timestamp, t);
    }

    #[test]
    fn prop_interpolation_stays_between_neighbours(
        track in track_strategy(),
        pick in any::<prop::sample::Index>(),
        fraction in 0.0f64..1.0,
    ) {
        prop_assume!(track.len() >= 2);
        let i = pick.index(track.len() - 1);
        let (t0, p0) = track[i];
        let (t1, p1) = track[i + 1];
        let t = t0 + (t1 - t0) * fraction;

        let found = history_of(&track).lookup(t).unwrap();
        let eps = 1e-9;
        for (got, a, b) in [
            (found.position.x, p0.x, p1.x),
            (found.position.y, p0.y, p1.y),
            (found.position.z, p0.z, p1.z),
        ] {
            prop_assert!(got >= a.min(b) - eps && got <= a.max(b) + eps);
        }
    }

    #[test]
    fn prop_lookup_outside_range_fails(
        track in track_strategy(),
        extra in 0.001f64..10.0,
    ) {
        let history = history_of(&track);
        let earliest = track[0].0;
        let latest = track[track.len() - 1].0;
        prop_assert!(history.lookup(earliest - extra).is_none());
        prop_assert!(history.lookup(latest + MAX_EXTRAPOLATION + extra).is_none());
    }

    #[test]
    fn prop_extrapolation_follows_velocity(
        track in track_strategy(),
        dt in 0.0f64..(MAX_EXTRAPOLATION * 0.9),
    ) {
        let history = history_of(&track);
        let (latest, position) = track[track.len() - 1];
        let found = history.lookup(latest + dt).unwrap();
        let expected = position + Vector3::new(1.0, -2.0, 0.5) * dt;
        prop_assert!(found.position.distance(expected) < 1e-9);
    }
}

// ============================================================================
// Compensation Window
// ============================================================================

proptest! {
    #[test]
    fn prop_rewind_beyond_ceiling_is_rejected(extra in 0.001f64..5.0) {
        let (engine, world) = recorded_engine();
        let max = engine.config().max_compensation_time;
        let shot = Shot::new(1, EntityId::new(1), engine.server_time(), Vector3::ZERO, Vector3::new(0.0, 0.0, 1.0))
            .with_latency(max + extra);
        let outcome = engine.process_shot(&shot, &world);
        prop_assert_eq!(outcome.result, HitResult::Rejected);
        prop_assert!(outcome.compensation_time > max);
    }

    #[test]
    fn prop_shots_from_the_future_are_rejected(ahead in 0.001f64..5.0) {
        let (engine, world) = recorded_engine();
        let shot = Shot::new(1, EntityId::new(1), engine.server_time() + ahead, Vector3::ZERO, Vector3::new(0.0, 0.0, 1.0));
        let outcome = engine.process_shot(&shot, &world);
        prop_assert_eq!(outcome.result, HitResult::Rejected);
        prop_assert!(outcome.compensation_time < 0.0);
    }

    #[test]
    fn prop_window_is_never_rejected(fraction in 0.0f64..0.99, direction in vector_strategy(1.0)) {
        let (engine, world) = recorded_engine();
        let latency = engine.config().max_compensation_time * fraction;
        let shot = Shot::new(1, EntityId::new(1), engine.server_time(), Vector3::ZERO, direction)
            .with_latency(latency);
        let outcome = engine.process_shot(&shot, &world);
        prop_assert_ne!(outcome.result, HitResult::Rejected);
    }

    #[test]
    fn prop_outcome_counters_add_up(
        shots in prop::collection::vec(
            (vector_strategy(10.0), vector_strategy(1.0), 0.0f64..0.5, -0.05f64..0.05),
            1..30,
        ),
    ) {
        let (engine, world) = recorded_engine();
        let now = engine.server_time();
        for (id, (origin, direction, latency, skew)) in (0u64..).zip(shots.iter()) {
            let shot = Shot::new(id, EntityId::new(1), now + skew, *origin, *direction)
                .with_latency(*latency);
            let _ = engine.process_shot(&shot, &world);
        }
        let metrics = engine.metrics();
        prop_assert_eq!(metrics.total_shots, shots.len() as u64);
        prop_assert_eq!(
            metrics.hits + metrics.misses + metrics.rejected + metrics.invalid,
            metrics.total_shots
        );
        let report = engine.report();
        for rate in [report.hit_rate, report.rejection_rate, report.false_positive_rate, report.false_negative_rate] {
            prop_assert!((0.0..=1.0).contains(&rate));
        }
        prop_assert_eq!(report.hit_rate, metrics.hits as f64 / metrics.total_shots as f64);
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_rollback_replays_newer_inputs(
        movements in movement_strategy(),
        pick in any::<prop::sample::Index>(),
        offset in 0.2f64..5.0,
    ) {
        let inputs = inputs_from(&movements);
        let mut client = ClientPrediction::new(PredictionConfig::default());
        let model = client.movement_model();

        let mut chain = Vec::with_capacity(inputs.len());
        let mut state = GameState::initial(0.0, Vector3::ZERO);
        for input in &inputs {
            state = model.apply(&state, input);
            chain.push(state);
            prop_assert_eq!(client.predict(input.clone()), state);
        }

        let k = pick.index(inputs.len());
        let mut corrected = chain[k];
        corrected.position = corrected.position + Vector3::new(offset, 0.0, 0.0);
        corrected.refresh_checksum();

        let outcome = client.reconcile(&corrected);
        let newer = inputs.len() - k - 1;
        prop_assert!(
            matches!(outcome, ReconcileOutcome::Rolledback { replayed, .. } if replayed == newer),
            "unexpected outcome {:?}",
            outcome
        );

        let mut expected = corrected;
        for input in &inputs[k + 1..] {
            expected = model.apply(&expected, input);
        }
        prop_assert_eq!(*client.current_state(), expected);
        prop_assert_eq!(client.pending_len(), newer);
    }

    #[test]
    fn prop_acknowledged_inputs_are_pruned(
        movements in movement_strategy(),
        acknowledged in 0u32..50,
        offset in 0.0f64..1.0,
    ) {
        let inputs = inputs_from(&movements);
        let mut client = ClientPrediction::new(PredictionConfig::default());
        for input in &inputs {
            let _ = client.predict(input.clone());
        }
        let server_state = GameState::new(
            f64::from(acknowledged) / 60.0,
            Vector3::new(offset, 0.0, 0.0),
            Vector3::ZERO,
            100.0,
            SequenceNumber::new(acknowledged),
        );
        let _ = client.reconcile(&server_state);
        prop_assert!(client
            .pending_inputs()
            .all(|input| input.sequence_number > SequenceNumber::new(acknowledged)));
    }
}
