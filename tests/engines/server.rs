//! Server simulation tests.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use std::sync::Arc;

use crate::common::{forward_inputs, input};
use rewindkit::config::ServerConfig;
use rewindkit::movement::MovementModel;
use rewindkit::telemetry::{CollectingObserver, EventKind};
use rewindkit::{EntityId, GameState, RewindError, SequenceNumber, ServerSimulation, Vector3};

#[test]
fn duplicate_inputs_are_ignored() {
    let observer = Arc::new(CollectingObserver::new());
    let mut server = ServerSimulation::with_observer(
        ServerConfig::default(),
        MovementModel::default(),
        observer.clone(),
    )
    .unwrap()
    .for_client(EntityId::new(4));

    let inputs = forward_inputs(3);
    let first = server.process_input(&inputs[0]);
    let second = server.process_input(&inputs[1]);
    let replayed = server.process_input(&inputs[0]);

    assert_eq!(replayed, second);
    assert_ne!(first, second);
    assert!(server.has_processed(SequenceNumber::new(1)));
    assert!(!server.has_processed(SequenceNumber::new(3)));

    let stats = server.stats();
    assert_eq!(stats.processed_inputs, 2);
    assert_eq!(stats.duplicate_inputs, 1);

    let events = observer.events_of_kind(EventKind::DuplicateInput);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity, Some(EntityId::new(4)));
}

#[test]
fn positions_are_clamped_into_the_world() {
    let config = ServerConfig {
        world_half_extent: 10.0,
        ..ServerConfig::default()
    };
    let mut server = ServerSimulation::new(config, MovementModel::default())
        .unwrap()
        .with_initial_state(GameState::initial(0.0, Vector3::new(9.999, 0.0, -9.999)));

    let state = server.process_input(&input(1, Vector3::new(1.0, 0.0, -1.0)));
    assert_eq!(state.position.x, 10.0);
    assert_eq!(state.position.z, -10.0);
    assert!(state.checksum_matches());
    assert_eq!(server.stats().position_clamps, 1);
}

#[test]
fn speed_is_capped_without_changing_direction() {
    let config = ServerConfig {
        max_speed: 0.05,
        ..ServerConfig::default()
    };
    let mut server = ServerSimulation::new(config, MovementModel::default()).unwrap();
    let state = server.process_input(&input(1, Vector3::new(0.0, 0.0, 1.0)));
    assert!((state.velocity.length() - 0.05).abs() < 1e-12);
    assert_eq!(state.velocity.x, 0.0);
    assert!(state.velocity.z > 0.0);
    assert_eq!(server.stats().speed_clamps, 1);
}

#[test]
fn height_is_kept_above_ground() {
    let mut server = ServerSimulation::new(ServerConfig::default(), MovementModel::default()).unwrap();
    let state = server.process_input(&input(1, Vector3::new(0.0, -1.0, 0.0)));
    assert_eq!(state.position.y, 0.0);
    assert_eq!(server.current_state().position.y, 0.0);
}

#[test]
fn bounds_that_cannot_clamp_are_rejected_up_front() {
    let cases = [
        ServerConfig {
            world_half_extent: -5.0,
            ..ServerConfig::default()
        },
        ServerConfig {
            world_half_extent: f64::NAN,
            ..ServerConfig::default()
        },
        ServerConfig {
            max_height: -1.0,
            ..ServerConfig::default()
        },
    ];
    for config in cases {
        assert!(
            matches!(
                ServerSimulation::new(config, MovementModel::default()),
                Err(RewindError::InvalidConfig { .. })
            ),
            "{config:?} should be rejected"
        );
    }
}
