//! `InvariantChecker` implementations of the position history.
//!
//! # Invariants Tested
//!
//! - Every snapshot in a history belongs to that history's entity
//! - Timestamps never decrease
//! - The retained span never exceeds the retention window
//! - A rejected snapshot leaves the history untouched

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use rewindkit::history::{HistoryStore, PositionHistory, PositionSnapshot};
use rewindkit::telemetry::InvariantChecker;
use rewindkit::{EntityId, RewindError, Vector3};

fn snapshot(id: u32, timestamp: f64) -> PositionSnapshot {
    PositionSnapshot::new(
        timestamp,
        EntityId::new(id),
        Vector3::new(timestamp, 0.0, 0.0),
        Vector3::new(1.0, 0.0, 0.0),
        100.0,
    )
}

#[test]
fn empty_history_is_valid() {
    let history = PositionHistory::new(EntityId::new(1), 1.0);
    assert!(history.check_invariants().is_ok());
    assert!(HistoryStore::new(1.0).check_invariants().is_ok());
}

#[test]
fn eviction_keeps_the_span_within_the_window() {
    let mut history = PositionHistory::new(EntityId::new(1), 0.5);
    // Power-of-two tick spacing keeps the window edge exact.
    for tick in 0..=320 {
        history.record(snapshot(1, f64::from(tick) / 64.0)).unwrap();
        history.check_invariants().unwrap();
    }
    let span = history.latest().unwrap().timestamp - history.earliest().unwrap().timestamp;
    assert!(span <= 0.5);
    assert_eq!(history.len(), 33);
}

#[test]
fn rejected_snapshots_leave_history_untouched() {
    let mut history = PositionHistory::new(EntityId::new(1), 1.0);
    history.record(snapshot(1, 0.5)).unwrap();
    history.record(snapshot(1, 0.6)).unwrap();
    let before: Vec<PositionSnapshot> = history.iter().copied().collect();

    let err = history.record(snapshot(1, 0.55)).unwrap_err();
    assert!(matches!(err, RewindError::OutOfOrderSnapshot { .. }));
    assert!(history.record(snapshot(1, f64::NAN)).is_err());

    let after: Vec<PositionSnapshot> = history.iter().copied().collect();
    assert_eq!(before, after);
    history.check_invariants().unwrap();
}

#[test]
fn equal_timestamps_keep_order() {
    let mut history = PositionHistory::new(EntityId::new(1), 1.0);
    history.record(snapshot(1, 0.5)).unwrap();
    history.record(snapshot(1, 0.5)).unwrap();
    assert_eq!(history.len(), 2);
    history.check_invariants().unwrap();
}

#[test]
fn store_keeps_entities_separate() {
    let mut store = HistoryStore::new(1.0);
    for tick in 0..120 {
        let t = f64::from(tick) / 60.0;
        for id in 1..=5 {
            store.record(snapshot(id, t)).unwrap();
        }
        store.check_invariants().unwrap();
    }
    assert_eq!(store.len(), 5);
    for id in 1..=5 {
        let history = store.get(EntityId::new(id)).unwrap();
        assert!(history.iter().all(|s| s.entity_id == EntityId::new(id)));
    }
}

#[test]
fn out_of_order_in_one_entity_does_not_affect_others() {
    let mut store = HistoryStore::new(1.0);
    store.record(snapshot(1, 1.0)).unwrap();
    store.record(snapshot(2, 0.2)).unwrap();
    assert!(store.record(snapshot(1, 0.9)).is_err());
    store.record(snapshot(2, 0.3)).unwrap();
    assert_eq!(store.get(EntityId::new(2)).unwrap().len(), 2);
    store.check_invariants().unwrap();
}
