//! Fuzz target for `PositionHistory`.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary record/lookup sequences
//! - Invariants hold after every accepted or rejected record
//! - A rejected record leaves the history unchanged

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rewindkit::history::{PositionHistory, PositionSnapshot};
use rewindkit::telemetry::InvariantChecker;
use rewindkit::{EntityId, Vector3};

#[derive(Debug, Arbitrary)]
enum HistoryOp {
    /// Record at `timestamp`, given in milliseconds to keep values sane.
    Record { timestamp_ms: i32, x: i16, health: i8 },
    /// Record at a raw, possibly non-finite, timestamp.
    RecordRaw { timestamp: f64 },
    Lookup { timestamp_ms: i32 },
    LookupRaw { timestamp: f64 },
    Clear,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    retention_ms: u16,
    operations: Vec<HistoryOp>,
}

fuzz_target!(|input: FuzzInput| {
    let retention = f64::from(input.retention_ms.max(1)) / 1000.0;
    let id = EntityId::new(1);
    let mut history = PositionHistory::new(id, retention);

    for op in input.operations.iter().take(1000) {
        match op {
            HistoryOp::Record { timestamp_ms, x, health } => {
                let t = f64::from(*timestamp_ms) / 1000.0;
                let snapshot = PositionSnapshot::new(
                    t,
                    id,
                    Vector3::new(f64::from(*x), 0.0, 0.0),
                    Vector3::new(1.0, 0.0, 0.0),
                    f64::from(*health),
                );
                record(&mut history, snapshot);
            },
            HistoryOp::RecordRaw { timestamp } => {
                let snapshot = PositionSnapshot::new(*timestamp, id, Vector3::ZERO, Vector3::ZERO, 1.0);
                record(&mut history, snapshot);
            },
            HistoryOp::Lookup { timestamp_ms } => {
                lookup(&history, f64::from(*timestamp_ms) / 1000.0);
            },
            HistoryOp::LookupRaw { timestamp } => lookup(&history, *timestamp),
            HistoryOp::Clear => history.clear(),
        }
    }
});

fn record(history: &mut PositionHistory, snapshot: PositionSnapshot) {
    let before = history.len();
    if history.record(snapshot).is_err() {
        assert_eq!(history.len(), before, "rejected record changed the history");
    }
    // Invariants only hold for finite timestamps.
    if history.iter().all(|s| s.timestamp.is_finite()) {
        history.check_invariants().expect("history invariants");
    }
}

fn lookup(history: &PositionHistory, timestamp: f64) {
    if let Some(found) = history.lookup(timestamp) {
        assert!(!history.is_empty());
        assert_eq!(found.entity_id, history.entity_id());
        if let (Some(earliest), Some(latest)) = (history.earliest(), history.latest()) {
            if timestamp.is_finite() && earliest.timestamp.is_finite() && latest.timestamp.is_finite() {
                assert!(timestamp >= earliest.timestamp);
            }
        }
    }
}
