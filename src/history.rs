//! Time-indexed position history used to rewind entities.
//!
//! Each entity owns one [`PositionHistory`]: a deque of [`PositionSnapshot`]s
//! with non-decreasing timestamps, trimmed to a retention window measured back
//! from the newest snapshot. [`HistoryStore`] holds at most one history per
//! entity id.
//!
//! # Lookup semantics
//!
//! | Requested time `t` | Result |
//! |---|---|
//! | before the earliest snapshot | `None` (cannot rewind that far) |
//! | equal to a recorded timestamp | that snapshot's exact position |
//! | between two snapshots | position linearly interpolated; velocity and health from the earlier one |
//! | after the newest, by at most [`MAX_EXTRAPOLATION`] | newest position advanced by its velocity |
//! | after the newest, by more | `None` |
//!
//! ```
//! use rewindkit::history::{PositionHistory, PositionSnapshot};
//! use rewindkit::{EntityId, Vector3};
//!
//! let id = EntityId::new(1);
//! let mut history = PositionHistory::new(id, 1.0);
//! let v = Vector3::new(10.0, 0.0, 0.0);
//! history.record(PositionSnapshot::new(0.0, id, Vector3::ZERO, v, 100.0)).unwrap();
//! history.record(PositionSnapshot::new(1.0, id, Vector3::new(10.0, 0.0, 0.0), v, 100.0)).unwrap();
//!
//! let mid = history.lookup(0.25).unwrap();
//! assert!((mid.position.x - 2.5).abs() < 1e-9);
//! ```

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{EntityId, RewindError, Vector3};

/// Furthest, in seconds, a lookup may extrapolate past the newest snapshot.
pub const MAX_EXTRAPOLATION: f64 = 0.1;

/// An entity's authoritative state observed at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Server time of the observation, in seconds.
    pub timestamp: f64,
    /// The observed entity.
    pub entity_id: EntityId,
    /// Position at `timestamp`.
    pub position: Vector3,
    /// Velocity at `timestamp`.
    pub velocity: Vector3,
    /// Health at `timestamp`; `<= 0` means dead.
    pub health: f64,
}

impl PositionSnapshot {
    /// Creates a snapshot.
    #[must_use]
    pub const fn new(
        timestamp: f64,
        entity_id: EntityId,
        position: Vector3,
        velocity: Vector3,
        health: f64,
    ) -> Self {
        Self {
            timestamp,
            entity_id,
            position,
            velocity,
            health,
        }
    }

    /// Returns `true` if the entity was alive in this snapshot.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

/// The retained snapshots of one entity.
#[derive(Debug, Clone)]
pub struct PositionHistory {
    entity_id: EntityId,
    retention_window: f64,
    snapshots: VecDeque<PositionSnapshot>,
}

impl PositionHistory {
    /// Creates an empty history retaining `retention_window` seconds.
    #[must_use]
    pub fn new(entity_id: EntityId, retention_window: f64) -> Self {
        Self {
            entity_id,
            retention_window,
            snapshots: VecDeque::new(),
        }
    }

    /// The entity this history belongs to.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Retention window in seconds.
    #[must_use]
    pub fn retention_window(&self) -> f64 {
        self.retention_window
    }

    /// Number of retained snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Returns `true` if nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// The oldest retained snapshot.
    #[must_use]
    pub fn earliest(&self) -> Option<&PositionSnapshot> {
        self.snapshots.front()
    }

    /// The newest retained snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<&PositionSnapshot> {
        self.snapshots.back()
    }

    /// Iterates over retained snapshots, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PositionSnapshot> {
        self.snapshots.iter()
    }

    /// Drops every snapshot.
    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    /// Appends a snapshot and evicts everything older than
    /// `snapshot.timestamp - retention_window`.
    ///
    /// Equal timestamps are accepted; the later snapshot shadows the earlier
    /// one for exact-time lookups.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::OutOfOrderSnapshot`] if `snapshot.timestamp` is
    /// NaN or older than the newest retained snapshot. The history is left
    /// unchanged.
    pub fn record(&mut self, snapshot: PositionSnapshot) -> Result<(), RewindError> {
        // NaN orders before everything, even in an empty history.
        let newest = self
            .snapshots
            .back()
            .map_or(f64::NEG_INFINITY, |newest| newest.timestamp);
        if snapshot.timestamp.is_nan() || snapshot.timestamp < newest {
            return Err(RewindError::OutOfOrderSnapshot {
                entity: self.entity_id,
                newest,
                attempted: snapshot.timestamp,
            });
        }

        let cutoff = snapshot.timestamp - self.retention_window;
        self.snapshots.push_back(snapshot);
        while self
            .snapshots
            .front()
            .is_some_and(|oldest| oldest.timestamp < cutoff)
        {
            self.snapshots.pop_front();
        }
        Ok(())
    }

    /// Reconstructs the entity's state at `timestamp`. See the module docs for
    /// the interpolation and extrapolation rules.
    #[must_use]
    pub fn lookup(&self, timestamp: f64) -> Option<PositionSnapshot> {
        // Index of the first snapshot strictly newer than `timestamp`.
        let after_idx = self
            .snapshots
            .partition_point(|snapshot| snapshot.timestamp <= timestamp);
        // Nothing at or before `timestamp`: too far in the past (or empty).
        let before = self.snapshots.get(after_idx.checked_sub(1)?)?;

        match self.snapshots.get(after_idx) {
            Some(after) => {
                let span = after.timestamp - before.timestamp;
                let t = if span > 0.0 {
                    ((timestamp - before.timestamp) / span).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                Some(PositionSnapshot {
                    timestamp,
                    position: before.position.lerp(after.position, t),
                    ..*before
                })
            },
            None => {
                let dt = timestamp - before.timestamp;
                if dt <= 0.0 {
                    return Some(*before);
                }
                if dt > MAX_EXTRAPOLATION {
                    return None;
                }
                Some(PositionSnapshot {
                    timestamp,
                    position: before.position + before.velocity * dt,
                    ..*before
                })
            },
        }
    }
}

impl InvariantChecker for PositionHistory {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut previous: Option<f64> = None;
        for (index, snapshot) in self.snapshots.iter().enumerate() {
            if snapshot.entity_id != self.entity_id {
                return Err(InvariantViolation::new(
                    "PositionHistory",
                    "snapshot belongs to a different entity",
                )
                .with_details(format!(
                    "index {index}: expected {}, found {}",
                    self.entity_id, snapshot.entity_id
                )));
            }
            if let Some(prev) = previous {
                if snapshot.timestamp < prev {
                    return Err(InvariantViolation::new(
                        "PositionHistory",
                        "timestamps are not sorted",
                    )
                    .with_details(format!(
                        "index {index}: {} follows {prev}",
                        snapshot.timestamp
                    )));
                }
            }
            previous = Some(snapshot.timestamp);
        }

        if let (Some(earliest), Some(latest)) = (self.earliest(), self.latest()) {
            if latest.timestamp - earliest.timestamp > self.retention_window {
                return Err(InvariantViolation::new(
                    "PositionHistory",
                    "retained span exceeds the retention window",
                )
                .with_details(format!(
                    "span {} > window {}",
                    latest.timestamp - earliest.timestamp,
                    self.retention_window
                )));
            }
        }
        Ok(())
    }
}

/// All entity histories, keyed by entity id.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    retention_window: f64,
    histories: BTreeMap<EntityId, PositionHistory>,
}

impl HistoryStore {
    /// Creates an empty store whose histories retain `retention_window` seconds.
    #[must_use]
    pub fn new(retention_window: f64) -> Self {
        Self {
            retention_window,
            histories: BTreeMap::new(),
        }
    }

    /// Records a snapshot in its entity's history, creating the history on
    /// first use.
    ///
    /// # Errors
    ///
    /// See [`PositionHistory::record`].
    pub fn record(&mut self, snapshot: PositionSnapshot) -> Result<(), RewindError> {
        let retention_window = self.retention_window;
        self.histories
            .entry(snapshot.entity_id)
            .or_insert_with(|| PositionHistory::new(snapshot.entity_id, retention_window))
            .record(snapshot)
    }

    /// Looks up `entity_id` at `timestamp`. `None` if the entity has no
    /// history or the time is out of range.
    #[must_use]
    pub fn lookup(&self, entity_id: EntityId, timestamp: f64) -> Option<PositionSnapshot> {
        self.histories.get(&entity_id)?.lookup(timestamp)
    }

    /// The history of one entity.
    #[must_use]
    pub fn get(&self, entity_id: EntityId) -> Option<&PositionHistory> {
        self.histories.get(&entity_id)
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    /// Returns `true` if no entity is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Forgets every entity.
    pub fn clear(&mut self) {
        self.histories.clear();
    }
}

impl InvariantChecker for HistoryStore {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (id, history) in &self.histories {
            if history.entity_id() != *id {
                return Err(InvariantViolation::new(
                    "HistoryStore",
                    "history stored under the wrong entity id",
                )
                .with_details(format!("key {id}, history {}", history.entity_id())));
            }
            history.check_invariants()?;
        }
        Ok(())
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

    const ID: EntityId = EntityId::new(1);

    fn snap(timestamp: f64, x: f64, vx: f64) -> PositionSnapshot {
        PositionSnapshot::new(
            timestamp,
            ID,
            Vector3::new(x, 0.0, 0.0),
            Vector3::new(vx, 0.0, 0.0),
            100.0,
        )
    }

    fn linear_history() -> PositionHistory {
        let mut history = PositionHistory::new(ID, 1.0);
        for i in 0..=10 {
            let t = f64::from(i) * 0.1;
            history.record(snap(t, t * 5.0, 5.0)).unwrap();
        }
        history
    }

    #[test]
    fn empty_history_returns_none() {
        let history = PositionHistory::new(ID, 1.0);
        assert!(history.lookup(0.0).is_none());
        assert!(history.is_empty());
    }

    #[test]
    fn exact_timestamp_returns_recorded_position() {
        let history = linear_history();
        for recorded in history.iter() {
            let found = history.lookup(recorded.timestamp).unwrap();
            assert_eq!(found.position, recorded.position);
        }
    }

    #[test]
    fn interpolates_between_snapshots() {
        let history = linear_history();
        let found = history.lookup(0.45).unwrap();
        assert!((found.position.x - 2.25).abs() < 1e-9);
        assert_eq!(found.timestamp, 0.45);
    }

    #[test]
    fn interpolation_takes_velocity_and_health_from_earlier_snapshot() {
        let mut history = PositionHistory::new(ID, 1.0);
        history
            .record(PositionSnapshot::new(
                0.0,
                ID,
                Vector3::ZERO,
                Vector3::new(1.0, 0.0, 0.0),
                100.0,
            ))
            .unwrap();
        history
            .record(PositionSnapshot::new(
                1.0,
                ID,
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(9.0, 0.0, 0.0),
                0.0,
            ))
            .unwrap();
        let found = history.lookup(0.5).unwrap();
        assert_eq!(found.velocity, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(found.health, 100.0);
    }

    #[test]
    fn older_than_earliest_returns_none() {
        let history = linear_history();
        assert!(history.lookup(-0.01).is_none());
    }

    #[test]
    fn extrapolates_within_limit() {
        let history = linear_history();
        let found = history.lookup(1.05).unwrap();
        assert!((found.position.x - 5.25).abs() < 1e-9);
    }

    #[test]
    fn extrapolation_beyond_limit_returns_none() {
        let history = linear_history();
        assert!(history.lookup(1.0 + MAX_EXTRAPOLATION + 1e-6).is_none());
    }

    #[test]
    fn evicts_outside_retention_window() {
        let mut history = PositionHistory::new(ID, 0.5);
        for i in 0..=20 {
            history.record(snap(f64::from(i) * 0.1, 0.0, 0.0)).unwrap();
        }
        let earliest = history.earliest().unwrap().timestamp;
        let latest = history.latest().unwrap().timestamp;
        assert!(latest - earliest <= 0.5 + 1e-9);
        assert!(history.lookup(latest - 0.9).is_none());
        history.check_invariants().unwrap();
    }

    #[test]
    fn out_of_order_snapshot_is_rejected_and_history_unchanged() {
        let mut history = linear_history();
        let before = history.len();
        let err = history.record(snap(0.5, 0.0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            RewindError::OutOfOrderSnapshot { entity, .. } if entity == ID
        ));
        assert_eq!(history.len(), before);
        assert_eq!(history.latest().unwrap().timestamp, 1.0);
    }

    #[test]
    fn nan_timestamp_is_always_rejected() {
        let mut history = linear_history();
        assert!(history.record(snap(f64::NAN, 0.0, 0.0)).is_err());

        let mut empty = PositionHistory::new(ID, 1.0);
        assert!(empty.record(snap(f64::NAN, 0.0, 0.0)).is_err());
        assert!(empty.is_empty());
    }

    #[test]
    fn equal_timestamps_are_accepted() {
        let mut history = PositionHistory::new(ID, 1.0);
        history.record(snap(1.0, 0.0, 0.0)).unwrap();
        history.record(snap(1.0, 3.0, 0.0)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.lookup(1.0).unwrap().position.x, 3.0);
    }

    #[test]
    fn store_keeps_one_history_per_entity() {
        let mut store = HistoryStore::new(1.0);
        let other = EntityId::new(2);
        store.record(snap(0.0, 1.0, 0.0)).unwrap();
        store.record(snap(0.1, 2.0, 0.0)).unwrap();
        store
            .record(PositionSnapshot::new(0.0, other, Vector3::ZERO, Vector3::ZERO, 50.0))
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(ID).unwrap().len(), 2);
        assert!(store.lookup(EntityId::new(99), 0.0).is_none());
        assert_eq!(store.lookup(other, 0.0).unwrap().health, 50.0);
        store.check_invariants().unwrap();
    }
}
