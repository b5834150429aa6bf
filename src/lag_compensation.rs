//! Server-side lag compensation.
//!
//! A shooter sees the world `latency` seconds late. When the server finally
//! receives the shot it rewinds every other entity to the instant the shooter
//! perceived, performs the hit test against those rewound positions, and only
//! then validates the result.
//!
//! ```
//! use std::collections::BTreeMap;
//!
//! use rewindkit::config::LagCompensationConfig;
//! use rewindkit::{Entity, EntityId, HitResult, LagCompensationEngine, Shot, Vector3};
//!
//! let engine = LagCompensationEngine::new(LagCompensationConfig::default());
//! let shooter = Entity::new(EntityId::new(1), Vector3::ZERO);
//! let mut target = Entity::new(EntityId::new(2), Vector3::new(10.0, 0.0, 0.0));
//!
//! engine.update_entity_position(&target, 0.0).unwrap();
//! target.position.z = 3.0;
//! engine.update_entity_position(&target, 0.1).unwrap();
//!
//! // Fired at t=0.1 by a shooter 100 ms behind, aimed where it saw the target.
//! let shot = Shot::new(1, shooter.id, 0.1, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0))
//!     .with_latency(0.1);
//! let live = BTreeMap::from([(shooter.id, shooter), (target.id, target)]);
//! let outcome = engine.process_shot(&shot, &live);
//! assert_eq!(outcome.result, HitResult::Hit);
//! assert_eq!(outcome.target, Some(EntityId::new(2)));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::config::LagCompensationConfig;
use crate::history::{HistoryStore, PositionSnapshot};
use crate::net_event;
use crate::report::{max_of, mean, percentile};
use crate::telemetry::{default_observer, EventKind, EventObserver, EventSeverity};
use crate::{debug_check_invariants, EntityId, RewindError, Vector3};

/// Hitbox radius of a freshly created [`Entity`].
pub const DEFAULT_HITBOX_RADIUS: f64 = 0.5;

/// Health of a freshly created [`Entity`].
pub const DEFAULT_ENTITY_HEALTH: f64 = 100.0;

/// A live, server-authoritative entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identity.
    pub id: EntityId,
    /// Current position.
    pub position: Vector3,
    /// Current velocity.
    pub velocity: Vector3,
    /// Radius of the spherical hitbox centered on `position`.
    pub hitbox_radius: f64,
    /// `<= 0` means dead.
    pub health: f64,
}

impl Entity {
    /// Creates a stationary entity with default hitbox and health.
    #[must_use]
    pub const fn new(id: EntityId, position: Vector3) -> Self {
        Self {
            id,
            position,
            velocity: Vector3::ZERO,
            hitbox_radius: DEFAULT_HITBOX_RADIUS,
            health: DEFAULT_ENTITY_HEALTH,
        }
    }

    /// Sets the velocity.
    #[must_use]
    pub const fn with_velocity(mut self, velocity: Vector3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Sets the hitbox radius.
    #[must_use]
    pub const fn with_hitbox_radius(mut self, radius: f64) -> Self {
        self.hitbox_radius = radius;
        self
    }

    /// Sets the health.
    #[must_use]
    pub const fn with_health(mut self, health: f64) -> Self {
        self.health = health;
        self
    }

    /// Returns `true` while health is positive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    fn snapshot_at(&self, timestamp: f64) -> PositionSnapshot {
        PositionSnapshot::new(timestamp, self.id, self.position, self.velocity, self.health)
    }
}

/// Weapon metadata carried by a [`Shot`]. Only the damage is used by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeaponKind {
    /// 25 damage.
    #[default]
    Rifle,
    /// 15 damage.
    Pistol,
    /// 80 damage.
    Sniper,
}

impl WeaponKind {
    /// Damage a hit with this weapon deals.
    #[must_use]
    pub const fn damage(self) -> f64 {
        match self {
            Self::Rifle => 25.0,
            Self::Pistol => 15.0,
            Self::Sniper => 80.0,
        }
    }
}

/// A hit-scan attempt as received by the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    /// Monotonic per-scenario id.
    pub shot_id: u64,
    /// Who fired. Never hit by its own shot.
    pub shooter_id: EntityId,
    /// Server time at which the shot was received.
    pub timestamp: f64,
    /// Ray origin.
    pub origin: Vector3,
    /// Ray direction; normalized by the engine before use.
    pub direction: Vector3,
    /// Where the shooter visually aimed.
    pub target_position: Vector3,
    /// The shooter's reported one-way latency, in seconds.
    pub shooter_latency: f64,
    /// Weapon used.
    pub weapon: WeaponKind,
    /// Damage on hit.
    pub damage: f64,
}

impl Shot {
    /// Creates a zero-latency rifle shot aimed one unit along `direction`.
    #[must_use]
    pub fn new(
        shot_id: u64,
        shooter_id: EntityId,
        timestamp: f64,
        origin: Vector3,
        direction: Vector3,
    ) -> Self {
        let weapon = WeaponKind::default();
        Self {
            shot_id,
            shooter_id,
            timestamp,
            origin,
            direction,
            target_position: origin + direction.normalize(),
            shooter_latency: 0.0,
            weapon,
            damage: weapon.damage(),
        }
    }

    /// Sets the reported one-way latency.
    #[must_use]
    pub fn with_latency(mut self, latency: f64) -> Self {
        self.shooter_latency = latency;
        self
    }

    /// Sets where the shooter visually aimed.
    #[must_use]
    pub fn aimed_at(mut self, target_position: Vector3) -> Self {
        self.target_position = target_position;
        self
    }

    /// Sets the weapon and its damage.
    #[must_use]
    pub fn with_weapon(mut self, weapon: WeaponKind) -> Self {
        self.weapon = weapon;
        self.damage = weapon.damage();
        self
    }

    /// The instant, in server time, the shooter perceived the world.
    #[must_use]
    pub fn perceived_time(&self) -> f64 {
        self.timestamp - self.shooter_latency
    }
}

/// Outcome of one shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitResult {
    /// A rewound, alive entity was hit.
    Hit,
    /// Nothing was hit.
    Miss,
    /// The compensation window was invalid; no hit test was performed.
    Rejected,
    /// Something was hit geometrically but failed validation.
    Invalid,
}

impl HitResult {
    /// Lower-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Rejected => "rejected",
            Self::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for HitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What [`LagCompensationEngine::process_shot`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[must_use = "ShotOutcome should be inspected"]
pub struct ShotOutcome {
    /// The verdict.
    pub result: HitResult,
    /// The entity hit; only set for [`HitResult::Hit`].
    pub target: Option<EntityId>,
    /// `server_time - perceived_time` at processing.
    pub compensation_time: f64,
}

/// Raw rewind counters. Only the owning engine mutates them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LagCompensationMetrics {
    /// Shots processed.
    pub total_shots: u64,
    /// [`HitResult::Hit`] outcomes.
    pub hits: u64,
    /// [`HitResult::Miss`] outcomes.
    pub misses: u64,
    /// [`HitResult::Rejected`] outcomes.
    pub rejected: u64,
    /// [`HitResult::Invalid`] outcomes.
    pub invalid: u64,
    /// Geometric hits that failed validation.
    pub false_positives: u64,
    /// Misses where an entity's live position was close to the aim point.
    pub false_negatives: u64,
    /// Compensation time of every shot with a finite one.
    pub compensation_times: Vec<f64>,
    /// Compensation time of every geometric hit.
    pub hit_registration_delays: Vec<f64>,
}

impl LagCompensationMetrics {
    /// Derives rates and distribution statistics without modifying the counters.
    pub fn calculate(&self) -> LagCompensationReport {
        let rate = |count: u64| {
            if self.total_shots == 0 {
                0.0
            } else {
                count as f64 / self.total_shots as f64
            }
        };
        LagCompensationReport {
            total_shots: self.total_shots,
            hits: self.hits,
            misses: self.misses,
            rejected: self.rejected,
            invalid: self.invalid,
            hit_rate: rate(self.hits),
            rejection_rate: rate(self.rejected),
            false_positive_rate: rate(self.false_positives),
            false_negative_rate: rate(self.false_negatives),
            average_compensation_time: mean(&self.compensation_times),
            max_compensation_time: max_of(&self.compensation_times),
            p95_compensation_time: percentile(&self.compensation_times, 95.0),
            p99_compensation_time: percentile(&self.compensation_times, 99.0),
            average_hit_registration_delay: mean(&self.hit_registration_delays),
        }
    }

    /// Adds another engine's counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.total_shots += other.total_shots;
        self.hits += other.hits;
        self.misses += other.misses;
        self.rejected += other.rejected;
        self.invalid += other.invalid;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
        self.compensation_times
            .extend_from_slice(&other.compensation_times);
        self.hit_registration_delays
            .extend_from_slice(&other.hit_registration_delays);
    }
}

/// Derived rewind statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[must_use = "LagCompensationReport should be inspected or used after being calculated"]
pub struct LagCompensationReport {
    /// Shots processed.
    pub total_shots: u64,
    /// Hits.
    pub hits: u64,
    /// Misses.
    pub misses: u64,
    /// Rejected shots.
    pub rejected: u64,
    /// Geometric hits that failed validation.
    pub invalid: u64,
    /// `hits / total_shots`.
    pub hit_rate: f64,
    /// `rejected / total_shots`.
    pub rejection_rate: f64,
    /// `false_positives / total_shots`.
    pub false_positive_rate: f64,
    /// `false_negatives / total_shots`.
    pub false_negative_rate: f64,
    /// Mean compensation time, in seconds.
    pub average_compensation_time: f64,
    /// Largest compensation time, in seconds.
    pub max_compensation_time: f64,
    /// 95th percentile compensation time, in seconds.
    pub p95_compensation_time: f64,
    /// 99th percentile compensation time, in seconds.
    pub p99_compensation_time: f64,
    /// Mean compensation time over geometric hits, in seconds.
    pub average_hit_registration_delay: f64,
}

impl std::fmt::Display for LagCompensationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LagCompensationReport {{ shots: {}, hit_rate: {:.1}%, rejection_rate: {:.1}%, \
             fp: {:.1}%, fn: {:.1}%, avg_comp: {:.1}ms, p95_comp: {:.1}ms, max_comp: {:.1}ms }}",
            self.total_shots,
            self.hit_rate * 100.0,
            self.rejection_rate * 100.0,
            self.false_positive_rate * 100.0,
            self.false_negative_rate * 100.0,
            self.average_compensation_time * 1000.0,
            self.p95_compensation_time * 1000.0,
            self.max_compensation_time * 1000.0
        )
    }
}

/// History and the server clock it advances, updated together.
#[derive(Debug)]
struct Timeline {
    store: HistoryStore,
    server_time: f64,
}

/// A rewound entity the ray passes through.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    id: EntityId,
    projection: f64,
    /// `None` when the entity had to fall back to its live position.
    rewound: Option<PositionSnapshot>,
}

/// Most scenarios have a handful of entities on any one ray.
type Candidates = SmallVec<[Candidate; 8]>;

/// Server-side rewind engine shared by every entity's update path.
///
/// All methods take `&self`. Position updates take the history write lock;
/// shot processing only reads it. Metrics sit behind a separate mutex so
/// readers are never blocked on bookkeeping.
pub struct LagCompensationEngine {
    config: LagCompensationConfig,
    timeline: RwLock<Timeline>,
    metrics: Mutex<LagCompensationMetrics>,
    observer: Arc<dyn EventObserver>,
}

impl LagCompensationEngine {
    /// Creates an engine logging through tracing.
    #[must_use]
    pub fn new(config: LagCompensationConfig) -> Self {
        Self::with_observer(config, default_observer())
    }

    /// Creates an engine reporting events to `observer`.
    #[must_use]
    pub fn with_observer(config: LagCompensationConfig, observer: Arc<dyn EventObserver>) -> Self {
        Self {
            timeline: RwLock::new(Timeline {
                store: HistoryStore::new(config.history_retention),
                server_time: 0.0,
            }),
            config,
            metrics: Mutex::new(LagCompensationMetrics::default()),
            observer,
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &LagCompensationConfig {
        &self.config
    }

    /// The newest timestamp recorded so far.
    #[must_use]
    pub fn server_time(&self) -> f64 {
        self.timeline.read().server_time
    }

    /// Number of entities with a history.
    #[must_use]
    pub fn tracked_entities(&self) -> usize {
        self.timeline.read().store.len()
    }

    /// Where `entity_id` was at `timestamp`, according to the retained history.
    #[must_use]
    pub fn rewind(&self, entity_id: EntityId, timestamp: f64) -> Option<PositionSnapshot> {
        self.timeline.read().store.lookup(entity_id, timestamp)
    }

    /// A copy of the raw counters.
    #[must_use]
    pub fn metrics(&self) -> LagCompensationMetrics {
        self.metrics.lock().clone()
    }

    /// Derived statistics over every shot so far.
    pub fn report(&self) -> LagCompensationReport {
        self.metrics.lock().calculate()
    }

    /// Clears the counters; history is kept.
    pub fn reset_metrics(&self) {
        *self.metrics.lock() = LagCompensationMetrics::default();
    }

    /// Records `entity`'s authoritative state at `timestamp` and advances the
    /// server clock to it.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::OutOfOrderSnapshot`] if `timestamp` is older than
    /// this entity's newest snapshot. Neither the history nor the clock change.
    pub fn update_entity_position(&self, entity: &Entity, timestamp: f64) -> Result<(), RewindError> {
        let mut timeline = self.timeline.write();
        if let Err(err) = timeline.store.record(entity.snapshot_at(timestamp)) {
            self.observer.on_event(
                &net_event!(EventSeverity::Error, EventKind::OutOfOrderSnapshot, "{}", err)
                    .with_entity(entity.id)
                    .with_timestamp(timestamp),
            );
            return Err(err);
        }
        timeline.server_time = timeline.server_time.max(timestamp);
        debug_check_invariants!(self.observer, timeline.store);
        Ok(())
    }

    /// Evaluates `shot` against the world as its shooter perceived it.
    ///
    /// `live` holds the current state of every entity; the shooter is skipped.
    /// Entities without usable history are tested at their live position.
    pub fn process_shot(&self, shot: &Shot, live: &BTreeMap<EntityId, Entity>) -> ShotOutcome {
        let timeline = self.timeline.read();
        let shot_time = shot.perceived_time();
        let compensation_time = timeline.server_time - shot_time;

        let outcome = if compensation_time.is_nan()
            || compensation_time < 0.0
            || compensation_time > self.config.max_compensation_time
        {
            drop(timeline);
            self.reject(shot, compensation_time);
            ShotOutcome {
                result: HitResult::Rejected,
                target: None,
                compensation_time,
            }
        } else {
            let candidates = self.rewound_candidates(&timeline.store, shot, shot_time, live);
            drop(timeline);
            self.resolve(shot, compensation_time, &candidates, live)
        };

        trace!(
            shot = shot.shot_id,
            shooter = shot.shooter_id.as_u32(),
            result = outcome.result.as_str(),
            compensation_ms = compensation_time * 1000.0,
            "processed shot"
        );
        outcome
    }

    fn reject(&self, shot: &Shot, compensation_time: f64) {
        {
            let mut metrics = self.metrics.lock();
            metrics.total_shots += 1;
            metrics.rejected += 1;
            if compensation_time.is_finite() {
                metrics.compensation_times.push(compensation_time);
            }
        }
        let reason = if compensation_time < 0.0 {
            "shot claims to come from the future"
        } else {
            "compensation time exceeds ceiling"
        };
        self.observer.on_event(
            &net_event!(
                EventSeverity::Warning,
                EventKind::InvalidCompensationWindow,
                "{}: {:.3}s (max {:.3}s)",
                reason,
                compensation_time,
                self.config.max_compensation_time
            )
            .with_entity(shot.shooter_id)
            .with_timestamp(shot.timestamp)
            .with_context("shot_id", shot.shot_id),
        );
    }

    /// Rewinds every non-shooter entity and keeps those the ray passes through.
    fn rewound_candidates(
        &self,
        store: &HistoryStore,
        shot: &Shot,
        shot_time: f64,
        live: &BTreeMap<EntityId, Entity>,
    ) -> Candidates {
        let direction = shot.direction.normalize();
        let mut candidates = Candidates::new();

        for (id, entity) in live {
            if *id == shot.shooter_id {
                continue;
            }
            let rewound = store.lookup(*id, shot_time);
            if rewound.is_none() {
                self.report_missing_history(store, *id, shot_time);
            }
            let center = rewound.map_or(entity.position, |snapshot| snapshot.position);

            let to_center = center - shot.origin;
            let projection = to_center.dot(direction);
            if projection <= 0.0 {
                continue;
            }
            let closest = shot.origin + direction * projection;
            if closest.distance(center) <= entity.hitbox_radius {
                candidates.push(Candidate {
                    id: *id,
                    projection,
                    rewound,
                });
            }
        }
        candidates
    }

    fn report_missing_history(&self, store: &HistoryStore, id: EntityId, shot_time: f64) {
        let Some(history) = store.get(id) else {
            trace!(entity = id.as_u32(), "no history, using live position");
            return;
        };
        let (earliest, latest) = match (history.earliest(), history.latest()) {
            (Some(earliest), Some(latest)) => (earliest.timestamp, latest.timestamp),
            _ => return,
        };
        self.observer.on_event(
            &net_event!(
                EventSeverity::Warning,
                EventKind::OutOfRangeTimestamp,
                "no position at {:.3}s (retained {:.3}s..{:.3}s), using live position",
                shot_time,
                earliest,
                latest
            )
            .with_entity(id)
            .with_timestamp(shot_time),
        );
    }

    fn resolve(
        &self,
        shot: &Shot,
        compensation_time: f64,
        candidates: &Candidates,
        live: &BTreeMap<EntityId, Entity>,
    ) -> ShotOutcome {
        // Closest along the ray; ties go to the lower id.
        let closest = candidates
            .iter()
            .min_by(|a, b| a.projection.total_cmp(&b.projection));

        let mut metrics = self.metrics.lock();
        metrics.total_shots += 1;
        metrics.compensation_times.push(compensation_time);

        let Some(candidate) = closest else {
            metrics.misses += 1;
            if should_have_hit(shot, live) {
                metrics.false_negatives += 1;
            }
            return ShotOutcome {
                result: HitResult::Miss,
                target: None,
                compensation_time,
            };
        };

        metrics.hit_registration_delays.push(compensation_time);
        let valid = candidate.rewound.is_some_and(|s| s.is_alive());
        if valid {
            metrics.hits += 1;
            drop(metrics);
            debug!(
                shot = shot.shot_id,
                target = candidate.id.as_u32(),
                "hit after rewinding {:.1}ms",
                compensation_time * 1000.0
            );
            ShotOutcome {
                result: HitResult::Hit,
                target: Some(candidate.id),
                compensation_time,
            }
        } else {
            metrics.invalid += 1;
            metrics.false_positives += 1;
            drop(metrics);
            let reason = if candidate.rewound.is_some() {
                "target was dead at the rewound time"
            } else {
                "target has no position at the rewound time"
            };
            self.observer.on_event(
                &net_event!(EventSeverity::Info, EventKind::InvalidHit, "{}", reason)
                    .with_entity(candidate.id)
                    .with_timestamp(shot.perceived_time())
                    .with_context("shot_id", shot.shot_id),
            );
            ShotOutcome {
                result: HitResult::Invalid,
                target: None,
                compensation_time,
            }
        }
    }
}

/// Whether any live entity other than the shooter sits close to the aim point.
fn should_have_hit(shot: &Shot, live: &BTreeMap<EntityId, Entity>) -> bool {
    live.values().any(|entity| {
        entity.id != shot.shooter_id
            && shot.target_position.distance(entity.position) < entity.hitbox_radius * 2.0
    })
}

impl std::fmt::Debug for LagCompensationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LagCompensationEngine")
            .field("config", &self.config)
            .field("server_time", &self.server_time())
            .field("tracked_entities", &self.tracked_entities())
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

    const SHOOTER: EntityId = EntityId::new(1);
    const TARGET: EntityId = EntityId::new(2);

    fn engine() -> (LagCompensationEngine, Arc<CollectingObserver>) {
        let observer = Arc::new(CollectingObserver::new());
        let engine =
            LagCompensationEngine::with_observer(LagCompensationConfig::default(), observer.clone());
        (engine, observer)
    }

    fn world(entities: &[Entity]) -> BTreeMap<EntityId, Entity> {
        entities.iter().map(|e| (e.id, *e)).collect()
    }

    /// Target walks along +z at 5 units/s, 10 units in front of the shooter,
    /// recorded at 60 Hz up to t = 1.0. Its 0.3 hitbox is smaller than the
    /// 0.5 units it covers in 100 ms.
    fn moving_target(engine: &LagCompensationEngine) -> Entity {
        let velocity = Vector3::new(0.0, 0.0, 5.0);
        let mut target = Entity::new(TARGET, Vector3::new(10.0, 0.0, 0.0))
            .with_velocity(velocity)
            .with_hitbox_radius(0.3);
        for tick in 0..=60 {
            let t = f64::from(tick) / 60.0;
            target.position = Vector3::new(10.0, 0.0, 5.0 * t);
            engine.update_entity_position(&target, t).unwrap();
        }
        target
    }

    fn aim(from: Vector3, at: Vector3) -> Vector3 {
        (at - from).normalize()
    }

    #[test]
    fn compensated_aim_hits_and_current_aim_misses() {
        let (engine, _) = engine();
        let shooter = Entity::new(SHOOTER, Vector3::ZERO);
        let target = moving_target(&engine);
        let live = world(&[shooter, target]);

        // The shooter saw the target 100 ms ago: 0.5 units behind.
        let seen = Vector3::new(10.0, 0.0, 4.5);
        let shot = Shot::new(1, SHOOTER, 1.0, Vector3::ZERO, aim(Vector3::ZERO, seen))
            .with_latency(0.1)
            .aimed_at(seen);
        let outcome = engine.process_shot(&shot, &live);
        assert_eq!(outcome.result, HitResult::Hit);
        assert_eq!(outcome.target, Some(TARGET));
        assert!((outcome.compensation_time - 0.1).abs() < 1e-9);

        // Aiming at the current position through a 100 ms rewind misses once
        // the target moved more than a hitbox radius.
        let now = target.position;
        let shot = Shot::new(2, SHOOTER, 1.0, Vector3::ZERO, aim(Vector3::ZERO, now))
            .with_latency(0.1)
            .aimed_at(now);
        let outcome = engine.process_shot(&shot, &live);
        assert_eq!(outcome.result, HitResult::Miss);
        assert_eq!(outcome.target, None);
    }

    #[test]
    fn beyond_ceiling_is_rejected() {
        let (engine, observer) = engine();
        let target = moving_target(&engine);
        let live = world(&[Entity::new(SHOOTER, Vector3::ZERO), target]);
        let latency = engine.config().max_compensation_time + 1e-6;
        let shot = Shot::new(1, SHOOTER, 1.0, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0))
            .with_latency(latency);

        let outcome = engine.process_shot(&shot, &live);
        assert_eq!(outcome.result, HitResult::Rejected);
        assert_eq!(outcome.target, None);
        assert_eq!(engine.metrics().rejected, 1);
        assert_eq!(observer.count_of_kind(EventKind::InvalidCompensationWindow), 1);
    }

    #[test]
    fn future_shot_is_rejected() {
        let (engine, _) = engine();
        let target = moving_target(&engine);
        let live = world(&[Entity::new(SHOOTER, Vector3::ZERO), target]);
        let shot = Shot::new(1, SHOOTER, 1.5, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0))
            .with_latency(0.1);

        let outcome = engine.process_shot(&shot, &live);
        assert_eq!(outcome.result, HitResult::Rejected);
        assert!(outcome.compensation_time < 0.0);
    }

    #[test]
    fn nan_latency_is_rejected() {
        let (engine, _) = engine();
        let target = moving_target(&engine);
        let live = world(&[Entity::new(SHOOTER, Vector3::ZERO), target]);
        let shot = Shot::new(1, SHOOTER, 1.0, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0))
            .with_latency(f64::NAN);
        assert_eq!(engine.process_shot(&shot, &live).result, HitResult::Rejected);
        assert!(engine.metrics().compensation_times.is_empty());
    }

    #[test]
    fn shooter_never_hits_itself() {
        let (engine, _) = engine();
        let shooter = Entity::new(SHOOTER, Vector3::new(1.0, 0.0, 0.0));
        engine.update_entity_position(&shooter, 0.0).unwrap();
        let shot = Shot::new(1, SHOOTER, 0.0, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0));
        let outcome = engine.process_shot(&shot, &world(&[shooter]));
        assert_eq!(outcome.result, HitResult::Miss);
    }

    #[test]
    fn closest_entity_along_ray_wins() {
        let (engine, _) = engine();
        let near = Entity::new(EntityId::new(7), Vector3::new(5.0, 0.0, 0.0));
        let far = Entity::new(EntityId::new(3), Vector3::new(9.0, 0.0, 0.0));
        engine.update_entity_position(&near, 0.0).unwrap();
        engine.update_entity_position(&far, 0.0).unwrap();
        let shot = Shot::new(1, SHOOTER, 0.0, Vector3::ZERO, Vector3::new(2.0, 0.0, 0.0));
        let outcome = engine.process_shot(&shot, &world(&[near, far]));
        assert_eq!(outcome.target, Some(EntityId::new(7)));
    }

    #[test]
    fn entities_behind_the_shooter_are_ignored() {
        let (engine, _) = engine();
        let behind = Entity::new(TARGET, Vector3::new(-5.0, 0.0, 0.0));
        engine.update_entity_position(&behind, 0.0).unwrap();
        let shot = Shot::new(1, SHOOTER, 0.0, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(
            engine.process_shot(&shot, &world(&[behind])).result,
            HitResult::Miss
        );
    }

    #[test]
    fn dead_at_rewound_time_is_invalid() {
        let (engine, observer) = engine();
        let mut target = Entity::new(TARGET, Vector3::new(10.0, 0.0, 0.0)).with_health(0.0);
        engine.update_entity_position(&target, 0.0).unwrap();
        target.health = 100.0;
        engine.update_entity_position(&target, 0.2).unwrap();

        let shot = Shot::new(1, SHOOTER, 0.2, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0))
            .with_latency(0.15);
        let outcome = engine.process_shot(&shot, &world(&[target]));
        assert_eq!(outcome.result, HitResult::Invalid);
        assert_eq!(outcome.target, None);

        let metrics = engine.metrics();
        assert_eq!(metrics.invalid, 1);
        assert_eq!(metrics.false_positives, 1);
        assert_eq!(metrics.hit_registration_delays.len(), 1);
        assert_eq!(observer.count_of_kind(EventKind::InvalidHit), 1);
    }

    #[test]
    fn untracked_entity_uses_live_position_but_fails_validation() {
        let (engine, _) = engine();
        let tracked = Entity::new(EntityId::new(9), Vector3::new(0.0, 0.0, 50.0));
        engine.update_entity_position(&tracked, 0.0).unwrap();
        let ghost = Entity::new(TARGET, Vector3::new(10.0, 0.0, 0.0));
        let shot = Shot::new(1, SHOOTER, 0.0, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0));
        let outcome = engine.process_shot(&shot, &world(&[tracked, ghost]));
        assert_eq!(outcome.result, HitResult::Invalid);
    }

    #[test]
    fn lookup_past_retained_history_reports_out_of_range() {
        let (engine, observer) = engine();
        let target = Entity::new(TARGET, Vector3::new(10.0, 0.0, 0.0));
        engine.update_entity_position(&target, 1.0).unwrap();
        let marker = Entity::new(EntityId::new(5), Vector3::new(0.0, 50.0, 0.0));
        engine.update_entity_position(&marker, 1.1).unwrap();

        // Perceived at 0.95: inside the window, before the target's first snapshot.
        let shot = Shot::new(1, SHOOTER, 1.1, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0))
            .with_latency(0.15);
        let _ = engine.process_shot(&shot, &world(&[target, marker]));
        assert!(observer.count_of_kind(EventKind::OutOfRangeTimestamp) >= 1);
    }

    #[test]
    fn near_miss_on_live_position_counts_false_negative() {
        let (engine, _) = engine();
        let target = Entity::new(TARGET, Vector3::new(10.0, 0.0, 0.0));
        engine.update_entity_position(&target, 0.0).unwrap();
        // Ray passes 0.8 units away; aim point within two radii of the target.
        let aim_point = Vector3::new(10.0, 0.0, 0.8);
        let shot = Shot::new(1, SHOOTER, 0.0, Vector3::ZERO, aim(Vector3::ZERO, aim_point))
            .aimed_at(aim_point);
        let outcome = engine.process_shot(&shot, &world(&[target]));
        assert_eq!(outcome.result, HitResult::Miss);
        assert_eq!(engine.metrics().false_negatives, 1);
    }

    #[test]
    fn out_of_order_update_is_refused() {
        let (engine, observer) = engine();
        let target = Entity::new(TARGET, Vector3::ZERO);
        engine.update_entity_position(&target, 1.0).unwrap();
        let err = engine.update_entity_position(&target, 0.5).unwrap_err();
        assert!(matches!(err, RewindError::OutOfOrderSnapshot { .. }));
        assert_eq!(engine.server_time(), 1.0);
        assert_eq!(observer.count_of_kind(EventKind::OutOfOrderSnapshot), 1);
    }

    #[test]
    fn server_time_only_moves_forward() {
        let (engine, _) = engine();
        engine
            .update_entity_position(&Entity::new(SHOOTER, Vector3::ZERO), 2.0)
            .unwrap();
        engine
            .update_entity_position(&Entity::new(TARGET, Vector3::ZERO), 1.0)
            .unwrap();
        assert_eq!(engine.server_time(), 2.0);
        assert_eq!(engine.tracked_entities(), 2);
    }

    #[test]
    fn report_rates() {
        let metrics = LagCompensationMetrics {
            total_shots: 10,
            hits: 6,
            misses: 2,
            rejected: 1,
            invalid: 1,
            false_positives: 1,
            false_negatives: 2,
            compensation_times: vec![0.05, 0.1, 0.15],
            hit_registration_delays: vec![0.1],
        };
        let report = metrics.calculate();
        assert_eq!(report.hit_rate, 0.6);
        assert_eq!(report.rejection_rate, 0.1);
        assert_eq!(report.false_negative_rate, 0.2);
        assert!((report.average_compensation_time - 0.1).abs() < 1e-12);
        assert_eq!(report.max_compensation_time, 0.15);
        assert_eq!(report.average_hit_registration_delay, 0.1);
        // Reading does not mutate.
        assert_eq!(metrics.calculate(), report);
    }

    #[test]
    fn empty_report_is_zero() {
        let report = LagCompensationMetrics::default().calculate();
        assert_eq!(report.hit_rate, 0.0);
        assert_eq!(report.p99_compensation_time, 0.0);
    }

    #[test]
    fn every_branch_counts_one_shot() {
        let (engine, _) = engine();
        let target = moving_target(&engine);
        let live = world(&[Entity::new(SHOOTER, Vector3::ZERO), target]);
        let directions = [
            Vector3::new(1.0, 0.0, 0.5),
            Vector3::new(-1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        for (i, direction) in directions.into_iter().enumerate() {
            let shot = Shot::new(i as u64, SHOOTER, 1.0, Vector3::ZERO, direction).with_latency(0.05);
            let _ = engine.process_shot(&shot, &live);
        }
        let shot = Shot::new(9, SHOOTER, 1.0, Vector3::ZERO, Vector3::ZERO).with_latency(5.0);
        let _ = engine.process_shot(&shot, &live);

        let m = engine.metrics();
        assert_eq!(m.total_shots, 4);
        assert_eq!(m.hits + m.misses + m.rejected + m.invalid, m.total_shots);
    }

    #[test]
    fn weapon_sets_damage() {
        let shot = Shot::new(1, SHOOTER, 0.0, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0))
            .with_weapon(WeaponKind::Sniper);
        assert_eq!(shot.damage, 80.0);
        assert_eq!(Shot::new(1, SHOOTER, 0.0, Vector3::ZERO, Vector3::ZERO).damage, 25.0);
    }

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LagCompensationEngine>();
    }
}
