//! Virtual-clock driver for the lag compensation engine.
//!
//! Entities spawn at random positions and move according to the configured
//! [`MovementPattern`], recorded into the engine at the server tick rate.
//! Shots are fired at `shots_per_second` from a random shooter at a different
//! random target. Each shooter sees the world one link delay late and aims
//! (with a small error) at where it saw the target; the server receives the
//! shot now and rewinds by the reported delay.
//!
//! Nothing sleeps: time is a counter, so a ten second scenario runs in
//! milliseconds and the same seed always yields the same report.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ScenarioConfig;
use crate::harness::patterns::MovementPattern;
use crate::lag_compensation::{Entity, LagCompensationEngine, Shot};
use crate::network::link::{SimulatedLink, Transit, TransitModel};
use crate::report::ScenarioReport;
use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::telemetry::{default_observer, EventObserver};
use crate::{EntityId, RewindError, Vector3};

/// Half extent of the arena entities are kept in.
pub const ARENA_HALF_EXTENT: f64 = 100.0;

/// Half extent of the square entities spawn in.
pub const SPAWN_HALF_EXTENT: f64 = 50.0;

/// Largest per-component aiming error added to a normalized shot direction.
pub const AIM_ERROR: f64 = 0.05;

/// Spawns `count` entities (ids `1..=count`) at random positions on the ground.
pub(crate) fn spawn_entities<R: Rng + ?Sized>(rng: &mut R, count: usize) -> BTreeMap<EntityId, Entity> {
    (1..=count as u32)
        .map(|raw| {
            let id = EntityId::new(raw);
            let position = Vector3::new(
                rng.gen_range_f64(-SPAWN_HALF_EXTENT, SPAWN_HALF_EXTENT),
                0.0,
                rng.gen_range_f64(-SPAWN_HALF_EXTENT, SPAWN_HALF_EXTENT),
            );
            (id, Entity::new(id, position))
        })
        .collect()
}

/// Picks two distinct ids, shooter first.
pub(crate) fn pick_pair<R: Rng + ?Sized>(rng: &mut R, ids: &[EntityId]) -> Option<(EntityId, EntityId)> {
    if ids.len() < 2 {
        return None;
    }
    let shooter = rng.gen_range_usize(0..ids.len());
    let mut target = rng.gen_range_usize(0..ids.len() - 1);
    if target >= shooter {
        target += 1;
    }
    Some((*ids.get(shooter)?, *ids.get(target)?))
}

/// Normalized direction from `origin` to `target` with a random aiming error
/// on the horizontal components.
pub(crate) fn aim_with_error<R: Rng + ?Sized>(rng: &mut R, origin: Vector3, target: Vector3) -> Vector3 {
    let mut direction = (target - origin).normalize();
    direction.x += rng.gen_range_f64(-AIM_ERROR, AIM_ERROR);
    direction.z += rng.gen_range_f64(-AIM_ERROR, AIM_ERROR);
    direction.normalize()
}

fn clamp_to_arena(position: Vector3) -> Vector3 {
    Vector3::new(
        position.x.clamp(-ARENA_HALF_EXTENT, ARENA_HALF_EXTENT),
        position.y,
        position.z.clamp(-ARENA_HALF_EXTENT, ARENA_HALF_EXTENT),
    )
}

/// Runs one lag compensation scenario.
///
/// ```
/// use rewindkit::config::ScenarioConfig;
/// use rewindkit::harness::lag_scenario::LagCompensationScenario;
///
/// let config = ScenarioConfig {
///     duration_seconds: 2.0,
///     ..ScenarioConfig::deterministic(7)
/// };
/// let report = LagCompensationScenario::new(config).unwrap().run().unwrap();
/// let lag = report.lag_compensation.unwrap();
/// assert_eq!(lag.total_shots, lag.hits + lag.misses + lag.rejected + lag.invalid);
/// ```
pub struct LagCompensationScenario {
    config: ScenarioConfig,
    observer: Arc<dyn EventObserver>,
}

impl LagCompensationScenario {
    /// Validates `config` and prepares a scenario logging through tracing.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: ScenarioConfig) -> Result<Self, RewindError> {
        Self::with_observer(config, default_observer())
    }

    /// Validates `config` and prepares a scenario reporting events to `observer`.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if `config` does not validate.
    pub fn with_observer(
        config: ScenarioConfig,
        observer: Arc<dyn EventObserver>,
    ) -> Result<Self, RewindError> {
        config.validate()?;
        Ok(Self { config, observer })
    }

    /// The scenario's configuration.
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Runs the scenario to completion.
    ///
    /// # Errors
    ///
    /// Only fails if the report cannot be encoded for its digest.
    pub fn run(&self) -> Result<ScenarioReport, RewindError> {
        let config = &self.config;
        let pattern = config.movement_pattern;
        let mut rng = Pcg32::seed_from_u64(config.seed);
        let mut link = SimulatedLink::with_rng(config.network_conditions(0.0), rng.fork(1));
        let engine = LagCompensationEngine::with_observer(config.lag_compensation(), self.observer.clone());

        let mut entities = spawn_entities(&mut rng, config.num_entities);
        let ids: Vec<EntityId> = entities.keys().copied().collect();
        let phases: BTreeMap<EntityId, f64> = ids
            .iter()
            .map(|id| (*id, MovementPattern::phase(&mut rng)))
            .collect();

        info!(
            entities = config.num_entities,
            pattern = pattern.as_str(),
            seed = config.seed,
            "starting lag compensation scenario"
        );

        for entity in entities.values() {
            engine.update_entity_position(entity, 0.0)?;
        }

        let tick_interval = 1.0 / f64::from(config.server_tick_rate_hz);
        let shot_interval = 1.0 / config.shots_per_second;
        let duration = config.duration_seconds;
        let mut tick_index: u64 = 1;
        let mut shot_index: u64 = 1;
        let mut shot_id: u64 = 0;

        loop {
            let next_tick = tick_index as f64 * tick_interval;
            let next_shot = shot_index as f64 * shot_interval;
            let now = next_tick.min(next_shot);
            if now >= duration {
                break;
            }

            // Ticks run first on a tie so shots see the freshest history.
            if next_tick <= next_shot {
                for entity in entities.values_mut() {
                    let phase = phases.get(&entity.id).copied().unwrap_or_default();
                    entity.velocity = pattern.entity_velocity(&mut rng, entity.position, now, phase);
                    entity.position = clamp_to_arena(entity.position + entity.velocity * tick_interval);
                    engine.update_entity_position(entity, now)?;
                }
                tick_index += 1;
                continue;
            }
            shot_index += 1;

            let Some((shooter_id, target_id)) = pick_pair(&mut rng, &ids) else {
                continue;
            };
            let (low, high) = config.latency_range_ms;
            link.set_conditions(config.network_conditions(rng.gen_range_f64(low, high)));
            let latency = match link.transit() {
                Transit::Delivered(delay) => delay.as_secs_f64(),
                Transit::Dropped => {
                    debug!(shooter = shooter_id.as_u32(), "shot lost in transit");
                    continue;
                }
            };

            let seen_at = now - latency;
            let seen = |id: EntityId| {
                engine
                    .rewind(id, seen_at)
                    .map(|snapshot| snapshot.position)
                    .or_else(|| entities.get(&id).map(|entity| entity.position))
                    .unwrap_or_default()
            };
            let origin = seen(shooter_id);
            let aim_point = seen(target_id);
            let direction = aim_with_error(&mut rng, origin, aim_point);

            shot_id += 1;
            let shot = Shot::new(shot_id, shooter_id, now, origin, direction)
                .with_latency(latency)
                .aimed_at(aim_point);
            let _ = engine.process_shot(&shot, &entities);
        }

        let lag_report = engine.report();
        info!("{}", lag_report);
        ScenarioReport::new(format!("lag-compensation/{pattern}"), config.seed, duration)
            .with_lag_compensation(lag_report)
            .with_network(link.stats())
            .finish()
    }
}

impl std::fmt::Debug for LagCompensationScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LagCompensationScenario")
            .field("config", &self.config)
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
    use crate::telemetry::{CollectingObserver, EventKind};

    fn short(seed: u64) -> ScenarioConfig {
        ScenarioConfig {
            duration_seconds: 3.0,
            num_entities: 4,
            ..ScenarioConfig::deterministic(seed)
        }
    }

    #[test]
    fn pick_pair_is_always_distinct() {
        let mut rng = Pcg32::seed_from_u64(1);
        let ids: Vec<EntityId> = (1..=3).map(EntityId::new).collect();
        for _ in 0..500 {
            let (a, b) = pick_pair(&mut rng, &ids).unwrap();
            assert_ne!(a, b);
        }
        assert!(pick_pair(&mut rng, &ids[..1]).is_none());
    }

    #[test]
    fn aim_is_normalized_and_close() {
        let mut rng = Pcg32::seed_from_u64(2);
        let direction = aim_with_error(&mut rng, Vector3::ZERO, Vector3::new(10.0, 0.0, 0.0));
        assert!((direction.length() - 1.0).abs() < 1e-9);
        assert!(direction.x > 0.99);
    }

    #[test]
    fn spawns_inside_square() {
        let mut rng = Pcg32::seed_from_u64(3);
        let entities = spawn_entities(&mut rng, 20);
        assert_eq!(entities.len(), 20);
        for entity in entities.values() {
            assert!(entity.position.x.abs() <= SPAWN_HALF_EXTENT);
            assert!(entity.position.z.abs() <= SPAWN_HALF_EXTENT);
            assert_eq!(entity.position.y, 0.0);
        }
    }

    #[test]
    fn shot_count_follows_fire_rate() {
        let report = LagCompensationScenario::new(short(4)).unwrap().run().unwrap();
        let lag = report.lag_compensation.unwrap();
        // 2 shots/s for 3 s: shots at 0.5, 1.0, ..., 2.5.
        assert_eq!(lag.total_shots, 5);
        assert_eq!(report.network.sent, 5);
    }

    #[test]
    fn same_seed_same_report() {
        let a = LagCompensationScenario::new(short(9)).unwrap().run().unwrap();
        let b = LagCompensationScenario::new(short(9)).unwrap().run().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn latency_beyond_window_is_always_rejected() {
        let observer = Arc::new(CollectingObserver::new());
        let config = ScenarioConfig {
            latency_range_ms: (300.0, 400.0),
            ..short(5)
        };
        let report = LagCompensationScenario::with_observer(config, observer.clone())
            .unwrap()
            .run()
            .unwrap();
        let lag = report.lag_compensation.unwrap();
        assert_eq!(lag.rejected, lag.total_shots);
        assert_eq!(lag.rejection_rate, 1.0);
        assert_eq!(
            observer.count_of_kind(EventKind::InvalidCompensationWindow) as u64,
            lag.total_shots
        );
    }

    #[test]
    fn static_targets_at_low_latency_are_never_rejected_or_invalid() {
        let config = ScenarioConfig {
            duration_seconds: 20.0,
            movement_pattern: MovementPattern::Static,
            latency_range_ms: (20.0, 50.0),
            ..ScenarioConfig::deterministic(11)
        };
        let report = LagCompensationScenario::new(config).unwrap().run().unwrap();
        let lag = report.lag_compensation.unwrap();
        assert_eq!(lag.total_shots, 39);
        assert_eq!(lag.rejected, 0);
        assert_eq!(lag.invalid, 0);
        assert!(lag.hits > 0, "{lag}");
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = ScenarioConfig {
            num_entities: 1,
            ..ScenarioConfig::default()
        };
        assert!(LagCompensationScenario::new(config).is_err());
    }
}
