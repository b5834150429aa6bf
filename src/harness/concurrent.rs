//! Wall-clock scenario runner: one tokio task per simulated client.
//!
//! Each task runs its own predict, transit, server, transit, reconcile cycle
//! strictly in sequence, so the ordering guarantees of a single client hold
//! while many clients interleave on the runtime. All tasks publish their
//! authoritative positions into one shared [`LagCompensationEngine`] and fire
//! shots at each other through it.
//!
//! Unlike the virtual-clock drivers this runner really sleeps for every
//! transit. Under a paused tokio clock (`start_paused = true`) it completes
//! instantly but task interleaving is still up to the scheduler, so reports
//! are not bit-for-bit reproducible.
//!
//! # Example
//!
//! ```no_run
//! use rewindkit::config::ScenarioConfig;
//! use rewindkit::harness::concurrent::run_concurrent;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), rewindkit::RewindError> {
//!     let report = run_concurrent(ScenarioConfig::good_conditions()).await?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use web_time::Duration;

use crate::config::{ScenarioConfig, ServerConfig};
use crate::harness::lag_scenario::{aim_with_error, spawn_entities};
use crate::lag_compensation::{Entity, LagCompensationEngine, Shot};
use crate::network::link::{SimulatedLink, Transit, TransitModel};
use crate::network::link_stats::LinkStats;
use crate::prediction::{ClientPrediction, GameState, PlayerInput, PredictionMetrics};
use crate::report::ScenarioReport;
use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::server::{ServerSimulation, ServerStats};
use crate::telemetry::{default_observer, EventObserver};
use crate::{EntityId, RewindError, SequenceNumber};

/// Live positions every client task reads targets from.
type World = Arc<RwLock<BTreeMap<EntityId, Entity>>>;

/// What one client task hands back when it finishes.
#[derive(Debug, Default)]
struct ClientOutcome {
    index: usize,
    metrics: PredictionMetrics,
    server: ServerStats,
    network: LinkStats,
}

struct ClientTask {
    index: usize,
    id: EntityId,
    config: Arc<ScenarioConfig>,
    client: ClientPrediction,
    server: ServerSimulation,
    uplink: SimulatedLink,
    downlink: SimulatedLink,
    rng: Pcg32,
    engine: Arc<LagCompensationEngine>,
    world: World,
    start: Instant,
}

impl ClientTask {
    fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Seconds between this client's shots, and the offset of its first one
    /// so that clients do not all fire on the same instant.
    fn shot_schedule(&self) -> (f64, f64) {
        let clients = self.config.num_entities as f64;
        let period = clients / self.config.shots_per_second;
        (period, period * (self.index as f64 + 1.0) / clients)
    }

    async fn run(mut self) -> Result<ClientOutcome, RewindError> {
        let pattern = self.config.movement_pattern;
        let duration = self.config.duration_seconds;
        let tick = Duration::from_secs_f64(1.0 / f64::from(self.config.client_tick_rate_hz));
        let (shot_period, mut next_shot) = self.shot_schedule();
        let mut sequence = SequenceNumber::FIRST;
        let mut shots: u64 = 0;

        let mut ticker = tokio::time::interval_at(self.start + tick, tick);
        // A round trip spans many ticks; the ones missed meanwhile are skipped.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let elapsed = ticker.tick().await.duration_since(self.start).as_secs_f64();
            if elapsed >= duration {
                break;
            }

            let input = PlayerInput::new(sequence, elapsed, pattern.input(&mut self.rng, elapsed));
            sequence = sequence.next();
            let _ = self.client.predict(input.clone());

            let uplink_delay = match self.uplink.transit() {
                Transit::Delivered(delay) => delay,
                Transit::Dropped => {
                    debug!(client = self.id.as_u32(), sequence = input.sequence_number.as_u32(), "input lost in transit");
                    continue;
                }
            };
            tokio::time::sleep(uplink_delay).await;

            let state = self.server.process_input(&input);
            let server_time = self.elapsed();
            self.publish(&state, server_time)?;

            if server_time >= next_shot {
                next_shot += shot_period;
                shots += 1;
                self.fire(shots, &state, server_time, uplink_delay.as_secs_f64());
            }

            match self.downlink.transit() {
                Transit::Delivered(delay) => tokio::time::sleep(delay).await,
                Transit::Dropped => {
                    debug!(client = self.id.as_u32(), sequence = state.sequence_number.as_u32(), "state lost in transit");
                    continue;
                }
            }
            let _ = self.client.reconcile(&state);
        }

        let mut network = self.uplink.stats();
        network.merge(&self.downlink.stats());
        Ok(ClientOutcome {
            index: self.index,
            metrics: self.client.metrics().clone(),
            server: self.server.stats(),
            network,
        })
    }

    /// Makes the authoritative state visible to other clients and records it
    /// into the shared history.
    fn publish(&self, state: &GameState, server_time: f64) -> Result<(), RewindError> {
        let entity = Entity::new(self.id, state.position)
            .with_velocity(state.velocity)
            .with_health(state.health);
        self.world.write().insert(self.id, entity);
        self.engine.update_entity_position(&entity, server_time)
    }

    fn fire(&mut self, count: u64, state: &GameState, server_time: f64, latency: f64) {
        // The world lock is only ever held outside of an await.
        let live = self.world.read().clone();
        let targets: Vec<EntityId> = live.keys().copied().filter(|id| *id != self.id).collect();
        if targets.is_empty() {
            return;
        }
        let pick = self.rng.gen_range_usize(0..targets.len());
        let Some(&target_id) = targets.get(pick) else {
            return;
        };

        let aim_point = self
            .engine
            .rewind(target_id, server_time - latency)
            .map(|snapshot| snapshot.position)
            .or_else(|| live.get(&target_id).map(|entity| entity.position))
            .unwrap_or_default();
        let direction = aim_with_error(&mut self.rng, state.position, aim_point);

        let shot_id = (u64::from(self.id.as_u32()) << 32) | count;
        let shot = Shot::new(shot_id, self.id, server_time, state.position, direction)
            .with_latency(latency)
            .aimed_at(aim_point);
        let outcome = self.engine.process_shot(&shot, &live);
        debug!(
            shooter = self.id.as_u32(),
            target = target_id.as_u32(),
            result = outcome.result.as_str(),
            "concurrent shot"
        );
    }
}

/// Runs every client of a scenario as its own tokio task.
pub struct ConcurrentScenario {
    config: ScenarioConfig,
    server_config: ServerConfig,
    observer: Arc<dyn EventObserver>,
}

impl ConcurrentScenario {
    /// Validates `config` and prepares a runner logging through tracing.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: ScenarioConfig) -> Result<Self, RewindError> {
        Self::with_observer(config, default_observer())
    }

    /// Validates `config` and prepares a runner reporting events to `observer`.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if `config` does not validate.
    pub fn with_observer(
        config: ScenarioConfig,
        observer: Arc<dyn EventObserver>,
    ) -> Result<Self, RewindError> {
        config.validate()?;
        Ok(Self {
            config,
            server_config: ServerConfig::default(),
            observer,
        })
    }

    /// Replaces the server bounds.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::InvalidConfig`] if `server_config` does not validate.
    pub fn with_server_config(mut self, server_config: ServerConfig) -> Result<Self, RewindError> {
        server_config.validate()?;
        self.server_config = server_config;
        Ok(self)
    }

    /// The scenario's configuration.
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Spawns one task per client, waits for all of them to finish their last
    /// round trip and aggregates the results.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::TaskFailed`] if a client task panicked,
    /// [`RewindError::OutOfOrderSnapshot`] if the shared history rejected a
    /// publish, and fails if the report cannot be encoded for its digest.
    pub async fn run(&self) -> Result<ScenarioReport, RewindError> {
        let config = Arc::new(self.config.clone());
        let pattern = config.movement_pattern;
        let mut rng = Pcg32::seed_from_u64(config.seed);
        let engine = Arc::new(LagCompensationEngine::with_observer(
            config.lag_compensation(),
            self.observer.clone(),
        ));

        let spawned = spawn_entities(&mut rng, config.num_entities);
        for entity in spawned.values() {
            engine.update_entity_position(entity, 0.0)?;
        }
        let world: World = Arc::new(RwLock::new(spawned.clone()));

        info!(
            clients = config.num_entities,
            pattern = pattern.as_str(),
            seed = config.seed,
            "starting concurrent scenario"
        );

        let start = Instant::now();
        let (low, high) = config.latency_range_ms;
        let mut tasks = JoinSet::new();
        for (index, entity) in spawned.values().enumerate() {
            let conditions = config.network_conditions(rng.gen_range_f64(low, high));
            let initial = GameState::initial(0.0, entity.position);
            let client = ClientPrediction::with_observer(config.prediction(), self.observer.clone())
                .for_client(entity.id)
                .with_initial_state(initial);
            let server = ServerSimulation::with_observer(
                self.server_config,
                client.movement_model(),
                self.observer.clone(),
            )?
            .for_client(entity.id)
            .with_initial_state(initial);
            let stream = 3 * index as u64;

            let task = ClientTask {
                index,
                id: entity.id,
                config: config.clone(),
                client,
                server,
                uplink: SimulatedLink::with_rng(conditions, rng.fork(stream + 1)),
                downlink: SimulatedLink::with_rng(conditions, rng.fork(stream + 2)),
                rng: rng.fork(stream + 3),
                engine: engine.clone(),
                world: world.clone(),
                start,
            };
            tasks.spawn(task.run());
        }

        let mut outcomes = Vec::with_capacity(config.num_entities);
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|err| {
                warn!(error = %err, "client task did not complete");
                RewindError::TaskFailed {
                    info: err.to_string(),
                }
            })??;
            outcomes.push(outcome);
        }
        // Completion order depends on the scheduler; merge in client order.
        outcomes.sort_by_key(|outcome| outcome.index);

        let mut metrics = PredictionMetrics::default();
        let mut server = ServerStats::default();
        let mut network = LinkStats::default();
        for outcome in &outcomes {
            metrics.merge(&outcome.metrics);
            server.merge(&outcome.server);
            network.merge(&outcome.network);
        }

        let prediction = metrics.calculate();
        let lag = engine.report();
        info!("{}", prediction);
        info!("{}", lag);
        ScenarioReport::new(format!("concurrent/{pattern}"), config.seed, config.duration_seconds)
            .with_lag_compensation(lag)
            .with_prediction(prediction)
            .with_server(server)
            .with_network(network)
            .finish()
    }
}

impl std::fmt::Debug for ConcurrentScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentScenario")
            .field("config", &self.config)
            .field("server_config", &self.server_config)
            .finish_non_exhaustive()
    }
}

/// Validates `config` and runs it with [`ConcurrentScenario`].
///
/// # Errors
///
/// See [`ConcurrentScenario::new`] and [`ConcurrentScenario::run`].
pub async fn run_concurrent(config: ScenarioConfig) -> Result<ScenarioReport, RewindError> {
    ConcurrentScenario::new(config)?.run().await
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::telemetry::{CollectingObserver, EventKind};

    fn config(seed: u64) -> ScenarioConfig {
        ScenarioConfig {
            duration_seconds: 2.0,
            num_entities: 3,
            ..ScenarioConfig::deterministic(seed)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_delivered_input_is_processed() {
        let report = run_concurrent(config(1)).await.unwrap();
        let prediction = report.prediction.unwrap();
        let server = report.server.unwrap();

        assert!(prediction.total_inputs > 0);
        assert_eq!(server.processed_inputs, prediction.total_inputs);
        assert_eq!(server.duplicate_inputs, 0);
        assert_eq!(prediction.desync_events, 0);
        assert_eq!(report.network.dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_engine_sees_shots_from_every_client() {
        let report = run_concurrent(config(2)).await.unwrap();
        let lag = report.lag_compensation.unwrap();

        // One shot per client every 1.5 s, the first within the first 1.5 s.
        assert!(lag.total_shots >= 3);
        assert_eq!(lag.total_shots, lag.hits + lag.misses + lag.rejected + lag.invalid);
        // 50-100 ms one-way delay stays inside the 200 ms window.
        assert_eq!(lag.rejected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lossless_run_reports_no_desync_events() {
        let observer = Arc::new(CollectingObserver::new());
        let scenario = ConcurrentScenario::with_observer(config(3), observer.clone()).unwrap();
        let report = scenario.run().await.unwrap();
        assert_eq!(report.name, "concurrent/circular");
        assert!(!observer.has_event(EventKind::Desync));
        assert!(!observer.has_event(EventKind::OutOfOrderSnapshot));
    }

    #[test]
    fn invalid_config_is_rejected_before_spawning() {
        let bad = ScenarioConfig {
            num_entities: 1,
            ..config(4)
        };
        assert!(matches!(
            ConcurrentScenario::new(bad),
            Err(RewindError::InvalidConfig { .. })
        ));
    }
}
