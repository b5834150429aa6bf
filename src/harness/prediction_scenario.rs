//! Virtual-clock driver for client prediction against an authoritative server.
//!
//! Every client owns a [`ClientPrediction`], a [`ServerSimulation`] and one
//! [`SimulatedLink`] per direction. Each client tick generates an input from
//! the configured [`MovementPattern`], predicts it locally and sends it up.
//! Inputs that arrive are applied on the next server tick and the resulting
//! state is sent back down, where the client reconciles it. Deliveries are
//! handled strictly in arrival order across all clients.
//!
//! Each link direction is first-in first-out per client: jitter can delay a
//! message but never lets it overtake one sent earlier on the same link.
//!
//! Once the duration elapses no new inputs are generated, but everything
//! still in flight is delivered and processed before the report is built.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tracing::{debug, info};
use web_time::Duration;

use crate::config::{ScenarioConfig, ServerConfig};
use crate::harness::lag_scenario::SPAWN_HALF_EXTENT;
use crate::network::link::{SimulatedLink, Transit, TransitModel};
use crate::network::link_stats::LinkStats;
use crate::prediction::{ClientPrediction, GameState, PlayerInput, PredictionMetrics};
use crate::report::ScenarioReport;
use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::server::{ServerSimulation, ServerStats};
use crate::telemetry::{default_observer, EventObserver};
use crate::{EntityId, RewindError, SequenceNumber, Vector3};

/// One simulated player: its client, its server, and both link directions.
struct ClientSlot {
    client: ClientPrediction,
    server: ServerSimulation,
    uplink: SimulatedLink,
    downlink: SimulatedLink,
    next_sequence: SequenceNumber,
    /// Latest arrival scheduled on the uplink.
    uplink_clear: f64,
    /// Latest arrival scheduled on the downlink.
    downlink_clear: f64,
}

/// Arrival time of a message sent at `sent` after `delay`, held back so it
/// never arrives before the last one scheduled on the same link.
fn in_order_arrival(clear: &mut f64, sent: f64, delay: Duration) -> f64 {
    let arrival = (sent + delay.as_secs_f64()).max(*clear);
    *clear = arrival;
    arrival
}

#[derive(Debug)]
enum Delivery {
    /// An input reaches the server.
    Input(PlayerInput),
    /// An input is applied on a server tick.
    Apply(PlayerInput),
    /// An authoritative state reaches the client.
    State(GameState),
}

/// A delivery due at `time`. Earlier times first; equal times in scheduling order.
#[derive(Debug)]
struct Scheduled {
    time: f64,
    order: u64,
    client: usize,
    delivery: Delivery,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so that `BinaryHeap` pops the earliest delivery.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// In-flight deliveries of every client.
#[derive(Debug, Default)]
struct InFlight {
    queue: BinaryHeap<Scheduled>,
    scheduled: u64,
}

impl InFlight {
    fn push(&mut self, time: f64, client: usize, delivery: Delivery) {
        self.scheduled += 1;
        self.queue.push(Scheduled {
            time,
            order: self.scheduled,
            client,
            delivery,
        });
    }

    fn peek_time(&self) -> Option<f64> {
        self.queue.peek().map(|scheduled| scheduled.time)
    }

    fn pop(&mut self) -> Option<Scheduled> {
        self.queue.pop()
    }
}

/// First server tick at or after `time`.
fn next_server_tick(time: f64, tick_interval: f64) -> f64 {
    (time / tick_interval).ceil() * tick_interval
}

/// Runs one prediction scenario.
///
/// ```
/// use rewindkit::config::ScenarioConfig;
/// use rewindkit::harness::prediction_scenario::PredictionScenario;
///
/// let config = ScenarioConfig {
///     duration_seconds: 1.0,
///     num_entities: 2,
///     ..ScenarioConfig::deterministic(3)
/// };
/// let report = PredictionScenario::new(config).unwrap().run().unwrap();
/// let prediction = report.prediction.unwrap();
/// // Ticks at 1/60 s .. 59/60 s for each of the two clients.
/// assert_eq!(prediction.total_inputs, 118);
/// assert_eq!(prediction.desync_events, 0);
/// ```
pub struct PredictionScenario {
    config: ScenarioConfig,
    server_config: ServerConfig,
    observer: Arc<dyn EventObserver>,
}

impl PredictionScenario {
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

    fn spawn_clients(&self, rng: &mut Pcg32) -> Result<Vec<ClientSlot>, RewindError> {
        let config = &self.config;
        let (low, high) = config.latency_range_ms;
        (0..config.num_entities)
            .map(|index| {
                let id = EntityId::new(index as u32 + 1);
                let spawn = Vector3::new(
                    rng.gen_range_f64(-SPAWN_HALF_EXTENT, SPAWN_HALF_EXTENT),
                    0.0,
                    rng.gen_range_f64(-SPAWN_HALF_EXTENT, SPAWN_HALF_EXTENT),
                );
                let initial = GameState::initial(0.0, spawn);
                let conditions = config.network_conditions(rng.gen_range_f64(low, high));

                let client = ClientPrediction::with_observer(config.prediction(), self.observer.clone())
                    .for_client(id)
                    .with_initial_state(initial);
                let server = ServerSimulation::with_observer(
                    self.server_config,
                    client.movement_model(),
                    self.observer.clone(),
                )?
                .for_client(id)
                .with_initial_state(initial);

                Ok(ClientSlot {
                    client,
                    server,
                    uplink: SimulatedLink::with_rng(conditions, rng.fork(2 * index as u64 + 1)),
                    downlink: SimulatedLink::with_rng(conditions, rng.fork(2 * index as u64 + 2)),
                    next_sequence: SequenceNumber::FIRST,
                    uplink_clear: 0.0,
                    downlink_clear: 0.0,
                })
            })
            .collect()
    }

    /// Runs the scenario to completion, draining every in-flight delivery.
    ///
    /// # Errors
    ///
    /// Fails if the server bounds do not validate or the report cannot be
    /// encoded for its digest.
    pub fn run(&self) -> Result<ScenarioReport, RewindError> {
        let config = &self.config;
        let pattern = config.movement_pattern;
        let mut rng = Pcg32::seed_from_u64(config.seed);
        let mut slots = self.spawn_clients(&mut rng)?;
        let mut in_flight = InFlight::default();

        info!(
            clients = slots.len(),
            pattern = pattern.as_str(),
            seed = config.seed,
            "starting prediction scenario"
        );

        let client_tick = 1.0 / f64::from(config.client_tick_rate_hz);
        let server_tick = 1.0 / f64::from(config.server_tick_rate_hz);
        let duration = config.duration_seconds;
        let mut tick_index: u64 = 1;

        loop {
            let next_tick = tick_index as f64 * client_tick;
            let ticking = next_tick < duration;
            let due_delivery = in_flight.peek_time().filter(|&t| !ticking || t < next_tick);

            if due_delivery.is_some() {
                let Some(scheduled) = in_flight.pop() else {
                    break;
                };
                Self::deliver(&mut slots, &mut in_flight, scheduled, server_tick);
                continue;
            }
            if !ticking {
                break;
            }

            for (index, slot) in slots.iter_mut().enumerate() {
                let input = PlayerInput::new(slot.next_sequence, next_tick, pattern.input(&mut rng, next_tick));
                slot.next_sequence = slot.next_sequence.next();
                let _ = slot.client.predict(input.clone());
                match slot.uplink.transit() {
                    Transit::Delivered(delay) => {
                        let arrival = in_order_arrival(&mut slot.uplink_clear, next_tick, delay);
                        in_flight.push(arrival, index, Delivery::Input(input));
                    }
                    Transit::Dropped => {
                        debug!(sequence = input.sequence_number.as_u32(), "input lost in transit");
                    }
                }
            }
            tick_index += 1;
        }

        let mut metrics = PredictionMetrics::default();
        let mut server = ServerStats::default();
        let mut network = LinkStats::default();
        for slot in &slots {
            metrics.merge(slot.client.metrics());
            server.merge(&slot.server.stats());
            network.merge(&slot.uplink.stats());
            network.merge(&slot.downlink.stats());
        }

        let prediction = metrics.calculate();
        info!("{}", prediction);
        ScenarioReport::new(format!("prediction/{pattern}"), config.seed, duration)
            .with_prediction(prediction)
            .with_server(server)
            .with_network(network)
            .finish()
    }

    fn deliver(
        slots: &mut [ClientSlot],
        in_flight: &mut InFlight,
        scheduled: Scheduled,
        server_tick: f64,
    ) {
        let Scheduled {
            time,
            order: _,
            client,
            delivery,
        } = scheduled;
        let Some(slot) = slots.get_mut(client) else {
            return;
        };
        match delivery {
            Delivery::Input(input) => {
                in_flight.push(next_server_tick(time, server_tick), client, Delivery::Apply(input));
            }
            Delivery::Apply(input) => {
                let state = slot.server.process_input(&input);
                match slot.downlink.transit() {
                    Transit::Delivered(delay) => {
                        let arrival = in_order_arrival(&mut slot.downlink_clear, time, delay);
                        in_flight.push(arrival, client, Delivery::State(state));
                    }
                    Transit::Dropped => {
                        debug!(sequence = state.sequence_number.as_u32(), "state lost in transit");
                    }
                }
            }
            Delivery::State(state) => {
                let _ = slot.client.reconcile(&state);
            }
        }
    }
}

impl std::fmt::Debug for PredictionScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionScenario")
            .field("config", &self.config)
            .field("server_config", &self.server_config)
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
    use crate::harness::patterns::MovementPattern;
    use crate::telemetry::{CollectingObserver, EventKind};

    fn config(seed: u64, pattern: MovementPattern) -> ScenarioConfig {
        ScenarioConfig {
            duration_seconds: 2.0,
            num_entities: 3,
            movement_pattern: pattern,
            ..ScenarioConfig::deterministic(seed)
        }
    }

    #[test]
    fn queue_pops_earliest_then_fifo() {
        let mut in_flight = InFlight::default();
        in_flight.push(0.3, 0, Delivery::State(GameState::initial(0.0, Vector3::ZERO)));
        in_flight.push(0.1, 1, Delivery::State(GameState::initial(0.0, Vector3::ZERO)));
        in_flight.push(0.1, 2, Delivery::State(GameState::initial(0.0, Vector3::ZERO)));
        let order: Vec<usize> = std::iter::from_fn(|| in_flight.pop().map(|s| s.client)).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn server_ticks_round_up() {
        let tick = 1.0 / 30.0;
        assert!((next_server_tick(0.01, tick) - tick).abs() < 1e-12);
        assert!((next_server_tick(2.0 * tick, tick) - 2.0 * tick).abs() < 1e-12);
    }

    #[test]
    fn arrivals_on_one_link_keep_send_order() {
        let mut clear = 0.0;
        assert_eq!(in_order_arrival(&mut clear, 0.0, Duration::from_millis(250)), 0.25);
        // Sent later with less delay: held behind the first message.
        assert_eq!(in_order_arrival(&mut clear, 0.125, Duration::from_millis(0)), 0.25);
        assert_eq!(in_order_arrival(&mut clear, 0.5, Duration::from_millis(0)), 0.5);
    }

    #[test]
    fn jitter_without_loss_never_mispredicts() {
        for (seed, jitter_ms) in [(6, 60.0), (7, 40.0), (8, 200.0)] {
            let jittery = ScenarioConfig {
                latency_range_ms: (50.0, 50.0),
                jitter_ms,
                ..config(seed, MovementPattern::RandomWalk)
            };
            let report = PredictionScenario::new(jittery).unwrap().run().unwrap();
            let prediction = report.prediction.unwrap();
            assert_eq!(prediction.max_position_error, 0.0, "jitter {jitter_ms} ms");
            assert_eq!(prediction.rollback_count, 0);
            assert_eq!(prediction.desync_events, 0);
            assert_eq!(prediction.total_inputs, 3 * 119);
        }
    }

    #[test]
    fn longest_allowed_link_delay_runs_to_completion() {
        let slow = ScenarioConfig {
            duration_seconds: 0.25,
            num_entities: 2,
            latency_range_ms: (crate::config::MAX_LINK_DELAY_MS, crate::config::MAX_LINK_DELAY_MS),
            jitter_ms: crate::config::MAX_LINK_DELAY_MS,
            ..ScenarioConfig::deterministic(9)
        };
        let report = PredictionScenario::new(slow).unwrap().run().unwrap();
        let prediction = report.prediction.unwrap();
        assert_eq!(report.server.unwrap().processed_inputs, prediction.total_inputs);
        assert_eq!(prediction.desync_events, 0);
    }

    #[test]
    fn lossless_link_processes_every_input() {
        let observer = Arc::new(CollectingObserver::new());
        let report = PredictionScenario::with_observer(config(1, MovementPattern::Circular), observer.clone())
            .unwrap()
            .run()
            .unwrap();
        let prediction = report.prediction.unwrap();
        let server = report.server.unwrap();

        // 60 Hz for 2 s (the tick at exactly 2.0 is not generated), 3 clients.
        assert_eq!(prediction.total_inputs, 3 * 119);
        assert_eq!(server.processed_inputs, prediction.total_inputs);
        assert_eq!(server.duplicate_inputs, 0);
        assert_eq!(prediction.desync_events, 0);
        assert_eq!(report.network.dropped, 0);
        assert!(!observer.has_event(EventKind::Desync));
    }

    #[test]
    fn without_jitter_or_loss_predictions_are_confirmed() {
        let report = PredictionScenario::new(config(2, MovementPattern::Zigzag))
            .unwrap()
            .run()
            .unwrap();
        let prediction = report.prediction.unwrap();
        assert_eq!(prediction.rollback_count, 0);
        assert_eq!(prediction.prediction_accuracy, 1.0);
        assert!(prediction.max_position_error < 1e-9);
    }

    #[test]
    fn lost_inputs_force_rollbacks() {
        let lossy = ScenarioConfig {
            packet_loss_rate: 0.2,
            ..config(3, MovementPattern::Circular)
        };
        let report = PredictionScenario::new(lossy).unwrap().run().unwrap();
        let prediction = report.prediction.unwrap();
        assert!(report.network.dropped > 0);
        assert!(prediction.rollback_count > 0);
        assert!(prediction.prediction_accuracy < 1.0);
    }

    #[test]
    fn same_seed_same_report() {
        let run = || {
            PredictionScenario::new(ScenarioConfig {
                jitter_ms: 20.0,
                packet_loss_rate: 0.05,
                ..config(4, MovementPattern::RandomWalk)
            })
            .unwrap()
            .run()
            .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn server_config_is_validated() {
        let scenario = PredictionScenario::new(config(5, MovementPattern::Static)).unwrap();
        let bad = ServerConfig {
            max_speed: 0.0,
            ..ServerConfig::default()
        };
        assert!(scenario.with_server_config(bad).is_err());
    }
}
