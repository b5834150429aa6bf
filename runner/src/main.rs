//! Command-line driver for rewindkit scenarios.
//!
//! # Usage
//!
//! ```bash
//! # One rewind scenario on a named network preset
//! cargo run -p rewind-runner -- lag --preset mobile-good --pattern zigzag
//!
//! # Prediction under explicit conditions, as JSON
//! cargo run -p rewind-runner -- --format json prediction --latency-min 80 --latency-max 80 --loss 0.02
//!
//! # Every client on its own task, sharing one rewind engine
//! cargo run -p rewind-runner -- concurrent --entities 8 --duration 5
//!
//! # The built-in batteries
//! cargo run -p rewind-runner -- suite all --duration 10
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`);
//! `--events` adds a per-kind event tally to stderr.
//! Reports go to stdout. The process exits non-zero if any report grades
//! below `--min-quality`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use rewindkit::config::ScenarioConfig;
use rewindkit::harness::concurrent::ConcurrentScenario;
use rewindkit::harness::lag_scenario::LagCompensationScenario;
use rewindkit::harness::prediction_scenario::PredictionScenario;
use rewindkit::harness::suite::{lag_compensation_suite, prediction_suite, run_suite, SuiteSummary};
use rewindkit::telemetry::{
    default_observer, CollectingObserver, CompositeObserver, EventKind, EventObserver,
};
use rewindkit::{MovementPattern, NetworkConditions, Quality, RewindError, ScenarioReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rewind-runner", about = "Measure lag compensation and client prediction under simulated latency")]
struct Opt {
    /// Output format.
    #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
    format: Format,

    /// Fail (exit code 2) if any report grades below this.
    #[arg(long, value_enum, global = true)]
    min_quality: Option<Grade>,

    /// Print a per-kind count of the events a single scenario reported.
    #[arg(long, global = true)]
    events: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum Grade {
    Poor,
    Good,
    Excellent,
}

impl From<Grade> for Quality {
    fn from(grade: Grade) -> Self {
        match grade {
            Grade::Poor => Quality::Poor,
            Grade::Good => Quality::Good,
            Grade::Excellent => Quality::Excellent,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Server-side rewind of shots against moving entities.
    Lag(ScenarioArgs),
    /// Client prediction and reconciliation against an authoritative server.
    Prediction(ScenarioArgs),
    /// One tokio task per client, all sharing one rewind engine.
    Concurrent(ScenarioArgs),
    /// A battery of scenarios from good to bad conditions.
    Suite {
        /// Which battery to run.
        #[arg(value_enum, default_value_t = SuiteKind::All)]
        which: SuiteKind,
        #[command(flatten)]
        scenario: ScenarioArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SuiteKind {
    Lag,
    Prediction,
    All,
}

/// Overrides applied on top of the defaults (or of `--config`).
#[derive(clap::Args)]
struct ScenarioArgs {
    /// JSON file with a full or partial scenario configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Simulated seconds during which events are generated.
    #[arg(long)]
    duration: Option<f64>,
    /// Number of entities / clients.
    #[arg(long)]
    entities: Option<usize>,
    /// Movement pattern (random-walk, circular, static, zigzag).
    #[arg(long)]
    pattern: Option<MovementPattern>,
    /// Named network preset (perfect, fiber, cable, mobile-good, mobile-poor,
    /// mobile-3g, satellite, congested-wifi, competitive).
    #[arg(long, conflicts_with_all = ["latency_min", "latency_max", "jitter", "loss"])]
    preset: Option<String>,
    /// Lowest one-way latency in milliseconds.
    #[arg(long)]
    latency_min: Option<f64>,
    /// Highest one-way latency in milliseconds.
    #[arg(long)]
    latency_max: Option<f64>,
    /// Jitter in milliseconds.
    #[arg(long)]
    jitter: Option<f64>,
    /// Packet loss probability in [0, 1].
    #[arg(long)]
    loss: Option<f64>,
    /// Shots per simulated second.
    #[arg(long)]
    fire_rate: Option<f64>,
    /// Maximum rewind in seconds.
    #[arg(long)]
    max_compensation: Option<f64>,
    /// Seed for every random decision.
    #[arg(long)]
    seed: Option<u64>,
}

impl ScenarioArgs {
    fn build(&self) -> Result<ScenarioConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => ScenarioConfig::default(),
        };
        if let Some(name) = &self.preset {
            let conditions = NetworkConditions::preset(name).ok_or_else(|| RewindError::InvalidConfig {
                info: format!("unknown network preset '{name}'"),
            })?;
            config = config.with_network(&conditions);
        }
        let (mut low, mut high) = config.latency_range_ms;
        if let Some(ms) = self.latency_min {
            low = ms;
            high = high.max(ms);
        }
        if let Some(ms) = self.latency_max {
            high = ms;
        }
        config.latency_range_ms = (low, high);

        macro_rules! override_field {
            ($($arg:ident => $field:ident),* $(,)?) => {
                $(if let Some(value) = self.$arg { config.$field = value; })*
            };
        }
        override_field!(
            duration => duration_seconds,
            entities => num_entities,
            pattern => movement_pattern,
            jitter => jitter_ms,
            loss => packet_loss_rate,
            fire_rate => shots_per_second,
            max_compensation => max_compensation_time_seconds,
            seed => seed,
        );
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn print_report(report: &ScenarioReport, format: Format) -> Result<(), RewindError> {
    match format {
        Format::Text => print!("{report}"),
        Format::Json => println!("{}", report.to_json_pretty()?),
    }
    Ok(())
}

fn print_summary(summary: &SuiteSummary, format: Format) -> Result<(), RewindError> {
    match format {
        Format::Text => {
            for (_, report) in &summary.results {
                println!("{report}");
            }
            print!("{summary}");
        }
        Format::Json => println!("{}", summary.to_json_pretty()?),
    }
    Ok(())
}

/// Logs through tracing and also keeps every event for the `--events` tally.
fn observers() -> (Arc<dyn EventObserver>, Arc<CollectingObserver>) {
    let collected = Arc::new(CollectingObserver::new());
    let tally: Arc<dyn EventObserver> = collected.clone();
    let composite = CompositeObserver::from_observers(vec![default_observer(), tally]);
    (Arc::new(composite), collected)
}

fn print_event_counts(collected: &CollectingObserver) {
    let kinds = [
        EventKind::OutOfRangeTimestamp,
        EventKind::InvalidCompensationWindow,
        EventKind::InvalidHit,
        EventKind::Rollback,
        EventKind::Desync,
        EventKind::DuplicateInput,
        EventKind::OutOfOrderSnapshot,
        EventKind::Invariant,
    ];
    eprintln!("events ({} total):", collected.len());
    for kind in kinds {
        eprintln!("  {:<28} {}", kind.as_str(), collected.count_of_kind(kind));
    }
}

async fn run(opt: &Opt) -> Result<Vec<Quality>, Box<dyn std::error::Error>> {
    let (observer, collected) = observers();
    let grades = match &opt.command {
        Command::Lag(args) => {
            let report = LagCompensationScenario::with_observer(args.build()?, observer)?.run()?;
            print_report(&report, opt.format)?;
            vec![report.quality]
        }
        Command::Prediction(args) => {
            let report = PredictionScenario::with_observer(args.build()?, observer)?.run()?;
            print_report(&report, opt.format)?;
            vec![report.quality]
        }
        Command::Concurrent(args) => {
            let report = ConcurrentScenario::with_observer(args.build()?, observer)?
                .run()
                .await?;
            print_report(&report, opt.format)?;
            vec![report.quality]
        }
        Command::Suite { which, scenario } => {
            let base = scenario.build()?;
            let mut entries = Vec::new();
            if matches!(which, SuiteKind::Lag | SuiteKind::All) {
                entries.extend(lag_compensation_suite(&base));
            }
            if matches!(which, SuiteKind::Prediction | SuiteKind::All) {
                entries.extend(prediction_suite(&base));
            }
            let summary = run_suite(&entries)?;
            print_summary(&summary, opt.format)?;
            summary.results.iter().map(|(_, report)| report.quality).collect()
        }
    };
    if opt.events {
        print_event_counts(&collected);
    }
    Ok(grades)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let opt = Opt::parse();

    match run(&opt).await {
        Ok(grades) => {
            let floor = opt.min_quality.map(Quality::from);
            match floor {
                Some(floor) if grades.iter().any(|grade| *grade < floor) => {
                    eprintln!("at least one scenario graded below {floor}");
                    ExitCode::from(2)
                }
                _ => ExitCode::SUCCESS,
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "scenario failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
