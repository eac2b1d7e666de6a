//! CLI utility for running ORCA crowd scenarios

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use orca_crowd::{CorridorStatus, Crowd, CrowdConfig, CrowdMetrics, TickReport};

mod scenario;

use scenario::Scenario;

/// A CLI utility for running and evaluating crowd simulations
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario and print a summary
    Run {
        /// Scenario to run
        #[clap(long, value_enum, default_value = "circle")]
        scenario: ScenarioKind,

        /// Number of agents for the built-in scenarios
        #[clap(long, default_value = "32")]
        agents: usize,

        /// Number of ticks to run
        #[clap(long, default_value = "600")]
        ticks: u64,

        /// Tick length in seconds
        #[clap(long, default_value = "0.1")]
        dt: f32,

        /// Configuration file (JSON)
        #[clap(long, value_parser)]
        config: Option<PathBuf>,

        /// Scenario file (JSON), used with `--scenario file`
        #[clap(long, value_parser)]
        scenario_file: Option<PathBuf>,

        /// Write the run metrics and the last tick report here (JSON)
        #[clap(long, value_parser)]
        output: Option<PathBuf>,

        /// Solve agents on the calling thread only
        #[clap(long)]
        sequential: bool,

        /// Stop as soon as every routed agent has arrived
        #[clap(long)]
        stop_on_arrival: bool,
    },

    /// Write the default configuration
    Config {
        /// Output configuration file
        #[clap(long, value_parser)]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ScenarioKind {
    HeadOn,
    Circle,
    Crossing,
    Dense,
    File,
}

/// Options of a scenario run
#[derive(Debug, Clone)]
struct RunOptions {
    ticks: u64,
    dt: f32,
    stop_on_arrival: bool,
}

/// Written by `run --output`
#[derive(Debug, Serialize)]
struct RunOutput<'a> {
    metrics: &'a CrowdMetrics,
    last_report: &'a TickReport,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Commands::Run {
            scenario,
            agents,
            ticks,
            dt,
            config,
            scenario_file,
            output,
            sequential,
            stop_on_arrival,
        } => {
            let mut config = match config {
                Some(path) => CrowdConfig::load_from_json(&path)
                    .with_context(|| format!("Failed to load config: {}", path.display()))?,
                None => CrowdConfig::default(),
            };
            if sequential {
                config.parallel = false;
            }

            let scenario = build_scenario(scenario, agents, scenario_file.as_deref())?;
            let options = RunOptions {
                ticks,
                dt,
                stop_on_arrival,
            };
            run(config, &scenario, &options, output.as_deref())
        }
        Commands::Config { output } => {
            CrowdConfig::default()
                .save_to_json(&output)
                .with_context(|| format!("Failed to write config: {}", output.display()))?;
            println!("Wrote default configuration to {}", output.display());
            Ok(())
        }
    }
}

fn build_scenario(kind: ScenarioKind, agents: usize, file: Option<&Path>) -> Result<Scenario> {
    Ok(match kind {
        ScenarioKind::HeadOn => Scenario::head_on(agents),
        ScenarioKind::Circle => Scenario::circle(agents),
        ScenarioKind::Crossing => Scenario::crossing(agents),
        ScenarioKind::Dense => Scenario::dense(agents),
        ScenarioKind::File => {
            let path = file.context("--scenario file needs --scenario-file")?;
            Scenario::load(path)?
        }
    })
}

fn all_arrived(crowd: &Crowd) -> bool {
    crowd
        .agents()
        .filter_map(|agent| agent.corridor_status())
        .all(|status| status != CorridorStatus::Following)
}

/// Runs a scenario and returns the finished crowd
fn simulate(config: CrowdConfig, scenario: &Scenario, options: &RunOptions) -> Result<Crowd> {
    let mut crowd = Crowd::new(config).context("Invalid configuration")?;
    let handles = scenario.apply(&mut crowd)?;
    log::info!(
        "Spawned {} agents and {} obstacles",
        handles.len(),
        crowd.obstacles().len()
    );

    for _ in 0..options.ticks {
        let next_tick = crowd.tick_count() + 1;
        crowd
            .tick(options.dt)
            .with_context(|| format!("Tick {} failed", next_tick))?;
        if options.stop_on_arrival && all_arrived(&crowd) {
            break;
        }
    }

    Ok(crowd)
}

fn run(config: CrowdConfig, scenario: &Scenario, options: &RunOptions, output: Option<&Path>) -> Result<()> {
    println!(
        "Running {} agents, {} obstacles for up to {} ticks of {}s...",
        scenario.agents.len(),
        scenario.obstacles.len(),
        options.ticks,
        options.dt
    );

    let start = std::time::Instant::now();
    let crowd = simulate(config, scenario, options)?;
    let elapsed = start.elapsed();

    print_summary(&crowd, elapsed);

    if let Some(path) = output {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        let report = RunOutput {
            metrics: crowd.metrics(),
            last_report: crowd.last_report(),
        };
        serde_json::to_writer_pretty(BufWriter::new(file), &report)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        println!("Saved metrics to {}", path.display());
    }

    Ok(())
}

fn per_tick(elapsed: Duration, ticks: u64) -> Duration {
    if ticks == 0 {
        return Duration::ZERO;
    }
    elapsed.div_f64(ticks as f64)
}

fn print_summary(crowd: &Crowd, elapsed: Duration) {
    let metrics = crowd.metrics();
    println!("Simulated {:.2}s in {} ticks", crowd.time(), crowd.tick_count());
    println!("Agents remaining: {}", crowd.agent_count());
    println!("Arrivals: {}", metrics.arrivals);
    match metrics.mean_time_to_goal() {
        Some(mean) => println!(
            "Time to goal: mean {:.2}s, max {:.2}s",
            mean, metrics.max_time_to_goal
        ),
        None => println!("Time to goal: no arrivals"),
    }
    println!("Distance walked: {:.2}", metrics.total_distance_walked);
    println!("Soft violations: {}", metrics.soft_violations);
    println!(
        "Collisions: {} strong, {} weak",
        metrics.strong_collisions, metrics.weak_collisions
    );
    if crowd.tick_count() > 0 {
        println!(
            "Wall time: {:.3?} total, {:.3?} per tick",
            elapsed,
            per_tick(elapsed, crowd.tick_count())
        );
    }
}
