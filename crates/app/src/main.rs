mod scenario;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::scenario::Scenario;

fn main() -> overlay_lifecycle_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { scenario, step_ms } => run_simulate(&scenario, step_ms),
        Commands::Validate { scenario } => run_validate(&scenario),
    }
}

fn run_simulate(path: &PathBuf, step_ms: u64) -> overlay_lifecycle_core::Result<()> {
    tracing::info!(?path, step_ms, "simulating scenario");

    let scenario = Scenario::load(path)?;
    let summary = scenario::simulate(&scenario, step_ms)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_validate(path: &PathBuf) -> overlay_lifecycle_core::Result<()> {
    let scenario = Scenario::load(path)?;
    scenario.validate()?;
    tracing::info!(?path, cues = scenario.cues.len(), "scenario is valid");
    println!("ok: {} cues", scenario.cues.len());
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Dry-run simulator for timed overlay lifecycles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a scenario on a virtual clock and print a JSON summary.
    Simulate {
        /// Path to the scenario file.
        scenario: PathBuf,
        /// Playback step between timeline ticks, in milliseconds.
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        step_ms: u64,
    },
    /// Parse a scenario and validate its configuration and every cue.
    Validate {
        /// Path to the scenario file.
        scenario: PathBuf,
    },
}
