mod scenario;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kairos_core::{Pipeline, PipelineConfig, TurnOutcome, export_outcome_json};
use kairos_store::{SharedPhraseStore, load_config, load_guidance, to_toml};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::Serialize;

use crate::scenario::Scenario;

#[derive(Parser)]
#[command(name = "kairos", about = "Felt-convergence engine CLI")]
struct Cli {
    /// Pipeline config (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Phrase library (TOML)
    #[arg(long, global = true)]
    phrases: Option<PathBuf>,

    /// Learned guidance (JSON)
    #[arg(long, global = true)]
    guidance: Option<PathBuf>,

    /// Seed for reproducible sampling
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario and print the ranked candidates
    Run {
        /// Scenario file (JSON)
        scenario: PathBuf,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run scenarios concurrently; one JSON line each, in input order
    Batch {
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,
    },

    /// Print the effective pipeline configuration as TOML
    Config,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Run { scenario, json } => cmd_run(&cli, scenario, *json),
        Commands::Batch { scenarios } => cmd_batch(&cli, scenarios).await,
        Commands::Config => cmd_config(&cli),
    }
}

fn load_pipeline_config(cli: &Cli) -> Result<PipelineConfig> {
    match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn build_pipeline(cli: &Cli) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new(load_pipeline_config(cli)?);
    if let Some(path) = &cli.phrases {
        let store = SharedPhraseStore::open(path)
            .with_context(|| format!("failed to load phrases {}", path.display()))?;
        pipeline = pipeline.with_phrases(Arc::new(store));
    }
    if let Some(path) = &cli.guidance {
        let guidance = load_guidance(path)
            .with_context(|| format!("failed to load guidance {}", path.display()))?;
        pipeline = pipeline.with_guidance(guidance);
    }
    Ok(pipeline)
}

/// Seeded runs offset the seed per scenario so batch lines stay reproducible.
fn make_rng(seed: Option<u64>, offset: u64) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(offset)),
        None => SmallRng::from_os_rng(),
    }
}

fn run_scenario(
    pipeline: &Pipeline,
    scenario: &Scenario,
    rng: &mut SmallRng,
) -> Result<TurnOutcome> {
    pipeline
        .process_turn(&scenario.turn, &scenario.sensors(), rng)
        .context("turn failed")
}

fn cmd_run(cli: &Cli, path: &Path, json: bool) -> Result<()> {
    let pipeline = build_pipeline(cli)?;
    let scenario = Scenario::load(path)?;
    let mut rng = make_rng(cli.seed, 0);
    let outcome = run_scenario(&pipeline, &scenario, &mut rng)?;

    if json {
        println!(
            "{}",
            export_outcome_json(&outcome).context("failed to serialize outcome")?
        );
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &TurnOutcome) {
    println!("occasion:     {}", outcome.occasion_id);
    match outcome.kairos_cycle {
        Some(cycle) => println!("cycles:       {} (kairos at {cycle})", outcome.cycles.len()),
        None => println!("cycles:       {} (no kairos)", outcome.cycles.len()),
    }
    println!("energy:       {:.3}", outcome.energy);
    println!("satisfaction: {:.3}", outcome.satisfaction);
    if outcome.nexuses.is_empty() {
        println!("nexuses:      (none)");
    } else {
        let nexuses: Vec<String> = outcome
            .nexuses
            .iter()
            .map(|n| {
                format!(
                    "{}({}, {:.2})",
                    n.atom,
                    n.participant_count(),
                    n.emission_readiness
                )
            })
            .collect();
        println!("nexuses:      {}", nexuses.join(" "));
    }
    for (i, candidate) in outcome.candidates.iter().enumerate() {
        println!(
            "{}. [{} {:.2}] {}",
            i + 1,
            candidate.strategy,
            candidate.confidence,
            candidate.text
        );
    }
}

#[derive(Serialize)]
struct BatchLine<'a> {
    scenario: String,
    outcome: &'a TurnOutcome,
}

async fn cmd_batch(cli: &Cli, paths: &[PathBuf]) -> Result<()> {
    let pipeline = Arc::new(build_pipeline(cli)?);

    let mut handles = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let scenario = Scenario::load(path)?;
        let pipeline = Arc::clone(&pipeline);
        let seed = cli.seed;
        handles.push(tokio::task::spawn_blocking(move || {
            let mut rng = make_rng(seed, i as u64);
            run_scenario(&pipeline, &scenario, &mut rng)
        }));
    }

    for (path, handle) in paths.iter().zip(handles) {
        let outcome = handle
            .await
            .context("scenario worker panicked")?
            .with_context(|| format!("scenario {} failed", path.display()))?;
        let line = serde_json::to_string(&BatchLine {
            scenario: path.display().to_string(),
            outcome: &outcome,
        })
        .context("failed to serialize outcome")?;
        println!("{line}");
    }
    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config = load_pipeline_config(cli)?;
    print!("{}", to_toml(&config).context("failed to encode config")?);
    Ok(())
}
