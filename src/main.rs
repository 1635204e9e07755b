//! metaplan-eval: evaluate LLM agents on ALFWorld and ScienceWorld with
//! optional workflow hints.
//!
//! - `run`     -- evaluate one split/shard and write one record per task
//! - `summary` -- recompute success rate and average reward from a record
//!   directory

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use metaplan_eval::agent::LlmAgent;
use metaplan_eval::config::{EnvKind, EvalConfig, IncorporationMode};
use metaplan_eval::env::{
    AlfWorldServer, HouseholdBatch, HouseholdReset, HouseholdSimulator, MockAlfWorld,
    MockSciWorld, SciWorldServer, ScienceReset, ScienceSimulator, ScienceStep, SimulatorError,
};
use metaplan_eval::episode::EpisodeStore;
use metaplan_eval::eval::{self, EvalRunner, RunOptions, Simulator};
use metaplan_eval::task::{Partition, Split};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Evaluate LLM agents on interactive text environments.
#[derive(Parser)]
#[command(name = "metaplan-eval", version, about)]
struct Cli {
    /// Path to a JSON experiment file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level and stop after the first few tasks.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one split (or shard of it).
    Run(RunArgs),

    /// Recompute metrics from a directory of episode records.
    Summary {
        /// Directory holding `<task_id>.json` records.
        dir: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Environment family (overrides the experiment file).
    #[arg(long)]
    env: Option<EnvKind>,

    #[arg(long)]
    model_name: Option<String>,

    #[arg(long)]
    api_base: Option<String>,

    #[arg(long)]
    api_key: Option<String>,

    /// Workflow hint file (newline-delimited JSON).
    #[arg(long)]
    metaplan_path: Option<PathBuf>,

    /// Where workflow hints are spliced in.
    #[arg(long)]
    incorporation_type: Option<IncorporationMode>,

    #[arg(long, default_value = "test")]
    split: Split,

    /// Number of shards the split is divided into.
    #[arg(long, default_value_t = 1)]
    part_num: usize,

    /// Shard evaluated by this process (required when `part_num > 1`).
    #[arg(long)]
    part_idx: Option<usize>,

    /// Record directory (defaults to `outputs/<split>/<model>/<exp>/<metaplan type>`).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Experiment name used in the default output directory.
    #[arg(long)]
    exp_name: Option<String>,

    /// Label of the hint source used in the default output directory.
    #[arg(long, default_value = "none")]
    metaplan_type: String,

    /// Re-run tasks that already have a record.
    #[arg(long = "override")]
    override_existing: bool,

    /// Use scripted simulators instead of connecting to simulator servers.
    #[arg(long)]
    mock: bool,
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run(args) => cmd_run(cli.config.as_deref(), cli.debug, args).await,
        Commands::Summary { dir } => cmd_summary(&dir),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, debug: bool, args: RunArgs) -> Result<()> {
    let mut config = match config_path {
        Some(path) => EvalConfig::load_from_file(path)?,
        None => EvalConfig::default(),
    };

    if let Some(env) = args.env {
        config.env.env_class = env;
    }
    if let Some(model_name) = args.model_name {
        config.agent.model_name = model_name;
    }
    if let Some(api_base) = args.api_base {
        config.agent.api_base = api_base;
    }
    if let Some(api_key) = args.api_key {
        config.agent.api_key = api_key;
    }
    if let Some(path) = args.metaplan_path {
        config.task.workflow_path = Some(path);
    }
    if let Some(mode) = args.incorporation_type {
        config.incorporation = mode;
    }

    // Fill in the API key from the environment when not set anywhere else.
    if config.agent.api_key.is_empty() {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.agent.api_key = key;
        }
    }

    let exp_name = args.exp_name.unwrap_or_else(|| {
        config_path
            .and_then(|p| p.file_stem())
            .and_then(|s| s.to_str())
            .unwrap_or(config.env.env_class.as_str())
            .to_string()
    });
    let output_dir = args.output_dir.unwrap_or_else(|| {
        eval::default_output_dir(&config, args.split, &exp_name, &args.metaplan_type)
    });

    let options = RunOptions {
        split: args.split,
        partition: Partition {
            part_num: args.part_num,
            part_idx: args.part_idx,
        },
        override_existing: args.override_existing,
        debug,
    };

    let agent = LlmAgent::new(&config.agent)?;
    let mut sim = create_simulator(&config, args.mock);
    let store = EpisodeStore::open(&output_dir)?;
    let runner = EvalRunner::new(config, options, store)?;

    let report = runner.run_and_close(&mut sim, &agent).await?;

    tracing::info!(
        ran = report.ran,
        skipped = report.skipped,
        failed = report.failed,
        output = %output_dir.display(),
        "Output saved"
    );
    Ok(())
}

fn cmd_summary(dir: &Path) -> Result<()> {
    let metrics = eval::summarize(dir)?;

    println!("Records: {}", dir.display());
    println!("  Tasks:        {}", metrics.total);
    println!("  Successes:    {}", metrics.successes);
    println!("  Success rate: {:.4}", metrics.success_rate);
    match metrics.average_reward {
        Some(avg) => println!("  Avg reward:   {avg:.4}"),
        None => println!("  Avg reward:   n/a"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Simulator construction
// ---------------------------------------------------------------------------

/// Either the live household bridge or its scripted mock.
enum HouseholdBackend {
    Server(AlfWorldServer),
    Mock(MockAlfWorld),
}

impl HouseholdSimulator for HouseholdBackend {
    async fn reset(&mut self, game_index: usize) -> Result<HouseholdReset> {
        match self {
            Self::Server(s) => s.reset(game_index).await,
            Self::Mock(s) => s.reset(game_index).await,
        }
    }

    async fn step(&mut self, actions: &[String]) -> Result<HouseholdBatch> {
        match self {
            Self::Server(s) => s.step(actions).await,
            Self::Mock(s) => s.step(actions).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Server(s) => s.close().await,
            Self::Mock(s) => s.close().await,
        }
    }
}

/// Either the live science bridge or its scripted mock.
enum ScienceBackend {
    Server(SciWorldServer),
    Mock(MockSciWorld),
}

impl ScienceSimulator for ScienceBackend {
    async fn load(&mut self, task_name: &str, variation: usize, simplification: &str) -> Result<()> {
        match self {
            Self::Server(s) => s.load(task_name, variation, simplification).await,
            Self::Mock(s) => s.load(task_name, variation, simplification).await,
        }
    }

    async fn reset(&mut self) -> Result<ScienceReset> {
        match self {
            Self::Server(s) => s.reset().await,
            Self::Mock(s) => s.reset().await,
        }
    }

    async fn step(&mut self, action: &str) -> Result<ScienceStep, SimulatorError> {
        match self {
            Self::Server(s) => s.step(action).await,
            Self::Mock(s) => s.step(action).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Server(s) => s.close().await,
            Self::Mock(s) => s.close().await,
        }
    }
}

fn create_simulator(config: &EvalConfig, mock: bool) -> Simulator<HouseholdBackend, ScienceBackend> {
    let url = &config.env.server_url;
    match (config.env.env_class, mock) {
        (EnvKind::Alfworld, true) => {
            tracing::info!("Using mock ALFWorld simulator");
            Simulator::Household(HouseholdBackend::Mock(MockAlfWorld::new()))
        }
        (EnvKind::Sciworld, true) => {
            tracing::info!("Using mock ScienceWorld simulator");
            Simulator::Science(ScienceBackend::Mock(MockSciWorld::new()))
        }
        (EnvKind::Alfworld, false) => {
            tracing::info!(%url, "Using live ALFWorld simulator");
            Simulator::Household(HouseholdBackend::Server(AlfWorldServer::new(url)))
        }
        (EnvKind::Sciworld, false) => {
            tracing::info!(%url, "Using live ScienceWorld simulator");
            Simulator::Science(ScienceBackend::Server(SciWorldServer::new(url)))
        }
    }
}
