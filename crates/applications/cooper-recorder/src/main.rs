//! Cooper - simulation recorder
//!
//! ## Usage
//!
//! ```bash
//! # Replay a recorded engine trace and write the snapshot
//! cooper replay trace.json --output session.json
//!
//! # Run the synthetic engine and export into SQLite
//! cooper simulate --hosts 4 --seed 7 --database cooper.db
//!
//! # Summarize a snapshot
//! cooper inspect session.json
//! ```
//!
//! Defaults come from `cooper.yaml` (or the file named by `COOPER_CONFIG`);
//! flags win over the file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cooper_recorder::{AppConfig, SyntheticConfig, Trace, output, synthetic, trace};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cooper: idempotent recording of host/VM/cloudlet simulations
#[derive(Parser)]
#[command(name = "cooper")]
#[command(about = "Record and export hierarchical simulation runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by the recording commands
#[derive(clap::Args)]
struct RecordArgs {
    /// Session name (overrides session_name from the config file)
    #[arg(long)]
    name: Option<String>,

    /// Do not record utilization samples
    #[arg(long)]
    no_metrics: bool,

    /// Write the snapshot JSON here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Also export the session into this SQLite database
    #[arg(long)]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON trace of ticks and lifecycle events
    Replay {
        /// Trace file
        trace: PathBuf,

        #[command(flatten)]
        record: RecordArgs,
    },

    /// Drive a session with the built-in synthetic engine
    Simulate {
        /// Number of hosts
        #[arg(long, default_value_t = 2)]
        hosts: usize,

        /// VMs placed on each host
        #[arg(long, default_value_t = 2)]
        vms_per_host: usize,

        /// Cloudlets submitted to each VM
        #[arg(long, default_value_t = 3)]
        cloudlets_per_vm: usize,

        /// Maximum number of engine steps
        #[arg(long, default_value_t = 100)]
        steps: usize,

        /// Simulated seconds per step
        #[arg(long, default_value_t = 1.0)]
        step_seconds: f64,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        #[command(flatten)]
        record: RecordArgs,
    },

    /// Print a summary of a snapshot file
    Inspect {
        /// Snapshot JSON written by replay or simulate
        snapshot: PathBuf,
    },
}

fn resolve_config(record: RecordArgs) -> anyhow::Result<AppConfig> {
    Ok(AppConfig::load()?
        .with_session_name(record.name)
        .with_no_metrics(record.no_metrics)
        .with_output_path(record.output)
        .with_database_path(record.database))
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cooper=info,cooper_core=info,cooper_recorder=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { trace: path, record } => {
            let config = resolve_config(record)?;
            let loaded = Trace::load(&path)?;
            info!("Replaying {} ({} steps)", path.display(), loaded.steps.len());

            let (snapshot, summary) = trace::replay(&loaded, &config.session_name, config.recorder())?;
            if !summary.issues.is_empty() {
                info!("{} entity issues during replay", summary.issues.len());
            }
            output::deliver(&snapshot, &config)?;
        }

        Commands::Simulate {
            hosts,
            vms_per_host,
            cloudlets_per_vm,
            steps,
            step_seconds,
            seed,
            record,
        } => {
            let config = resolve_config(record)?;
            let synthetic_config = SyntheticConfig {
                hosts,
                vms_per_host,
                cloudlets_per_vm,
                steps,
                step_seconds,
                seed,
            };

            let (snapshot, summary) =
                synthetic::run(synthetic_config, &config.session_name, config.recorder())?;
            info!(
                "Synthetic run: {} steps, {} events ({} unrouted)",
                summary.steps, summary.events, summary.unrouted_events
            );
            output::deliver(&snapshot, &config)?;
        }

        Commands::Inspect { snapshot } => {
            let loaded = output::load_snapshot(&snapshot)?;
            print!("{}", output::summarize(&loaded));
        }
    }

    Ok(())
}
