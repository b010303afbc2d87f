//! LOCKSTEP Node Binary

use clap::{Parser, Subcommand};
use lockstep_core::NodeConfig;
use lockstep_node::Simulation;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lockstep-node")]
#[command(about = "LOCKSTEP - Tendermint-style BFT consensus replicas")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a local multi-validator simulation
    Simulate {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of validators
        #[arg(long)]
        validators: Option<usize>,

        /// Number of heights to decide
        #[arg(long)]
        heights: Option<u64>,

        /// Phrase the validator keys are derived from
        #[arg(long)]
        seed: Option<String>,
    },

    /// Write the default configuration
    Config {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            validators,
            heights,
            seed,
        } => {
            let mut config = match config {
                Some(path) => NodeConfig::from_json(&std::fs::read_to_string(&path)?)?,
                None => NodeConfig::default(),
            };
            if let Some(validators) = validators {
                config = config.with_validators(validators);
            }
            if let Some(heights) = heights {
                config = config.with_heights(heights)?;
            }
            if let Some(seed) = seed {
                config.seed_phrase = seed;
            }
            init_logging(&config.log_level)?;

            info!("Starting {} simulation...", config.name);
            let report = Simulation::new(config)?.run().await?;

            for (index, decided) in report.decisions.iter().enumerate() {
                let hashes: Vec<String> = decided.iter().map(ToString::to_string).collect();
                println!("replica {}: {}", index, hashes.join(" "));
            }

            if !report.agreed() {
                anyhow::bail!("replicas decided conflicting blocks");
            }
            if !report.completed {
                warn!("only {} heights decided by every replica", report.common_heights());
            }
            println!("{} heights decided, all replicas agree", report.common_heights());
        }

        Commands::Config { output } => {
            let json = NodeConfig::default().to_json()?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!("Configuration saved to: {}", path.display());
                }
                None => {
                    println!("{}", json);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}
