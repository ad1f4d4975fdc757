use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flowsynth::config::GeneratorConfig;
use flowsynth::FlowSynth;

#[derive(Parser)]
#[command(name = "flowsynth")]
#[command(author, version, about = "Multi-view DDoS flow dataset generator")]
struct Cli {
    /// Directory containing the noise dataset files `inbound` and `outbound`
    #[arg(long)]
    dataset: PathBuf,

    /// Topology definition (TOML)
    #[arg(long)]
    topology: PathBuf,

    /// Output directory for per-node flow files (must not exist)
    #[arg(long)]
    outdir: PathBuf,

    /// Path to generator configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the reproducibility seed
    #[arg(long)]
    seed: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let mut config = match &cli.config {
        Some(path) => GeneratorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GeneratorConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    let generator = FlowSynth::new(config);
    if let Err(e) = generator.run(&cli.dataset, &cli.topology, &cli.outdir) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
