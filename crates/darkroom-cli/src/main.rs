//! darkroom - compute layer probe and benchmark CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "darkroom")]
#[command(author, version, about = "Photo pipeline compute layer tools")]
#[command(long_about = "
Inspect the compute accelerator and exercise the edit pipeline.

Examples:
  darkroom info                          # Show accelerator capabilities
  darkroom info --json
  darkroom curve 0,0 0.25,0.2 0.75,0.8 1,1
  darkroom bench -W 3840 -H 2160 -n 20
  darkroom bench --recipe edit.yaml --cpu
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Number of CPU threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the accelerator and print its capabilities
    #[command(visible_alias = "i")]
    Info(InfoArgs),

    /// Print the 256-entry lookup table of a tone curve
    Curve(CurveArgs),

    /// Run an edit recipe on a synthetic image and time each step
    #[command(visible_alias = "b")]
    Bench(BenchArgs),
}

#[derive(Args)]
struct InfoArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Skip the accelerator
    #[arg(long)]
    cpu: bool,
}

#[derive(Args)]
struct CurveArgs {
    /// Control points as x,y pairs in [0, 1]
    #[arg(required = true, allow_hyphen_values = true)]
    points: Vec<String>,

    /// Output as JSON array
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct BenchArgs {
    /// Image width in pixels
    #[arg(short = 'W', long, default_value = "1920")]
    width: u32,

    /// Image height in pixels
    #[arg(short = 'H', long, default_value = "1080")]
    height: u32,

    /// YAML edit recipe (default: a representative edit)
    #[arg(short, long)]
    recipe: Option<PathBuf>,

    /// Iterations per step
    #[arg(short = 'n', long, default_value = "10")]
    iterations: u32,

    /// Skip the accelerator
    #[arg(long)]
    cpu: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::Info(args) => commands::info::run(args, cli.verbose),
        Commands::Curve(args) => commands::curve::run(args),
        Commands::Bench(args) => commands::bench::run(args, cli.verbose),
    }
}
