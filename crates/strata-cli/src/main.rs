//! `strata` -- CLI binary for the strata telemetry collector.
//!
//! Provides the following subcommands:
//!
//! - `strata run` -- Build the configured pipeline and push newline-delimited
//!   JSON records through it.
//! - `strata check` -- Validate a configuration by building (and tearing
//!   down) its pipeline.
//! - `strata processors` -- List the registered processors.

use clap::{Parser, Subcommand};

mod commands;

/// strata telemetry collector CLI.
#[derive(Parser)]
#[command(name = "strata", about = "strata telemetry collector CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run records through the configured pipeline.
    Run(commands::run::RunArgs),

    /// Validate a configuration file.
    Check(commands::check::CheckArgs),

    /// List registered processors.
    Processors,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Check(args) => commands::check::run(args).await?,
        Commands::Processors => commands::processors::run()?,
    }

    Ok(())
}
