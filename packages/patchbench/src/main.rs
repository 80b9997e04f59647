//! Patchbench CLI.
//!
//! Evaluate patch submissions against a benchmark dataset, with a
//! disk-backed cache for already-evaluated (instance, patch) pairs.

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

/// Cached batch evaluation of patch submissions.
#[derive(Parser)]
#[command(name = "patchbench", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an evaluation over requested submissions.
    Run(cmd::run::Config),

    /// Fold pending batch fragments and print a run's report.
    Report(cmd::report::Config),
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .pretty()
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::builder()
                        .with_default_directive(LevelFilter::INFO.into())
                        .from_env_lossy(),
                ),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(config) => cmd::run::main(config),
        Commands::Report(config) => cmd::report::main(config),
    }
}
