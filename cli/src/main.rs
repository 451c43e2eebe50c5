//! CLI for Warden
//!
//! Commands:
//! - run: Drive a scenario of persistent kernels for a fixed duration
//! - config: Print the effective configuration as TOML
//! - check: Validate a configuration file

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden - persistent GPU kernel scheduler", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scheduling scenario
    Run(commands::run::RunArgs),

    /// Print the effective configuration
    Config(commands::config::ConfigArgs),

    /// Validate a configuration file
    Check(commands::check::CheckArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_tracing(args.verbose);
            commands::run::run(args).await
        }
        Commands::Config(args) => commands::config::run(args),
        Commands::Check(args) => commands::check::run(args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
