//! Foreman: window-based agent scheduler
//!
//! Subcommands:
//! - `daemon`: run the scheduler against a config file
//! - `check-config`: validate a config file and exit

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod daemon;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(about = "Window-based agent scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon
    Daemon {
        /// Path to the JSON config file
        #[arg(long, env = "FOREMAN_CONFIG")]
        config: PathBuf,
    },

    /// Validate a config file and exit
    CheckConfig {
        /// Path to the JSON config file
        #[arg(long, env = "FOREMAN_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "foreman=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { config } => daemon::run(&config).await,

        Commands::CheckConfig { config } => {
            let parsed = config::Config::load(&config).await?;
            let schedules: usize = parsed.projects.iter().map(|p| p.schedules.len()).sum();
            println!(
                "{}: {} project(s), {} schedule(s), ok",
                config.display(),
                parsed.projects.len(),
                schedules
            );
            Ok(())
        }
    }
}
