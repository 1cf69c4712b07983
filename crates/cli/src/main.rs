use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{PositionsArgs, ReconcileArgs, RecoverArgs, RunArgs};
use sportsarb_core::{AppConfig, ConfigLoader};

#[derive(Parser)]
#[command(name = "sportsarb")]
#[command(about = "Hedged Polymarket/Kalshi arbitrage executor for sports markets", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "config/Config.toml")]
    config: String,

    /// Config profile layered over config/Config.toml (config/Config.{profile}.toml)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover interrupted executions, then run the engine over an opportunity feed
    Run(RunArgs),
    /// Settle open trades and verify ledger P&L against venue fills
    Reconcile(ReconcileArgs),
    /// Show open exposure per game and team
    Positions(PositionsArgs),
    /// Resolve interrupted executions from venue state
    Recover(RecoverArgs),
    /// Rewrite the ledger keeping only the latest version of each trade
    Compact,
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    match &cli.profile {
        Some(profile) => ConfigLoader::load_with_profile(profile),
        None => ConfigLoader::load_from(&cli.config),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run(args) => commands::run_executor(config, args).await?,
        Commands::Reconcile(args) => commands::run_reconcile(config, args).await?,
        Commands::Positions(args) => commands::run_positions(&config, &args)?,
        Commands::Recover(args) => commands::run_recover(config, args).await?,
        Commands::Compact => commands::run_compact(&config)?,
    }

    Ok(())
}
