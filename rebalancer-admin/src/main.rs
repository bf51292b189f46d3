mod cli;
mod core;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "rebalancer-admin")]
#[command(
    about = "Rebalance queue masters across the nodes of a mirrored broker cluster",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Spread queue masters round-robin over the running nodes
    #[command(display_order = 1)]
    Rebalance(cli::rebalance::Rebalance),

    /// Show master placement against the round-robin targets
    #[command(display_order = 2)]
    Balance(cli::balance::Balance),

    /// List running nodes and their health
    #[command(display_order = 3)]
    Nodes(cli::nodes::Nodes),

    /// Clear temporary policies left by interrupted runs
    #[command(display_order = 4)]
    Cleanup(cli::cleanup::Cleanup),
}

#[tokio::main]
async fn main() {
    // Initialize tracing/logging, stdout is kept for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help and version are not errors
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = run(cli).await {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Rebalance(cmd) => cli::rebalance::handle(cmd).await,
        Commands::Balance(cmd) => cli::balance::handle(cmd).await,
        Commands::Nodes(cmd) => cli::nodes::handle(cmd).await,
        Commands::Cleanup(cmd) => cli::cleanup::handle(cmd).await,
    }
}
