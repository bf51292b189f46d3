use anyhow::Result;
use clap::Args;
use rebalancer_core::Rebalancer;

use crate::core::{connect, ConnectionArgs, RunArgs};

#[derive(Debug, Args)]
#[command(after_help = "Examples:
  rebalancer-admin balance
  rebalancer-admin balance --vhost production --output json

Read-only: compares every queue master with its round-robin target.

Env:
  RABBITMQ_MGMT_ENDPOINT (default http://127.0.0.1:15672)")]
pub struct Balance {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(flatten)]
    run: RunArgs,
    #[arg(long, value_parser = ["json"], help = "Output format: json (default: table)")]
    output: Option<String>,
}

pub async fn handle(args: Balance) -> Result<()> {
    let config = args.run.load()?;
    let client = connect(&args.connection)?;
    let summary = Rebalancer::new(client, config).balance().await?;

    if matches!(args.output.as_deref(), Some("json")) {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{:<30} {:<10} {:<10}", "NODE", "MASTERS", "TARGET");
    for node in &summary.nodes {
        println!(
            "{:<30} {:<10} {:<10}",
            node.node, node.current_masters, node.target_masters
        );
    }
    println!();
    println!("Queues:     {}", summary.total_queues);
    println!("Off target: {}", summary.off_target);
    if summary.unplaced > 0 {
        println!("Unplaced:   {} (master missing or not running)", summary.unplaced);
    }
    if summary.is_balanced() {
        println!("Status:     balanced");
    } else {
        println!("Status:     rebalancing recommended");
    }
    Ok(())
}
