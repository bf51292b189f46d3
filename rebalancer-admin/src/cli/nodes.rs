use anyhow::Result;
use clap::Args;
use rebalancer_core::{RebalanceConfig, Rebalancer};

use crate::core::{connect, ConnectionArgs};

#[derive(Debug, Args)]
#[command(after_help = "Examples:
  rebalancer-admin nodes
  rebalancer-admin nodes --output json

Env:
  RABBITMQ_MGMT_ENDPOINT (default http://127.0.0.1:15672)")]
pub struct Nodes {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[arg(long, value_parser = ["json"], help = "Output format: json (default: table)")]
    output: Option<String>,
}

pub async fn handle(args: Nodes) -> Result<()> {
    let client = connect(&args.connection)?;
    let statuses = Rebalancer::new(client, RebalanceConfig::default())
        .node_health()
        .await?;

    if matches!(args.output.as_deref(), Some("json")) {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("{:<30} {:<10} {}", "NODE", "STATUS", "REASON");
    for status in &statuses {
        let state = if status.healthy { "healthy" } else { "unhealthy" };
        println!(
            "{:<30} {:<10} {}",
            status.node,
            state,
            status.reason.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
