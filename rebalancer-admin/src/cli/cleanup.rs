use anyhow::Result;
use clap::Args;
use rebalancer_core::Rebalancer;

use crate::core::{connect, ConnectionArgs, RunArgs};

#[derive(Debug, Args)]
#[command(after_help = "Examples:
  rebalancer-admin cleanup --dry-run
  rebalancer-admin cleanup --vhost production

Removes temporary '<queue>-ha-temp' policies left behind by an interrupted
run or a migration whose cleanup failed.

Env:
  RABBITMQ_MGMT_ENDPOINT (default http://127.0.0.1:15672)")]
pub struct Cleanup {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(flatten)]
    run: RunArgs,
    #[arg(
        long,
        default_value_t = false,
        help = "Dry run: only list the leftover policies"
    )]
    dry_run: bool,
}

pub async fn handle(args: Cleanup) -> Result<()> {
    let config = args.run.load()?;
    let vhost = config.vhost.clone();
    let client = connect(&args.connection)?;
    let policies = Rebalancer::new(client, config).cleanup(args.dry_run).await?;

    if policies.is_empty() {
        println!("No leftover temporary policies in vhost {vhost}");
        return Ok(());
    }

    let verb = if args.dry_run { "Would clear" } else { "Cleared" };
    for name in &policies {
        println!("{verb}: {name}");
    }
    Ok(())
}
