use anyhow::Result;
use clap::Args;
use rebalancer_core::{QueueAction, RebalanceReport, Rebalancer};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::core::{connect, ConnectionArgs, RunArgs};

#[derive(Debug, Args)]
#[command(after_help = "Examples:
  rebalancer-admin rebalance
  rebalancer-admin rebalance --dry-run
  rebalancer-admin rebalance --vhost production --filter 'orders-.*'
  rebalancer-admin rebalance --config rebalance.yaml --max-attempts 60 --output json

Workflow:
  1. Check current placement: rebalancer-admin balance
  2. Preview moves:           rebalancer-admin rebalance --dry-run
  3. Execute rebalancing:     rebalancer-admin rebalance
  4. Verify results:          rebalancer-admin balance

Queues are migrated one at a time. The run stops at the first unhealthy node
or failed migration; queues already moved keep their new master.

Env:
  RABBITMQ_MGMT_ENDPOINT (default http://127.0.0.1:15672)
  RABBITMQ_MGMT_USER / RABBITMQ_MGMT_PASSWORD (default guest/guest)")]
pub struct Rebalance {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(flatten)]
    run: RunArgs,
    #[arg(
        long,
        default_value_t = false,
        help = "Dry run: show planned moves without applying any policy"
    )]
    dry_run: bool,
    #[arg(long, help = "Delay between master lookups in milliseconds")]
    poll_interval_ms: Option<u64>,
    #[arg(long, help = "Master lookups before a migration times out")]
    max_attempts: Option<u32>,
    #[arg(long, help = "Per-queue convergence deadline in seconds")]
    timeout_seconds: Option<u64>,
    #[arg(long, value_parser = ["json"], help = "Output format: json (default: table)")]
    output: Option<String>,
}

pub async fn handle(args: Rebalance) -> Result<()> {
    let mut config = args.run.load()?;
    if let Some(interval) = args.poll_interval_ms {
        config.convergence.poll_interval_ms = interval;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.convergence.max_attempts = Some(max_attempts);
    }
    if let Some(timeout) = args.timeout_seconds {
        config.convergence.timeout_seconds = Some(timeout);
    }

    let client = connect(&args.connection)?;
    let cancel = CancellationToken::new();
    let rebalancer = Rebalancer::new(client, config).with_cancellation(cancel.clone());

    let report = if args.dry_run {
        rebalancer.plan().await?
    } else {
        tokio::spawn(watch_interrupts(cancel.clone()));
        rebalancer.run().await?
    };

    if matches!(args.output.as_deref(), Some("json")) {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    /// Stop after the current step, still clearing the temporary policy
    Cancel,
    ForceExit,
}

fn interrupt_action(received: u32) -> InterruptAction {
    if received <= 1 {
        InterruptAction::Cancel
    } else {
        InterruptAction::ForceExit
    }
}

// ctrl_c() replaces the default SIGINT handler, so a second interrupt exits here
async fn watch_interrupts(cancel: CancellationToken) {
    let mut received = 0;
    while tokio::signal::ctrl_c().await.is_ok() {
        received += 1;
        match interrupt_action(received) {
            InterruptAction::Cancel => {
                warn!(
                    "interrupt received, stopping after the current step; \
                     press Ctrl-C again to force exit"
                );
                cancel.cancel();
            }
            InterruptAction::ForceExit => {
                error!("second interrupt received, exiting without cleanup");
                std::process::exit(130);
            }
        }
    }
}

fn print_report(report: &RebalanceReport) {
    if report.queues.is_empty() {
        println!("No queues matched in vhost {}", report.vhost);
        return;
    }

    println!(
        "{:<6} {:<40} {:<25} {:<25} {:<12}",
        "POS", "QUEUE", "FROM", "TARGET", "ACTION"
    );
    for entry in &report.queues {
        let from = entry
            .from
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        let action = match &entry.action {
            QueueAction::Skipped => "skipped".to_string(),
            QueueAction::Planned => "planned".to_string(),
            QueueAction::Migrated { attempts, elapsed_ms } => {
                format!("migrated ({attempts} polls, {elapsed_ms} ms)")
            }
        };
        println!(
            "{:<6} {:<40} {:<25} {:<25} {:<12}",
            entry.position, entry.queue, from, entry.target, action
        );
    }

    println!();
    if report.dry_run {
        println!(
            "Dry run: {} queue(s) would move, {} already on target",
            report.planned(),
            report.skipped()
        );
    } else {
        println!(
            "Migrated {} queue(s), {} already on target",
            report.migrated(),
            report.skipped()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_cancels_second_forces_exit() {
        assert_eq!(interrupt_action(1), InterruptAction::Cancel);
        assert_eq!(interrupt_action(2), InterruptAction::ForceExit);
        assert_eq!(interrupt_action(5), InterruptAction::ForceExit);
    }
}
