use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::assignment::{BalanceSummary, RoundRobin};
use crate::config::RebalanceConfig;
use crate::control::BrokerControl;
use crate::discovery::discover_nodes;
use crate::enumerator::{enumerate_queues, QueueFilter};
use crate::errors::{RebalanceError, Result};
use crate::health::{probe_all, HealthGate, NodeStatus};
use crate::model::QueueInfo;
use crate::orchestrator::{clear_leftover_policies, PolicyOrchestrator};
use crate::report::{QueueAction, QueueReport, RebalanceReport};

/// Rebalances queue masters across the running cluster nodes.
///
/// ## Run Flow:
/// 1. Preflight the control plane
/// 2. Discover running nodes (at least two)
/// 3. Health-gate the whole cluster
/// 4. Enumerate the selected queues in broker order
/// 5. For each queue: health-gate again, compute its round-robin target,
///    skip it if already there, otherwise migrate it
///
/// Queues are processed strictly one at a time. A fatal error stops the run
/// at once; queues migrated before it keep their new master.
pub struct Rebalancer<C> {
    client: C,
    config: RebalanceConfig,
    cancel: CancellationToken,
}

/// State shared by every queue of a run.
struct RunContext {
    gate: HealthGate,
    assignor: RoundRobin,
    queues: Vec<QueueInfo>,
}

impl<C> Rebalancer<C>
where
    C: BrokerControl,
{
    pub fn new(client: C, config: RebalanceConfig) -> Self {
        Self {
            client,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling the token stops the run before the next queue and
    /// interrupts a pending convergence wait.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the rebalance, mutating broker policies as needed.
    pub async fn run(&self) -> Result<RebalanceReport> {
        let ctx = self.prepare().await?;
        let vhost = self.config.vhost.as_str();
        let mut report = RebalanceReport::new(vhost, ctx.assignor.nodes(), false);

        let orchestrator = PolicyOrchestrator::new(
            &self.client,
            vhost,
            &self.config.policy,
            self.config.convergence.retry_policy(),
            self.cancel.clone(),
        );

        for (position, queue) in ctx.queues.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(processed = position, "rebalance cancelled before next queue");
                return Err(RebalanceError::Cancelled);
            }

            if let Err(e) = ctx.gate.check(&self.client).await {
                error!(
                    queue = %queue.name,
                    migrated = report.migrated(),
                    "cluster health degraded, stopping before this queue"
                );
                return Err(e);
            }

            let target = ctx.assignor.target(position);

            let action = if queue.is_mastered_on(target) {
                info!(
                    queue = %queue.name,
                    node = %target,
                    position,
                    "queue master already on target, skipping"
                );
                QueueAction::Skipped
            } else {
                info!(
                    queue = %queue.name,
                    from = ?queue.master,
                    to = %target,
                    position,
                    "migrating queue master"
                );
                let outcome = match orchestrator.migrate(&queue.name, target).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(
                            queue = %queue.name,
                            migrated = report.migrated(),
                            "rebalance stopped by failed migration"
                        );
                        return Err(e);
                    }
                };
                QueueAction::Migrated {
                    attempts: outcome.attempts,
                    elapsed_ms: outcome.elapsed.as_millis() as u64,
                }
            };

            report.record(QueueReport {
                position,
                queue: queue.name.clone(),
                from: queue.master.clone(),
                target: target.clone(),
                action,
            });
        }

        info!(
            vhost = %vhost,
            migrated = report.migrated(),
            skipped = report.skipped(),
            "rebalance completed"
        );
        Ok(report)
    }

    /// Computes the moves `run` would make, without mutating anything.
    pub async fn plan(&self) -> Result<RebalanceReport> {
        let ctx = self.prepare().await?;
        let mut report = RebalanceReport::new(&self.config.vhost, ctx.assignor.nodes(), true);

        for assignment in ctx.assignor.assign(&ctx.queues) {
            let action = if assignment.is_converged() {
                QueueAction::Skipped
            } else {
                QueueAction::Planned
            };
            report.record(QueueReport {
                position: assignment.position,
                queue: assignment.queue,
                from: assignment.current,
                target: assignment.target,
                action,
            });
        }

        info!(
            vhost = %self.config.vhost,
            planned = report.planned(),
            skipped = report.skipped(),
            "dry run completed, no policy applied"
        );
        Ok(report)
    }

    /// Current master placement against the round-robin targets.
    pub async fn balance(&self) -> Result<BalanceSummary> {
        let filter = self.validate()?;
        self.preflight().await?;
        let nodes = discover_nodes(&self.client).await?;
        let queues = enumerate_queues(&self.client, &self.config.vhost, &filter).await?;
        let assignor = RoundRobin::new(nodes)?;
        Ok(BalanceSummary::compute(&assignor, &queues))
    }

    /// Health of every running node, without failing on the first bad one.
    pub async fn node_health(&self) -> Result<Vec<NodeStatus>> {
        self.preflight().await?;
        let nodes = self.client.list_running_nodes().await?;
        Ok(probe_all(&self.client, &nodes).await)
    }

    /// Clears `*<suffix>` policies left by interrupted runs.
    pub async fn cleanup(&self, dry_run: bool) -> Result<Vec<String>> {
        self.config.validate()?;
        self.preflight().await?;
        clear_leftover_policies(
            &self.client,
            &self.config.vhost,
            &self.config.policy.suffix,
            dry_run,
        )
        .await
    }

    async fn prepare(&self) -> Result<RunContext> {
        let filter = self.validate()?;
        self.preflight().await?;

        let nodes = discover_nodes(&self.client).await?;
        let gate = HealthGate::new(nodes.clone());
        gate.check(&self.client).await?;

        let queues = enumerate_queues(&self.client, &self.config.vhost, &filter).await?;
        let assignor = RoundRobin::new(nodes)?;

        Ok(RunContext {
            gate,
            assignor,
            queues,
        })
    }

    fn validate(&self) -> Result<QueueFilter> {
        self.config.validate()?;
        QueueFilter::new(&self.config.queue_filter)
    }

    async fn preflight(&self) -> Result<()> {
        self.client.preflight().await.map_err(|e| match e {
            RebalanceError::Preflight(_) => e,
            other => RebalanceError::Preflight(other.to_string()),
        })
    }
}
