use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::TemporaryPolicyConfig;
use crate::control::BrokerControl;
use crate::errors::{CleanupOutcome, RebalanceError, Result};
use crate::model::NodeName;
use crate::policy::{is_temporary_policy, PolicySpec, TemporaryPolicy};
use crate::watcher::{ConvergenceWatcher, RetryPolicy};

/// Result of a completed master migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// Master lookups until the move was observed
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Drives the temporary-policy sequence that relocates a queue master.
///
/// ## Sequence:
/// 1. **Shed**: `<queue>-ha-temp` at the shed priority, keep exactly one
///    mirror, then sync.
/// 2. **Pin**: same policy name at the higher pin priority, restrict the
///    replica set to the target node, then sync.
/// 3. **Wait** for the broker to report the target as master.
/// 4. **Clear** the temporary policy, then sync.
///
/// Whatever stops the sequence after it started, the temporary policy is
/// cleared best effort before the error is returned.
pub struct PolicyOrchestrator<'a, C: ?Sized> {
    client: &'a C,
    vhost: &'a str,
    policy: &'a TemporaryPolicyConfig,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a, C> PolicyOrchestrator<'a, C>
where
    C: BrokerControl + ?Sized,
{
    pub fn new(
        client: &'a C,
        vhost: &'a str,
        policy: &'a TemporaryPolicyConfig,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            vhost,
            policy,
            retry,
            cancel,
        }
    }

    /// Moves the master of `queue` to `target`.
    ///
    /// Callers skip queues already mastered on their target; this method
    /// always runs the full sequence.
    pub async fn migrate(&self, queue: &str, target: &NodeName) -> Result<MigrationOutcome> {
        let temp = TemporaryPolicy::for_queue(queue, &self.policy.suffix);
        let started = Instant::now();

        match self.run_phases(&temp, queue, target).await {
            Ok(attempts) => {
                let elapsed = started.elapsed();
                info!(
                    queue = %queue,
                    target = %target,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "queue master migrated"
                );
                Ok(MigrationOutcome { attempts, elapsed })
            }
            Err(cause) => {
                let cleanup = self.release(&temp).await;
                Err(RebalanceError::MigrationAborted {
                    queue: queue.to_string(),
                    policy: temp.name().to_string(),
                    cause: Box::new(cause),
                    cleanup,
                })
            }
        }
    }

    async fn run_phases(
        &self,
        temp: &TemporaryPolicy,
        queue: &str,
        target: &NodeName,
    ) -> Result<u32> {
        let sync_mode = self.policy.ha_sync_mode;

        info!(
            queue = %queue,
            policy = %temp.name(),
            priority = self.policy.shed_priority,
            "shedding mirrors"
        );
        self.apply(&temp.shed(self.policy.shed_priority, sync_mode)).await?;
        self.sync(queue).await;

        info!(
            queue = %queue,
            policy = %temp.name(),
            priority = self.policy.pin_priority,
            target = %target,
            "pinning master"
        );
        self.apply(&temp.pin(target, self.policy.pin_priority, sync_mode)).await?;
        self.sync(queue).await;

        let watcher = ConvergenceWatcher::new(self.client, self.retry, self.cancel.clone());
        let attempts = watcher.wait_for_master(self.vhost, queue, target).await?;

        self.clear(temp.name()).await?;
        self.sync(queue).await;

        Ok(attempts)
    }

    async fn apply(&self, spec: &PolicySpec) -> Result<()> {
        self.client
            .set_policy(self.vhost, spec)
            .await
            .map_err(|e| RebalanceError::PolicyApply {
                policy: spec.name.clone(),
                vhost: self.vhost.to_string(),
                reason: e.to_string(),
            })
    }

    async fn clear(&self, name: &str) -> Result<()> {
        self.client
            .clear_policy(self.vhost, name)
            .await
            .map_err(|e| RebalanceError::PolicyApply {
                policy: name.to_string(),
                vhost: self.vhost.to_string(),
                reason: e.to_string(),
            })
    }

    // sync only speeds up convergence, which the watcher verifies anyway
    async fn sync(&self, queue: &str) {
        if let Err(e) = self.client.sync_queue(self.vhost, queue).await {
            warn!(queue = %queue, error = %e, "queue sync request failed, continuing");
        }
    }

    // runs even when the run was cancelled
    async fn release(&self, temp: &TemporaryPolicy) -> CleanupOutcome {
        match self.client.clear_policy(self.vhost, temp.name()).await {
            Ok(()) => {
                warn!(
                    policy = %temp.name(),
                    vhost = %self.vhost,
                    "temporary policy cleared after failed migration"
                );
                CleanupOutcome::Cleared
            }
            Err(e) => {
                error!(
                    policy = %temp.name(),
                    vhost = %self.vhost,
                    error = %e,
                    "failed to clear temporary policy, manual cleanup required"
                );
                CleanupOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Clears temporary policies left behind by interrupted runs.
///
/// Returns the names of the policies found; with `dry_run` nothing is cleared.
pub async fn clear_leftover_policies<C>(
    client: &C,
    vhost: &str,
    suffix: &str,
    dry_run: bool,
) -> Result<Vec<String>>
where
    C: BrokerControl + ?Sized,
{
    let leftovers: Vec<String> = client
        .list_policies(vhost)
        .await?
        .into_iter()
        .filter(|p| is_temporary_policy(&p.name, suffix))
        .map(|p| p.name)
        .collect();

    if leftovers.is_empty() {
        info!(vhost = %vhost, "no leftover temporary policies");
        return Ok(leftovers);
    }

    for name in &leftovers {
        if dry_run {
            info!(vhost = %vhost, policy = %name, "would clear leftover temporary policy");
            continue;
        }
        client
            .clear_policy(vhost, name)
            .await
            .map_err(|e| RebalanceError::PolicyApply {
                policy: name.clone(),
                vhost: vhost.to_string(),
                reason: e.to_string(),
            })?;
        info!(vhost = %vhost, policy = %name, "cleared leftover temporary policy");
    }

    Ok(leftovers)
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;
