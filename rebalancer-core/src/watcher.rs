use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::control::BrokerControl;
use crate::errors::{RebalanceError, Result};
use crate::model::NodeName;

/// Bounded fixed-interval retry policy for convergence polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between two lookups
    pub interval: Duration,
    /// Give up after this many lookups
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since the first lookup
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            timeout: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn is_exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.timeout.is_some_and(|timeout| elapsed >= timeout)
    }

    /// Sleep before the next lookup, never past the deadline.
    fn next_delay(&self, elapsed: Duration) -> Duration {
        match self.timeout {
            Some(timeout) => self.interval.min(timeout.saturating_sub(elapsed)),
            None => self.interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
            .with_max_attempts(120)
            .with_timeout(Duration::from_secs(600))
    }
}

/// Polls the broker until a queue's master sits on the expected node.
pub struct ConvergenceWatcher<'a, C: ?Sized> {
    client: &'a C,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a, C> ConvergenceWatcher<'a, C>
where
    C: BrokerControl + ?Sized,
{
    pub fn new(client: &'a C, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            client,
            policy,
            cancel,
        }
    }

    /// Waits for the master of `queue` to equal `target`.
    ///
    /// Returns the number of lookups it took. A failed lookup counts as a
    /// pending attempt; a queue missing from the listing is fatal.
    pub async fn wait_for_master(
        &self,
        vhost: &str,
        queue: &str,
        target: &NodeName,
    ) -> Result<u32> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RebalanceError::Cancelled);
            }

            attempt += 1;
            match self.current_master(vhost, queue).await {
                Ok(Some(master)) if master.as_ref() == Some(target) => {
                    debug!(queue = %queue, target = %target, attempt, "queue master converged");
                    return Ok(attempt);
                }
                Ok(Some(master)) => {
                    warn!(
                        queue = %queue,
                        target = %target,
                        current = ?master,
                        attempt,
                        "queue master has not moved to the target yet"
                    );
                }
                Ok(None) => {
                    return Err(RebalanceError::QueueVanished {
                        vhost: vhost.to_string(),
                        queue: queue.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        queue = %queue,
                        error = %e,
                        attempt,
                        "failed to read queue master, will retry"
                    );
                }
            }

            let elapsed = started.elapsed();
            if self.policy.is_exhausted(attempt, elapsed) {
                return Err(RebalanceError::ConvergenceTimeout {
                    queue: queue.to_string(),
                    target: target.clone(),
                    attempts: attempt,
                    elapsed,
                });
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(RebalanceError::Cancelled),
                _ = tokio::time::sleep(self.policy.next_delay(elapsed)) => {}
            }
        }
    }

    // Outer None: the queue is not listed. Inner None: no master reported.
    async fn current_master(&self, vhost: &str, queue: &str) -> Result<Option<Option<NodeName>>> {
        let queues = self.client.list_queues(vhost).await?;
        Ok(queues
            .into_iter()
            .find(|q| q.name == queue)
            .map(|q| q.master))
    }
}
