use async_trait::async_trait;

use crate::errors::Result;
use crate::model::{NodeName, QueueInfo};
use crate::policy::PolicySpec;

/// The broker control plane, as seen by the rebalancer.
///
/// Every call is a remote, non-transactional operation. Implementations must
/// report nodes and queues in the order the broker returns them, since that
/// order drives round-robin target assignment.
#[async_trait]
pub trait BrokerControl: Send + Sync {
    /// Verifies the control plane is reachable and the credentials are accepted.
    async fn preflight(&self) -> Result<()>;

    async fn list_running_nodes(&self) -> Result<Vec<NodeName>>;

    /// `Ok(())` when the node answers its health probe.
    async fn health_check(&self, node: &NodeName) -> Result<()>;

    async fn list_queues(&self, vhost: &str) -> Result<Vec<QueueInfo>>;

    /// Creates the policy, or replaces an existing policy with the same name.
    async fn set_policy(&self, vhost: &str, policy: &PolicySpec) -> Result<()>;

    /// Removes the named policy. Clearing an absent policy is not an error.
    async fn clear_policy(&self, vhost: &str, name: &str) -> Result<()>;

    /// Asks the broker to synchronise the queue's mirrors with its master.
    async fn sync_queue(&self, vhost: &str, queue: &str) -> Result<()>;

    async fn list_policies(&self, vhost: &str) -> Result<Vec<PolicySpec>>;
}
