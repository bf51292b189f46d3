//! Queue master rebalancing for mirrored broker clusters.
//!
//! The rebalancer spreads the masters of the selected queues round-robin over
//! the running nodes, relocating each one through a short-lived HA policy.

mod errors;
pub use errors::{CleanupOutcome, RebalanceError, Result};

mod model;
pub use model::{NodeName, QueueInfo};

mod policy;
pub use policy::{
    is_temporary_policy, HaDirective, HaSyncMode, PolicySpec, TemporaryPolicy,
    DEFAULT_PIN_PRIORITY, DEFAULT_SHED_PRIORITY, DEFAULT_TEMP_POLICY_SUFFIX,
};

mod control;
pub use control::BrokerControl;

mod config;
pub use config::{ConvergenceConfig, ManagementClientConfig, RebalanceConfig, TemporaryPolicyConfig};

mod discovery;
pub use discovery::{discover_nodes, MIN_CLUSTER_NODES};

mod health;
pub use health::{probe_all, HealthGate, NodeStatus};

mod enumerator;
pub use enumerator::{enumerate_queues, QueueFilter};

mod assignment;
pub use assignment::{Assignment, BalanceSummary, NodeBalance, RoundRobin};

mod watcher;
pub use watcher::{ConvergenceWatcher, RetryPolicy};

mod orchestrator;
pub use orchestrator::{clear_leftover_policies, MigrationOutcome, PolicyOrchestrator};

mod report;
pub use report::{QueueAction, QueueReport, RebalanceReport};

mod rebalancer;
pub use rebalancer::Rebalancer;

mod providers;
pub use providers::{
    in_memory::{BrokerCall, InMemoryBroker, InMemoryBrokerBuilder},
    management_http::ManagementClient,
};

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum BrokerClient {
    Management(ManagementClient),
    InMemory(InMemoryBroker), // InMemory is used for testing purposes
}

impl BrokerClient {
    /// Client for the management API described by `config`.
    pub fn management(config: ManagementClientConfig) -> Result<Self> {
        Ok(BrokerClient::Management(ManagementClient::new(config)?))
    }
}

#[async_trait]
impl BrokerControl for BrokerClient {
    async fn preflight(&self) -> Result<()> {
        match self {
            BrokerClient::Management(client) => client.preflight().await,
            BrokerClient::InMemory(client) => client.preflight().await,
        }
    }

    async fn list_running_nodes(&self) -> Result<Vec<NodeName>> {
        match self {
            BrokerClient::Management(client) => client.list_running_nodes().await,
            BrokerClient::InMemory(client) => client.list_running_nodes().await,
        }
    }

    async fn health_check(&self, node: &NodeName) -> Result<()> {
        match self {
            BrokerClient::Management(client) => client.health_check(node).await,
            BrokerClient::InMemory(client) => client.health_check(node).await,
        }
    }

    async fn list_queues(&self, vhost: &str) -> Result<Vec<QueueInfo>> {
        match self {
            BrokerClient::Management(client) => client.list_queues(vhost).await,
            BrokerClient::InMemory(client) => client.list_queues(vhost).await,
        }
    }

    async fn set_policy(&self, vhost: &str, policy: &PolicySpec) -> Result<()> {
        match self {
            BrokerClient::Management(client) => client.set_policy(vhost, policy).await,
            BrokerClient::InMemory(client) => client.set_policy(vhost, policy).await,
        }
    }

    async fn clear_policy(&self, vhost: &str, name: &str) -> Result<()> {
        match self {
            BrokerClient::Management(client) => client.clear_policy(vhost, name).await,
            BrokerClient::InMemory(client) => client.clear_policy(vhost, name).await,
        }
    }

    async fn sync_queue(&self, vhost: &str, queue: &str) -> Result<()> {
        match self {
            BrokerClient::Management(client) => client.sync_queue(vhost, queue).await,
            BrokerClient::InMemory(client) => client.sync_queue(vhost, queue).await,
        }
    }

    async fn list_policies(&self, vhost: &str) -> Result<Vec<PolicySpec>> {
        match self {
            BrokerClient::Management(client) => client.list_policies(vhost).await,
            BrokerClient::InMemory(client) => client.list_policies(vhost).await,
        }
    }
}
