use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

use crate::control::BrokerControl;
use crate::errors::{RebalanceError, Result};
use crate::model::NodeName;

/// Strict cluster health gate.
///
/// Any single failing node fails the whole gate: a policy change while the
/// cluster is partially healthy can strand a queue without enough mirrors.
#[derive(Debug, Clone)]
pub struct HealthGate {
    nodes: Arc<[NodeName]>,
}

impl HealthGate {
    pub fn new(nodes: Arc<[NodeName]>) -> Self {
        Self { nodes }
    }

    /// Probes every node in order and stops at the first failure.
    pub async fn check<C>(&self, client: &C) -> Result<()>
    where
        C: BrokerControl + ?Sized,
    {
        for node in self.nodes.iter() {
            if let Err(e) = client.health_check(node).await {
                error!(node = %node, error = %e, "node failed its health check");
                return Err(RebalanceError::NodeHealth {
                    node: node.clone(),
                    reason: e.to_string(),
                });
            }
        }

        debug!(nodes = self.nodes.len(), "all cluster nodes are healthy");
        Ok(())
    }
}

/// Health of one node, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub node: NodeName,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Probes every node without stopping at the first failure.
pub async fn probe_all<C>(client: &C, nodes: &[NodeName]) -> Vec<NodeStatus>
where
    C: BrokerControl + ?Sized,
{
    let mut statuses = Vec::with_capacity(nodes.len());
    for node in nodes {
        let status = match client.health_check(node).await {
            Ok(()) => NodeStatus {
                node: node.clone(),
                healthy: true,
                reason: None,
            },
            Err(e) => NodeStatus {
                node: node.clone(),
                healthy: false,
                reason: Some(e.to_string()),
            },
        };
        statuses.push(status);
    }
    statuses
}
