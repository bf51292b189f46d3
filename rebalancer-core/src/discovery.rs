use std::sync::Arc;
use tracing::info;

use crate::control::BrokerControl;
use crate::errors::{RebalanceError, Result};
use crate::model::NodeName;

/// A master move needs at least a source and a target node.
pub const MIN_CLUSTER_NODES: usize = 2;

/// Lists the running cluster nodes in broker order.
///
/// The returned order defines the round-robin sequence for the whole run.
pub async fn discover_nodes<C>(client: &C) -> Result<Arc<[NodeName]>>
where
    C: BrokerControl + ?Sized,
{
    let nodes = client.list_running_nodes().await?;

    if nodes.len() < MIN_CLUSTER_NODES {
        return Err(RebalanceError::ClusterTopology { found: nodes.len() });
    }

    info!(count = nodes.len(), nodes = ?nodes, "discovered running cluster nodes");
    Ok(nodes.into())
}
