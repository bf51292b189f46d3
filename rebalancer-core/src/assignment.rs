use serde::Serialize;
use std::sync::Arc;

use crate::discovery::MIN_CLUSTER_NODES;
use crate::errors::{RebalanceError, Result};
use crate::model::{NodeName, QueueInfo};

/// Round-robin master assignor.
///
/// `target(i) = nodes[i mod len(nodes)]`, where `i` is the position of the
/// queue in the filtered enumeration. Stateless: a new run always starts the
/// cycle at position 0.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    nodes: Arc<[NodeName]>,
}

impl RoundRobin {
    pub fn new(nodes: Arc<[NodeName]>) -> Result<Self> {
        if nodes.len() < MIN_CLUSTER_NODES {
            return Err(RebalanceError::ClusterTopology { found: nodes.len() });
        }
        Ok(Self { nodes })
    }

    pub fn target(&self, position: usize) -> &NodeName {
        &self.nodes[position % self.nodes.len()]
    }

    pub fn nodes(&self) -> &[NodeName] {
        &self.nodes
    }

    /// Pairs every queue with its target, in enumeration order.
    pub fn assign<'a>(&'a self, queues: &'a [QueueInfo]) -> impl Iterator<Item = Assignment> + 'a {
        queues
            .iter()
            .enumerate()
            .map(move |(position, queue)| Assignment {
                position,
                queue: queue.name.clone(),
                current: queue.master.clone(),
                target: self.target(position).clone(),
            })
    }
}

/// Target of one queue for this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub position: usize,
    pub queue: String,
    pub current: Option<NodeName>,
    pub target: NodeName,
}

impl Assignment {
    pub fn is_converged(&self) -> bool {
        self.current.as_ref() == Some(&self.target)
    }
}

/// Master placement per node, current versus round-robin target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeBalance {
    pub node: NodeName,
    pub current_masters: usize,
    pub target_masters: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSummary {
    pub nodes: Vec<NodeBalance>,
    pub total_queues: usize,
    /// Queues whose master differs from their round-robin target
    pub off_target: usize,
    /// Queues mastered on a node outside the running set, or with no master
    pub unplaced: usize,
}

impl BalanceSummary {
    pub fn compute(assignor: &RoundRobin, queues: &[QueueInfo]) -> Self {
        let mut nodes: Vec<NodeBalance> = assignor
            .nodes()
            .iter()
            .map(|node| NodeBalance {
                node: node.clone(),
                current_masters: 0,
                target_masters: 0,
            })
            .collect();

        let mut off_target = 0;
        let mut unplaced = 0;

        for assignment in assignor.assign(queues) {
            if !assignment.is_converged() {
                off_target += 1;
            }

            match assignment
                .current
                .as_ref()
                .and_then(|current| nodes.iter_mut().find(|n| &n.node == current))
            {
                Some(entry) => entry.current_masters += 1,
                None => unplaced += 1,
            }

            if let Some(entry) = nodes.iter_mut().find(|n| n.node == assignment.target) {
                entry.target_masters += 1;
            }
        }

        Self {
            nodes,
            total_queues: queues.len(),
            off_target,
            unplaced,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.off_target == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignor(names: &[&str]) -> RoundRobin {
        RoundRobin::new(names.iter().map(|n| NodeName::from(*n)).collect()).unwrap()
    }

    #[test]
    fn test_target_wraps_modulo_node_count() {
        let rr = assignor(&["a", "b", "c"]);
        let targets: Vec<&str> = (0..7).map(|i| rr.target(i).as_str()).collect();
        assert_eq!(targets, vec!["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn test_assignor_requires_two_nodes() {
        let err = RoundRobin::new(vec![NodeName::from("a")].into()).unwrap_err();
        assert!(matches!(err, RebalanceError::ClusterTopology { found: 1 }));
    }

    #[test]
    fn test_round_robin_fairness() {
        for node_count in 2usize..6 {
            let names: Vec<String> = (0..node_count).map(|i| format!("rabbit@{i}")).collect();
            let rr = RoundRobin::new(names.iter().map(|n| NodeName::from(n.as_str())).collect())
                .unwrap();

            for queue_count in node_count..(node_count * 4 + 3) {
                let queues: Vec<QueueInfo> = (0..queue_count)
                    .map(|i| QueueInfo::new(format!("q{i}"), None))
                    .collect();
                let summary = BalanceSummary::compute(&rr, &queues);

                let floor = queue_count / node_count;
                let ceil = queue_count.div_ceil(node_count);
                for node in &summary.nodes {
                    assert!(
                        node.target_masters == floor || node.target_masters == ceil,
                        "{} nodes / {} queues: {} got {}",
                        node_count,
                        queue_count,
                        node.node,
                        node.target_masters
                    );
                }
            }
        }
    }

    #[test]
    fn test_balance_summary_counts_current_and_off_target() {
        let rr = assignor(&["a", "b", "c"]);
        let queues = vec![
            QueueInfo::new("q1", Some("a".into())),
            QueueInfo::new("q2", Some("a".into())),
            QueueInfo::new("q3", Some("b".into())),
            QueueInfo::new("q4", Some("c".into())),
            QueueInfo::new("q5", None),
        ];

        let summary = BalanceSummary::compute(&rr, &queues);
        assert_eq!(summary.total_queues, 5);
        // q1 is the only queue already on its target
        assert_eq!(summary.off_target, 4);
        assert_eq!(summary.unplaced, 1);
        assert!(!summary.is_balanced());

        let a = &summary.nodes[0];
        assert_eq!((a.current_masters, a.target_masters), (2, 2));
        let b = &summary.nodes[1];
        assert_eq!((b.current_masters, b.target_masters), (1, 2));
        let c = &summary.nodes[2];
        assert_eq!((c.current_masters, c.target_masters), (1, 1));
    }
}
