use serde::Serialize;

use crate::model::NodeName;

/// What happened to a queue during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QueueAction {
    /// Already mastered on its target, nothing was applied
    Skipped,
    /// Would be migrated (dry run)
    Planned,
    Migrated { attempts: u32, elapsed_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueReport {
    pub position: usize,
    pub queue: String,
    pub from: Option<NodeName>,
    pub target: NodeName,
    #[serde(flatten)]
    pub action: QueueAction,
}

/// Outcome of a rebalancing run, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebalanceReport {
    pub vhost: String,
    pub nodes: Vec<NodeName>,
    pub dry_run: bool,
    pub queues: Vec<QueueReport>,
}

impl RebalanceReport {
    pub fn new(vhost: &str, nodes: &[NodeName], dry_run: bool) -> Self {
        Self {
            vhost: vhost.to_string(),
            nodes: nodes.to_vec(),
            dry_run,
            queues: Vec::new(),
        }
    }

    pub fn record(&mut self, entry: QueueReport) {
        self.queues.push(entry);
    }

    pub fn migrated(&self) -> usize {
        self.count(|a| matches!(a, QueueAction::Migrated { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|a| matches!(a, QueueAction::Skipped))
    }

    pub fn planned(&self) -> usize {
        self.count(|a| matches!(a, QueueAction::Planned))
    }

    /// True when the run applied (or would apply) no policy at all.
    pub fn is_noop(&self) -> bool {
        self.migrated() == 0 && self.planned() == 0
    }

    fn count(&self, pred: impl Fn(&QueueAction) -> bool) -> usize {
        self.queues.iter().filter(|q| pred(&q.action)).count()
    }
}
