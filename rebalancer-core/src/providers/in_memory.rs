use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::control::BrokerControl;
use crate::errors::{RebalanceError, Result};
use crate::model::{NodeName, QueueInfo};
use crate::policy::{HaDirective, PolicySpec};

/// InMemoryBroker simulates the control plane of a mirrored broker cluster.
/// SHOULD BE USED ONLY FOR TESTING PURPOSES
///
/// Policies are evaluated the way the broker does it: the highest priority
/// policy whose pattern matches a queue wins. A winning `ha-mode: nodes`
/// directive moves the queue master to the first listed node once the
/// configured number of queue listings has been observed.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

/// A mutating call received by the broker, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    SetPolicy { vhost: String, policy: PolicySpec },
    ClearPolicy { vhost: String, name: String },
    SyncQueue { vhost: String, queue: String },
}

impl BrokerCall {
    pub fn is_policy_mutation(&self) -> bool {
        matches!(self, BrokerCall::SetPolicy { .. } | BrokerCall::ClearPolicy { .. })
    }
}

#[derive(Debug)]
struct BrokerState {
    available: bool,
    nodes: Vec<SimNode>,
    vhosts: BTreeMap<String, SimVhost>,
    // listings to observe before a pinned master lands, None = never
    convergence_lag: Option<u32>,
    calls: Vec<BrokerCall>,
    failing_priorities: Vec<i32>,
    fail_clear: bool,
    fail_sync: bool,
}

#[derive(Debug)]
struct SimNode {
    name: NodeName,
    running: bool,
    healthy: bool,
    // successful probes left before the node turns unhealthy
    checks_before_failure: Option<u32>,
}

#[derive(Debug, Default)]
struct SimVhost {
    queues: Vec<SimQueue>,
    policies: BTreeMap<String, PolicySpec>,
}

#[derive(Debug)]
struct SimQueue {
    name: String,
    master: Option<NodeName>,
    pending: Option<PendingMove>,
}

#[derive(Debug)]
struct PendingMove {
    target: NodeName,
    polls_left: Option<u32>,
}

pub struct InMemoryBrokerBuilder {
    state: BrokerState,
}

impl InMemoryBrokerBuilder {
    pub fn with_nodes<I, N>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeName>,
    {
        for node in nodes {
            self.state.nodes.push(SimNode {
                name: node.into(),
                running: true,
                healthy: true,
                checks_before_failure: None,
            });
        }
        self
    }

    /// Adds a cluster member that is not running.
    pub fn with_stopped_node(mut self, node: impl Into<NodeName>) -> Self {
        self.state.nodes.push(SimNode {
            name: node.into(),
            running: false,
            healthy: false,
            checks_before_failure: None,
        });
        self
    }

    pub fn with_queue(mut self, vhost: &str, name: &str, master: impl Into<NodeName>) -> Self {
        self.push_queue(vhost, name, Some(master.into()));
        self
    }

    pub fn with_unmastered_queue(mut self, vhost: &str, name: &str) -> Self {
        self.push_queue(vhost, name, None);
        self
    }

    pub fn with_policy(mut self, vhost: &str, policy: PolicySpec) -> Self {
        self.state
            .vhosts
            .entry(vhost.to_string())
            .or_default()
            .policies
            .insert(policy.name.clone(), policy);
        self
    }

    /// Number of queue listings that still report the old master after a pin.
    pub fn with_convergence_lag(mut self, listings: u32) -> Self {
        self.state.convergence_lag = Some(listings);
        self
    }

    /// Pinned masters never move.
    pub fn never_converge(mut self) -> Self {
        self.state.convergence_lag = None;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.state.available = false;
        self
    }

    pub fn build(self) -> InMemoryBroker {
        InMemoryBroker {
            inner: Arc::new(Mutex::new(self.state)),
        }
    }

    fn push_queue(&mut self, vhost: &str, name: &str, master: Option<NodeName>) {
        self.state
            .vhosts
            .entry(vhost.to_string())
            .or_default()
            .queues
            .push(SimQueue {
                name: name.to_string(),
                master,
                pending: None,
            });
    }
}

impl InMemoryBroker {
    pub fn builder() -> InMemoryBrokerBuilder {
        InMemoryBrokerBuilder {
            state: BrokerState {
                available: true,
                nodes: Vec::new(),
                vhosts: BTreeMap::new(),
                convergence_lag: Some(0),
                calls: Vec::new(),
                failing_priorities: Vec::new(),
                fail_clear: false,
                fail_sync: false,
            },
        }
    }

    pub async fn mark_unhealthy(&self, node: &str) {
        let mut state = self.inner.lock().await;
        if let Some(n) = state.node_mut(node) {
            n.healthy = false;
        }
    }

    pub async fn mark_healthy(&self, node: &str) {
        let mut state = self.inner.lock().await;
        if let Some(n) = state.node_mut(node) {
            n.healthy = true;
            n.checks_before_failure = None;
        }
    }

    /// The node passes `checks` more health probes, then turns unhealthy.
    pub async fn fail_after_health_checks(&self, node: &str, checks: u32) {
        let mut state = self.inner.lock().await;
        if let Some(n) = state.node_mut(node) {
            n.checks_before_failure = Some(checks);
        }
    }

    pub async fn stop_node(&self, node: &str) {
        let mut state = self.inner.lock().await;
        if let Some(n) = state.node_mut(node) {
            n.running = false;
        }
    }

    /// Every `set_policy` carrying this priority is rejected.
    pub async fn fail_set_policy_with_priority(&self, priority: i32) {
        self.inner.lock().await.failing_priorities.push(priority);
    }

    pub async fn fail_clear_policy(&self, fail: bool) {
        self.inner.lock().await.fail_clear = fail;
    }

    pub async fn fail_sync(&self, fail: bool) {
        self.inner.lock().await.fail_sync = fail;
    }

    pub async fn set_available(&self, available: bool) {
        self.inner.lock().await.available = available;
    }

    pub async fn calls(&self) -> Vec<BrokerCall> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn policy_mutations(&self) -> usize {
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.is_policy_mutation())
            .count()
    }

    pub async fn policies(&self, vhost: &str) -> Vec<PolicySpec> {
        self.inner
            .lock()
            .await
            .vhosts
            .get(vhost)
            .map(|v| v.policies.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Current master without advancing pending moves.
    pub async fn master_of(&self, vhost: &str, queue: &str) -> Option<NodeName> {
        self.inner
            .lock()
            .await
            .vhosts
            .get(vhost)
            .and_then(|v| v.queues.iter().find(|q| q.name == queue))
            .and_then(|q| q.master.clone())
    }
}

impl BrokerState {
    fn node_mut(&mut self, name: &str) -> Option<&mut SimNode> {
        self.nodes.iter_mut().find(|n| n.name.as_str() == name)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(RebalanceError::Control("connection refused".to_string()))
        }
    }

    fn vhost_mut(&mut self, vhost: &str) -> Result<&mut SimVhost> {
        self.vhosts
            .get_mut(vhost)
            .ok_or_else(|| RebalanceError::Control(format!("vhost {vhost} not found")))
    }

    /// Re-evaluates the winning policy of every queue in `vhost`.
    fn reconcile(&mut self, vhost: &str) -> Result<()> {
        let lag = self.convergence_lag;
        let Some(state) = self.vhosts.get_mut(vhost) else {
            return Ok(());
        };

        let mut compiled = Vec::with_capacity(state.policies.len());
        for policy in state.policies.values() {
            if policy.apply_to != "queues" && policy.apply_to != "all" {
                continue;
            }
            let regex = Regex::new(&policy.pattern)
                .map_err(|e| RebalanceError::Control(format!("invalid policy pattern: {e}")))?;
            compiled.push((regex, policy));
        }

        for queue in state.queues.iter_mut() {
            let winner = compiled
                .iter()
                .filter(|(regex, _)| regex.is_match(&queue.name))
                .max_by_key(|(_, policy)| policy.priority)
                .and_then(|(_, policy)| HaDirective::from_definition(&policy.definition));

            let target = match winner {
                Some(HaDirective::Nodes(nodes)) => nodes.into_iter().next(),
                _ => None,
            };

            match target {
                Some(target) if queue.master.as_ref() != Some(&target) => {
                    let same_target = queue
                        .pending
                        .as_ref()
                        .is_some_and(|p| p.target == target);
                    if !same_target {
                        queue.pending = Some(PendingMove {
                            target,
                            polls_left: lag,
                        });
                    }
                    if matches!(queue.pending, Some(PendingMove { polls_left: Some(0), .. })) {
                        queue.land_pending_move();
                    }
                }
                _ => queue.pending = None,
            }
        }
        Ok(())
    }
}

impl SimQueue {
    fn land_pending_move(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.master = Some(pending.target);
        }
    }

    fn observe(&mut self) {
        match self.pending.as_mut().map(|p| &mut p.polls_left) {
            Some(Some(0)) => self.land_pending_move(),
            Some(Some(left)) => *left -= 1,
            _ => {}
        }
    }
}

#[async_trait]
impl BrokerControl for InMemoryBroker {
    async fn preflight(&self) -> Result<()> {
        let state = self.inner.lock().await;
        if state.available {
            Ok(())
        } else {
            Err(RebalanceError::Preflight(
                "in-memory broker is marked unavailable".to_string(),
            ))
        }
    }

    async fn list_running_nodes(&self) -> Result<Vec<NodeName>> {
        let state = self.inner.lock().await;
        state.ensure_available()?;
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.running)
            .map(|n| n.name.clone())
            .collect())
    }

    async fn health_check(&self, node: &NodeName) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.ensure_available()?;

        let sim = state.node_mut(node.as_str()).ok_or_else(|| {
            RebalanceError::Control(format!("node {node} is not a cluster member"))
        })?;

        if let Some(left) = sim.checks_before_failure.as_mut() {
            if *left == 0 {
                sim.healthy = false;
            } else {
                *left -= 1;
            }
        }

        if !sim.running {
            return Err(RebalanceError::Control(format!("node {node} is not running")));
        }
        if !sim.healthy {
            return Err(RebalanceError::Control(format!("node {node} reported an alarm")));
        }
        Ok(())
    }

    async fn list_queues(&self, vhost: &str) -> Result<Vec<QueueInfo>> {
        let mut state = self.inner.lock().await;
        state.ensure_available()?;

        let Some(vhost_state) = state.vhosts.get_mut(vhost) else {
            return Ok(Vec::new());
        };

        Ok(vhost_state
            .queues
            .iter_mut()
            .map(|queue| {
                queue.observe();
                QueueInfo::new(queue.name.clone(), queue.master.clone())
            })
            .collect())
    }

    async fn set_policy(&self, vhost: &str, policy: &PolicySpec) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.ensure_available()?;
        state.calls.push(BrokerCall::SetPolicy {
            vhost: vhost.to_string(),
            policy: policy.clone(),
        });

        if state.failing_priorities.contains(&policy.priority) {
            return Err(RebalanceError::Control(format!(
                "policy {} rejected by broker",
                policy.name
            )));
        }
        Regex::new(&policy.pattern)
            .map_err(|e| RebalanceError::Control(format!("invalid policy pattern: {e}")))?;

        state
            .vhosts
            .entry(vhost.to_string())
            .or_default()
            .policies
            .insert(policy.name.clone(), policy.clone());
        state.reconcile(vhost)
    }

    async fn clear_policy(&self, vhost: &str, name: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.ensure_available()?;
        state.calls.push(BrokerCall::ClearPolicy {
            vhost: vhost.to_string(),
            name: name.to_string(),
        });

        if state.fail_clear {
            return Err(RebalanceError::Control(format!(
                "policy {name} could not be cleared"
            )));
        }

        if let Some(v) = state.vhosts.get_mut(vhost) {
            v.policies.remove(name);
        }
        state.reconcile(vhost)
    }

    async fn sync_queue(&self, vhost: &str, queue: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.ensure_available()?;
        state.calls.push(BrokerCall::SyncQueue {
            vhost: vhost.to_string(),
            queue: queue.to_string(),
        });

        if state.fail_sync {
            return Err(RebalanceError::Control(format!("sync of {queue} failed")));
        }

        let v = state.vhost_mut(vhost)?;
        if !v.queues.iter().any(|q| q.name == queue) {
            return Err(RebalanceError::Control(format!("queue {queue} not found")));
        }
        Ok(())
    }

    async fn list_policies(&self, vhost: &str) -> Result<Vec<PolicySpec>> {
        let state = self.inner.lock().await;
        state.ensure_available()?;
        Ok(state
            .vhosts
            .get(vhost)
            .map(|v| v.policies.values().cloned().collect())
            .unwrap_or_default())
    }
}
