//! End-to-end rebalancing runs against the in-memory broker.

use rebalancer_core::{
    BrokerCall, BrokerClient, BrokerControl, InMemoryBroker, NodeName, QueueAction,
    RebalanceConfig, RebalanceError, Rebalancer,
};
use tokio_util::sync::CancellationToken;

const A: &str = "rabbit@a";
const B: &str = "rabbit@b";
const C: &str = "rabbit@c";

fn fast_config() -> RebalanceConfig {
    let mut config = RebalanceConfig::default();
    config.convergence.poll_interval_ms = 1;
    config.convergence.max_attempts = Some(50);
    config
}

fn three_node_cluster() -> InMemoryBroker {
    InMemoryBroker::builder()
        .with_nodes([A, B, C])
        .with_queue("/", "q1", A)
        .with_queue("/", "q2", A)
        .with_queue("/", "q3", B)
        .with_queue("/", "q4", C)
        .with_convergence_lag(1)
        .build()
}

async fn masters(broker: &InMemoryBroker, queues: &[&str]) -> Vec<Option<NodeName>> {
    let mut found = Vec::with_capacity(queues.len());
    for queue in queues {
        found.push(broker.master_of("/", queue).await);
    }
    found
}

/// **Test:** Round-Robin Placement Over Three Nodes
///
/// **Reason:** This is the core behaviour: the i-th queue ends up on node i mod n.
///
/// **Expectation:** q1 is skipped, q2 moves A→B, q3 B→C, q4 C→A, and no
/// temporary policy survives the run.
#[tokio::test]
async fn test_three_node_rebalance() {
    let broker = three_node_cluster();
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());

    let report = rebalancer.run().await.unwrap();

    assert_eq!(report.queues.len(), 4);
    assert_eq!(report.queues[0].action, QueueAction::Skipped);
    assert_eq!(report.migrated(), 3);
    assert_eq!(
        report.queues.iter().map(|q| q.target.as_str()).collect::<Vec<_>>(),
        vec![A, B, C, A]
    );
    assert_eq!(
        masters(&broker, &["q1", "q2", "q3", "q4"]).await,
        vec![Some(A.into()), Some(B.into()), Some(C.into()), Some(A.into())]
    );
    assert!(broker.policies("/").await.is_empty());
}

/// **Test:** A Second Run Is a No-Op
///
/// **Reason:** Rebalancing an already balanced cluster must not touch any policy.
///
/// **Expectation:** Every queue is skipped and no policy mutation is recorded.
#[tokio::test]
async fn test_rebalance_is_idempotent() {
    let broker = InMemoryBroker::builder()
        .with_nodes([A, B])
        .with_queue("/", "q1", A)
        .with_queue("/", "q2", B)
        .with_queue("/", "q3", A)
        .build();
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());

    let report = rebalancer.run().await.unwrap();

    assert!(report.is_noop());
    assert_eq!(report.skipped(), 3);
    assert_eq!(broker.policy_mutations().await, 0);
}

/// **Test:** Unhealthy Node Blocks the Run
///
/// **Reason:** Policy changes on a degraded cluster can leave queues under-replicated.
///
/// **Expectation:** NodeHealth names the failing node and nothing is applied.
#[tokio::test]
async fn test_unhealthy_node_fails_fast() {
    let broker = three_node_cluster();
    broker.mark_unhealthy(B).await;
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());

    let err = rebalancer.run().await.unwrap_err();

    match err {
        RebalanceError::NodeHealth { node, .. } => assert_eq!(node.as_str(), B),
        other => panic!("expected NodeHealth, got {:?}", other),
    }
    assert!(broker.calls().await.is_empty());
}

/// **Test:** Degradation in the Middle of a Run
///
/// **Reason:** Health is re-checked before every queue, and finished migrations
/// are never rolled back.
///
/// **Expectation:** The run stops before q3; q2 keeps its new master and q3, q4
/// are untouched.
#[tokio::test]
async fn test_mid_run_degradation_stops_before_next_queue() {
    let broker = three_node_cluster();
    // initial gate, q1, q2 pass; the probe before q3 fails
    broker.fail_after_health_checks(C, 3).await;
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());

    let err = rebalancer.run().await.unwrap_err();

    assert!(matches!(err, RebalanceError::NodeHealth { .. }));
    assert_eq!(
        masters(&broker, &["q1", "q2", "q3", "q4"]).await,
        vec![Some(A.into()), Some(B.into()), Some(B.into()), Some(C.into())]
    );
    let touched_q3 = broker.calls().await.iter().any(|c| {
        matches!(c, BrokerCall::SetPolicy { policy, .. } if policy.name == "q3-ha-temp")
    });
    assert!(!touched_q3);
    assert!(broker.policies("/").await.is_empty());
}

/// **Test:** Filter Is an Exact Match
///
/// **Reason:** A filter for `orders` must not pick up `orders2`.
///
/// **Expectation:** Only `orders` is reported and considered for placement.
#[tokio::test]
async fn test_filter_matches_whole_names() {
    let broker = InMemoryBroker::builder()
        .with_nodes([A, B])
        .with_queue("/", "orders", A)
        .with_queue("/", "orders2", A)
        .build();
    let mut config = fast_config();
    config.queue_filter = "orders".to_string();
    let rebalancer = Rebalancer::new(broker.clone(), config);

    let report = rebalancer.run().await.unwrap();

    assert_eq!(report.queues.len(), 1);
    assert_eq!(report.queues[0].queue, "orders");
    assert_eq!(broker.policy_mutations().await, 0);
}

/// **Test:** Empty Selection
///
/// **Reason:** A filter matching nothing is not an error.
///
/// **Expectation:** An empty report and no broker mutation.
#[tokio::test]
async fn test_empty_selection_is_noop() {
    let broker = three_node_cluster();
    let mut config = fast_config();
    config.queue_filter = "invoices-.*".to_string();
    let rebalancer = Rebalancer::new(broker.clone(), config);

    let report = rebalancer.run().await.unwrap();

    assert!(report.queues.is_empty());
    assert!(broker.calls().await.is_empty());
}

/// **Test:** Invalid Filter Is Rejected Before Any Broker Call
///
/// **Reason:** A bad expression is a usage error, not a broker error.
///
/// **Expectation:** InvalidFilter, with no mutation recorded.
#[tokio::test]
async fn test_invalid_filter_is_rejected() {
    let broker = three_node_cluster();
    let mut config = fast_config();
    config.queue_filter = "(".to_string();
    let rebalancer = Rebalancer::new(broker.clone(), config);

    let err = rebalancer.run().await.unwrap_err();

    assert!(matches!(err, RebalanceError::InvalidFilter { .. }));
    assert!(broker.calls().await.is_empty());
}

/// **Test:** Dry Run Plans Without Mutating
///
/// **Expectation:** The planned targets match a real run and no call is recorded.
#[tokio::test]
async fn test_plan_does_not_mutate() {
    let broker = three_node_cluster();
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());

    let report = rebalancer.plan().await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.planned(), 3);
    assert_eq!(report.skipped(), 1);
    assert!(broker.calls().await.is_empty());
    assert_eq!(broker.master_of("/", "q2").await, Some(A.into()));
}

/// **Test:** Unreachable Control Plane
///
/// **Expectation:** Preflight error and no broker mutation.
#[tokio::test]
async fn test_preflight_failure() {
    let broker = InMemoryBroker::builder().with_nodes([A, B]).unavailable().build();
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());

    let err = rebalancer.run().await.unwrap_err();

    assert!(matches!(err, RebalanceError::Preflight(_)));
    assert!(broker.calls().await.is_empty());
}

/// **Test:** Single Running Node
///
/// **Reason:** Mirrored queues cannot be spread over one node.
///
/// **Expectation:** ClusterTopology reporting one node found.
#[tokio::test]
async fn test_single_running_node_is_topology_error() {
    let broker = InMemoryBroker::builder()
        .with_nodes([A])
        .with_stopped_node(B)
        .with_queue("/", "q1", A)
        .build();
    let rebalancer = Rebalancer::new(broker, fast_config());

    let err = rebalancer.run().await.unwrap_err();

    assert!(matches!(err, RebalanceError::ClusterTopology { found: 1 }));
}

/// **Test:** Cancellation Before the Run
///
/// **Expectation:** Cancelled is returned and no policy is applied.
#[tokio::test]
async fn test_cancelled_run_applies_nothing() {
    let broker = three_node_cluster();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let rebalancer = Rebalancer::new(broker.clone(), fast_config()).with_cancellation(cancel);

    let err = rebalancer.run().await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(broker.policy_mutations().await, 0);
}

/// **Test:** Failed Migration Stops the Run
///
/// **Reason:** After a failed migration the remaining queues are left alone
/// and the temporary policy is released.
///
/// **Expectation:** MigrationAborted for q2 with the policy cleared; q3 and q4
/// keep their masters.
#[tokio::test]
async fn test_failed_migration_stops_run() {
    let broker = three_node_cluster();
    broker.fail_set_policy_with_priority(992).await;
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());

    let err = rebalancer.run().await.unwrap_err();

    match &err {
        RebalanceError::MigrationAborted { queue, .. } => assert_eq!(queue, "q2"),
        other => panic!("expected MigrationAborted, got {:?}", other),
    }
    assert!(err.leftover_policy().is_none());
    assert!(broker.policies("/").await.is_empty());
    assert_eq!(
        masters(&broker, &["q3", "q4"]).await,
        vec![Some(B.into()), Some(C.into())]
    );
}

/// **Test:** Dispatch Through the Broker Client Enum
///
/// **Expectation:** The in-memory variant behaves like the broker it wraps.
#[tokio::test]
async fn test_broker_client_dispatch() {
    let broker = three_node_cluster();
    let client = BrokerClient::InMemory(broker.clone());

    assert_eq!(client.list_running_nodes().await.unwrap().len(), 3);

    let rebalancer = Rebalancer::new(client, fast_config());
    let summary = rebalancer.balance().await.unwrap();
    assert_eq!(summary.total_queues, 4);
    assert_eq!(summary.off_target, 3);

    rebalancer.run().await.unwrap();
    assert!(rebalancer.balance().await.unwrap().is_balanced());
}

/// **Test:** Leftover Cleanup Through the Rebalancer
///
/// **Expectation:** Only temporary policies are removed.
#[tokio::test]
async fn test_cleanup_removes_leftovers() {
    let broker = three_node_cluster();
    broker.fail_clear_policy(true).await;
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());

    let err = rebalancer.run().await.unwrap_err();
    assert_eq!(err.leftover_policy(), Some("q2-ha-temp"));

    broker.fail_clear_policy(false).await;
    let cleared = rebalancer.cleanup(false).await.unwrap();
    assert_eq!(cleared, vec!["q2-ha-temp".to_string()]);
    assert!(broker.policies("/").await.is_empty());
}

/// **Test:** Queue Without a Reported Master
///
/// **Reason:** A queue whose master is unknown is never on its target.
///
/// **Expectation:** It counts as unplaced, then gets migrated to its target.
#[tokio::test]
async fn test_unmastered_queue_is_migrated() {
    let broker = InMemoryBroker::builder()
        .with_nodes([A, B])
        .with_unmastered_queue("/", "q1")
        .with_queue("/", "q2", B)
        .build();
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());

    let summary = rebalancer.balance().await.unwrap();
    assert_eq!(summary.unplaced, 1);

    let report = rebalancer.run().await.unwrap();
    assert_eq!(report.migrated(), 1);
    assert_eq!(broker.master_of("/", "q1").await, Some(A.into()));
}

/// **Test:** Recovered Node Unblocks the Run
///
/// **Expectation:** After the alarm clears, the run completes.
#[tokio::test]
async fn test_recovered_node_allows_rebalance() {
    let broker = three_node_cluster();
    broker.mark_unhealthy(C).await;
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());
    assert!(rebalancer.run().await.is_err());

    broker.mark_healthy(C).await;
    let report = rebalancer.run().await.unwrap();
    assert_eq!(report.migrated(), 3);
}

/// **Test:** Node Inspection
///
/// **Expectation:** Every running node is reported with its health, and an
/// unreachable control plane fails preflight.
#[tokio::test]
async fn test_node_health_reports_every_node() {
    let broker = three_node_cluster();
    broker.mark_unhealthy(B).await;
    let rebalancer = Rebalancer::new(broker.clone(), fast_config());

    let statuses = rebalancer.node_health().await.unwrap();
    assert_eq!(statuses.len(), 3);
    assert!(statuses[0].healthy);
    assert!(!statuses[1].healthy);
    assert!(statuses[1].reason.is_some());

    broker.set_available(false).await;
    let err = rebalancer.node_health().await.unwrap_err();
    assert!(matches!(err, RebalanceError::Preflight(_)));
}
