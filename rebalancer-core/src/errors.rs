use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::model::NodeName;

pub type Result<T> = std::result::Result<T, RebalanceError>;

#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error("control plane unavailable: {0}")]
    Preflight(String),

    #[error("cluster topology error: found {found} running node(s), at least 2 are required")]
    ClusterTopology { found: usize },

    #[error("node {node} failed its health check: {reason}")]
    NodeHealth { node: NodeName, reason: String },

    #[error("failed to apply temporary policy {policy} in vhost {vhost}: {reason}")]
    PolicyApply {
        policy: String,
        vhost: String,
        reason: String,
    },

    #[error(
        "queue {queue} did not converge to {target} after {attempts} attempt(s) in {elapsed:?}"
    )]
    ConvergenceTimeout {
        queue: String,
        target: NodeName,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("queue {queue} disappeared from vhost {vhost} during migration")]
    QueueVanished { vhost: String, queue: String },

    #[error("migration of queue {queue} aborted; {cleanup}")]
    MigrationAborted {
        queue: String,
        policy: String,
        #[source]
        cause: Box<RebalanceError>,
        cleanup: CleanupOutcome,
    },

    #[error("rebalance cancelled")]
    Cancelled,

    #[error("invalid queue filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("control plane error: {0}")]
    Control(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl RebalanceError {
    /// Unwraps `MigrationAborted` down to the failure that stopped the migration.
    pub fn root_cause(&self) -> &RebalanceError {
        match self {
            RebalanceError::MigrationAborted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), RebalanceError::Cancelled)
    }

    /// Name of a temporary policy that may still be applied on the broker.
    pub fn leftover_policy(&self) -> Option<&str> {
        match self {
            RebalanceError::MigrationAborted {
                policy,
                cleanup: CleanupOutcome::Failed(_),
                ..
            } => Some(policy),
            _ => None,
        }
    }
}

/// Result of the best-effort release of a temporary policy after a failed migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Cleared,
    Failed(String),
}

impl fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupOutcome::Cleared => write!(f, "temporary policy was cleared"),
            CleanupOutcome::Failed(reason) => write!(
                f,
                "temporary policy could not be cleared ({reason}), manual cleanup is required"
            ),
        }
    }
}
