use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster member identifier, as reported by the broker (e.g. `rabbit@node-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for NodeName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A queue as listed by the broker, with the node currently hosting its master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    /// `None` when the broker does not report a master (queue down or still electing).
    pub master: Option<NodeName>,
}

impl QueueInfo {
    pub fn new(name: impl Into<String>, master: Option<NodeName>) -> Self {
        Self {
            name: name.into(),
            master,
        }
    }

    pub fn is_mastered_on(&self, node: &NodeName) -> bool {
        self.master.as_ref() == Some(node)
    }
}
