use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::model::NodeName;

/// Suffix appended to the queue name to form the temporary policy name.
pub const DEFAULT_TEMP_POLICY_SUFFIX: &str = "-ha-temp";

/// Priority of the shed phase policy (keep exactly one mirror).
pub const DEFAULT_SHED_PRIORITY: i32 = 990;

/// Priority of the pin phase policy. Must stay above the shed priority so the
/// broker always resolves the pin over a lingering shed definition.
pub const DEFAULT_PIN_PRIORITY: i32 = 992;

/// How mirrors catch up once the policy lands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaSyncMode {
    #[default]
    Automatic,
    Manual,
}

impl HaSyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaSyncMode::Automatic => "automatic",
            HaSyncMode::Manual => "manual",
        }
    }
}

/// Replication directive carried by a policy definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaDirective {
    /// `ha-mode: exactly`, keep `count` replicas (master included).
    Exactly(u32),
    /// `ha-mode: nodes`, restrict replicas to the listed nodes.
    Nodes(Vec<NodeName>),
}

impl HaDirective {
    pub fn to_definition(&self, sync_mode: HaSyncMode) -> Value {
        match self {
            HaDirective::Exactly(count) => json!({
                "ha-mode": "exactly",
                "ha-params": count,
                "ha-sync-mode": sync_mode.as_str(),
            }),
            HaDirective::Nodes(nodes) => json!({
                "ha-mode": "nodes",
                "ha-params": nodes,
                "ha-sync-mode": sync_mode.as_str(),
            }),
        }
    }

    /// Reads the directive back out of a policy definition, if it carries one.
    pub fn from_definition(definition: &Value) -> Option<Self> {
        match definition.get("ha-mode")?.as_str()? {
            "exactly" => {
                let count = definition.get("ha-params")?.as_u64()?;
                Some(HaDirective::Exactly(u32::try_from(count).ok()?))
            }
            "nodes" => {
                let nodes = definition
                    .get("ha-params")?
                    .as_array()?
                    .iter()
                    .filter_map(|n| n.as_str().map(NodeName::from))
                    .collect();
                Some(HaDirective::Nodes(nodes))
            }
            _ => None,
        }
    }
}

/// A broker policy as written to and read from the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    pub pattern: String,
    pub priority: i32,
    #[serde(rename = "apply-to", default = "default_apply_to")]
    pub apply_to: String,
    pub definition: Value,
}

fn default_apply_to() -> String {
    "queues".to_string()
}

/// The per-queue policy used to force a master migration.
///
/// Both phases share one name, so applying the pin replaces the shed
/// definition in place and clearing by name removes whichever is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryPolicy {
    name: String,
    pattern: String,
}

impl TemporaryPolicy {
    pub fn for_queue(queue: &str, suffix: &str) -> Self {
        Self {
            name: format!("{queue}{suffix}"),
            pattern: format!("^{}$", regex::escape(queue)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Phase 1: drop to a single replica so the pin becomes a single-hop move.
    pub fn shed(&self, priority: i32, sync_mode: HaSyncMode) -> PolicySpec {
        self.spec(priority, HaDirective::Exactly(1).to_definition(sync_mode))
    }

    /// Phase 2: pin the replica set to the target node only.
    pub fn pin(&self, target: &NodeName, priority: i32, sync_mode: HaSyncMode) -> PolicySpec {
        self.spec(
            priority,
            HaDirective::Nodes(vec![target.clone()]).to_definition(sync_mode),
        )
    }

    fn spec(&self, priority: i32, definition: Value) -> PolicySpec {
        PolicySpec {
            name: self.name.clone(),
            pattern: self.pattern.clone(),
            priority,
            apply_to: default_apply_to(),
            definition,
        }
    }
}

pub fn is_temporary_policy(name: &str, suffix: &str) -> bool {
    name.len() > suffix.len() && name.ends_with(suffix)
}
