use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{RebalanceError, Result};
use crate::policy::{
    HaSyncMode, DEFAULT_PIN_PRIORITY, DEFAULT_SHED_PRIORITY, DEFAULT_TEMP_POLICY_SUFFIX,
};
use crate::watcher::RetryPolicy;

/// Rebalancing run configuration, loadable from YAML.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Namespace whose queues are rebalanced
    pub vhost: String,
    /// Regular expression matched against the whole queue name
    pub queue_filter: String,
    /// Temporary policy settings
    pub policy: TemporaryPolicyConfig,
    /// Convergence polling settings
    pub convergence: ConvergenceConfig,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            vhost: "/".to_string(),
            queue_filter: ".*".to_string(),
            policy: TemporaryPolicyConfig::default(),
            convergence: ConvergenceConfig::default(),
        }
    }
}

impl RebalanceConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| RebalanceError::InvalidConfig(format!("failed to parse YAML: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RebalanceError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vhost.is_empty() {
            return Err(RebalanceError::InvalidConfig("vhost must not be empty".into()));
        }
        self.policy.validate()?;
        self.convergence.validate()
    }
}

/// Settings of the `<queue><suffix>` policy applied during a migration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TemporaryPolicyConfig {
    pub suffix: String,
    pub shed_priority: i32,
    pub pin_priority: i32,
    pub ha_sync_mode: HaSyncMode,
}

impl Default for TemporaryPolicyConfig {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_TEMP_POLICY_SUFFIX.to_string(),
            shed_priority: DEFAULT_SHED_PRIORITY,
            pin_priority: DEFAULT_PIN_PRIORITY,
            ha_sync_mode: HaSyncMode::Automatic,
        }
    }
}

impl TemporaryPolicyConfig {
    fn validate(&self) -> Result<()> {
        if self.suffix.is_empty() {
            return Err(RebalanceError::InvalidConfig(
                "temporary policy suffix must not be empty".into(),
            ));
        }
        if self.pin_priority <= self.shed_priority {
            return Err(RebalanceError::InvalidConfig(format!(
                "pin priority ({}) must be greater than shed priority ({})",
                self.pin_priority, self.shed_priority
            )));
        }
        Ok(())
    }
}

/// Convergence polling settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Delay between two master lookups (milliseconds)
    pub poll_interval_ms: u64,
    /// Give up after this many lookups (None = no attempt limit)
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed (None = no deadline)
    pub timeout_seconds: Option<u64>,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_attempts: Some(120),
            timeout_seconds: Some(600),
        }
    }
}

impl ConvergenceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_attempts,
            timeout: self.timeout_seconds.map(Duration::from_secs),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(RebalanceError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }
        if matches!(self.max_attempts, Some(0)) {
            return Err(RebalanceError::InvalidConfig(
                "max attempts must be greater than zero".into(),
            ));
        }
        if self.max_attempts.is_none() && self.timeout_seconds.is_none() {
            return Err(RebalanceError::InvalidConfig(
                "convergence polling needs a max attempt count or a timeout".into(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the broker management API
#[derive(Clone, Debug)]
pub struct ManagementClientConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub request_timeout_ms: u64,
}

impl Default for ManagementClientConfig {
    fn default() -> Self {
        Self {
            endpoint: std::env::var("RABBITMQ_MGMT_ENDPOINT")
                .unwrap_or_else(|_| "http://127.0.0.1:15672".to_string()),
            username: std::env::var("RABBITMQ_MGMT_USER").unwrap_or_else(|_| "guest".to_string()),
            password: std::env::var("RABBITMQ_MGMT_PASSWORD")
                .unwrap_or_else(|_| "guest".to_string()),
            request_timeout_ms: 10_000,
        }
    }
}
