use anyhow::{Context, Result};
use clap::Args;
use rebalancer_core::{BrokerClient, ManagementClientConfig, RebalanceConfig};
use std::path::PathBuf;

/// Management API connection flags, falling back to the RABBITMQ_MGMT_* env vars
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    #[arg(long, help = "Management API endpoint (env RABBITMQ_MGMT_ENDPOINT)")]
    pub endpoint: Option<String>,
    #[arg(long, help = "Management API user (env RABBITMQ_MGMT_USER)")]
    pub username: Option<String>,
    #[arg(long, default_value_t = 10_000, help = "Per-request timeout in milliseconds")]
    pub request_timeout_ms: u64,
}

impl ConnectionArgs {
    pub fn client_config(&self) -> ManagementClientConfig {
        let mut config = ManagementClientConfig::default();
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(username) = &self.username {
            config.username = username.clone();
        }
        config.request_timeout_ms = self.request_timeout_ms;
        config
    }
}

pub fn connect(args: &ConnectionArgs) -> Result<BrokerClient> {
    let config = args.client_config();
    let endpoint = config.endpoint.clone();
    BrokerClient::management(config)
        .with_context(|| format!("failed to create management client for {endpoint}"))
}

/// Queue selection flags, layered over an optional YAML file
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[arg(long, help = "Path to a YAML rebalance config file")]
    pub config: Option<PathBuf>,
    #[arg(long, help = "Virtual host (default /)")]
    pub vhost: Option<String>,
    #[arg(long, help = "Queue name filter, matched against the whole name (default .*)")]
    pub filter: Option<String>,
}

impl RunArgs {
    /// Loads the config file when given, then applies the flag overrides.
    pub fn load(&self) -> Result<RebalanceConfig> {
        let mut config = match &self.config {
            Some(path) => RebalanceConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => RebalanceConfig::default(),
        };

        if let Some(vhost) = &self.vhost {
            config.vhost = vhost.clone();
        }
        if let Some(filter) = &self.filter {
            config.queue_filter = filter.clone();
        }
        Ok(config)
    }
}
