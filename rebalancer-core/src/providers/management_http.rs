use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::ManagementClientConfig;
use crate::control::BrokerControl;
use crate::errors::{RebalanceError, Result};
use crate::model::{NodeName, QueueInfo};
use crate::policy::PolicySpec;

/// Broker control over the RabbitMQ management HTTP API.
#[derive(Clone, Debug)]
pub struct ManagementClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct NodeDto {
    name: String,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    mem_alarm: bool,
    #[serde(default)]
    disk_free_alarm: bool,
}

#[derive(Debug, Deserialize)]
struct QueueDto {
    name: String,
    // master node of a mirrored classic queue
    node: Option<String>,
}

impl ManagementClient {
    pub fn new(config: ManagementClientConfig) -> Result<Self> {
        // Accept either full URL (http/https) or host:port; default to http if no scheme
        let endpoint =
            if config.endpoint.starts_with("http://") || config.endpoint.starts_with("https://") {
                config.endpoint.clone()
            } else {
                format!("http://{}", config.endpoint)
            };

        let base = Url::parse(&endpoint).map_err(|e| {
            RebalanceError::InvalidConfig(format!("invalid management endpoint {endpoint}: {e}"))
        })?;
        if base.cannot_be_a_base() {
            return Err(RebalanceError::InvalidConfig(format!(
                "management endpoint {endpoint} cannot be used as a base URL"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base,
            username: config.username,
            password: config.password,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.base.as_str()
    }

    /// Builds `<base>/api/<segments...>`, percent-encoding each segment so
    /// that the default vhost `/` becomes `%2F`.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RebalanceError::InvalidConfig("endpoint cannot be a base".into()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments)?;
        debug!(url = %url, "GET");
        let resp = self
            .request(Method::GET, url)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn send_json(
        &self,
        method: Method,
        segments: &[&str],
        body: serde_json::Value,
    ) -> Result<()> {
        let url = self.url(segments)?;
        debug!(url = %url, method = %method, "sending request");
        self.request(method, url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl BrokerControl for ManagementClient {
    async fn preflight(&self) -> Result<()> {
        self.get_json::<serde_json::Value>(&["overview"])
            .await
            .map(|_| ())
            .map_err(|e| RebalanceError::Preflight(format!("{}: {e}", self.endpoint())))
    }

    async fn list_running_nodes(&self) -> Result<Vec<NodeName>> {
        let nodes: Vec<NodeDto> = self.get_json(&["nodes"]).await?;
        Ok(nodes
            .into_iter()
            .filter(|n| n.running)
            .map(|n| NodeName::from(n.name))
            .collect())
    }

    async fn health_check(&self, node: &NodeName) -> Result<()> {
        let info: NodeDto = self.get_json(&["nodes", node.as_str()]).await?;

        if !info.running {
            return Err(RebalanceError::Control(format!("node {} is not running", info.name)));
        }
        if info.mem_alarm || info.disk_free_alarm {
            return Err(RebalanceError::Control(format!(
                "node {} has an active alarm (memory: {}, disk: {})",
                info.name, info.mem_alarm, info.disk_free_alarm
            )));
        }
        Ok(())
    }

    async fn list_queues(&self, vhost: &str) -> Result<Vec<QueueInfo>> {
        let mut url = self.url(&["queues", vhost])?;
        url.query_pairs_mut().append_pair("columns", "name,node");

        let queues: Vec<QueueDto> = self
            .request(Method::GET, url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(queues
            .into_iter()
            .map(|q| QueueInfo::new(q.name, q.node.map(NodeName::from)))
            .collect())
    }

    async fn set_policy(&self, vhost: &str, policy: &PolicySpec) -> Result<()> {
        let body = json!({
            "pattern": policy.pattern,
            "definition": policy.definition,
            "priority": policy.priority,
            "apply-to": policy.apply_to,
        });
        self.send_json(Method::PUT, &["policies", vhost, &policy.name], body)
            .await
    }

    async fn clear_policy(&self, vhost: &str, name: &str) -> Result<()> {
        let url = self.url(&["policies", vhost, name])?;
        let resp = self.request(Method::DELETE, url).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(policy = %name, "policy already absent");
            return Ok(());
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn sync_queue(&self, vhost: &str, queue: &str) -> Result<()> {
        self.send_json(
            Method::POST,
            &["queues", vhost, queue, "actions"],
            json!({ "action": "sync" }),
        )
        .await
    }

    async fn list_policies(&self, vhost: &str) -> Result<Vec<PolicySpec>> {
        self.get_json(&["policies", vhost]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(endpoint: &str) -> ManagementClient {
        ManagementClient::new(ManagementClientConfig {
            endpoint: endpoint.to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            request_timeout_ms: 1000,
        })
        .unwrap()
    }

    #[test]
    fn test_default_vhost_is_percent_encoded() {
        let client = test_client("http://127.0.0.1:15672");
        let url = client.url(&["queues", "/"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:15672/api/queues/%2F");
    }

    #[test]
    fn test_endpoint_without_scheme_and_with_prefix() {
        let client = test_client("broker.internal:15672");
        assert_eq!(client.endpoint(), "http://broker.internal:15672/");
        let url = client.url(&["policies", "prod", "orders-ha-temp"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://broker.internal:15672/api/policies/prod/orders-ha-temp"
        );

        let client = test_client("https://proxy.local/rabbit/");
        let url = client.url(&["nodes"]).unwrap();
        assert_eq!(url.as_str(), "https://proxy.local/rabbit/api/nodes");
    }

    #[test]
    fn test_policy_listing_decodes_apply_to() {
        let raw = r#"[{"vhost":"/","name":"orders-ha-temp","pattern":"^orders$",
            "apply-to":"queues","definition":{"ha-mode":"exactly","ha-params":1},"priority":990}]"#;
        let policies: Vec<PolicySpec> = serde_json::from_str(raw).unwrap();
        assert_eq!(policies[0].name, "orders-ha-temp");
        assert_eq!(policies[0].apply_to, "queues");
        assert_eq!(policies[0].priority, 990);
    }

    #[test]
    fn test_queue_listing_tolerates_missing_master() {
        let raw = r#"[{"name":"a","node":"rabbit@n1"},{"name":"b"}]"#;
        let queues: Vec<QueueDto> = serde_json::from_str(raw).unwrap();
        assert_eq!(queues[0].node.as_deref(), Some("rabbit@n1"));
        assert!(queues[1].node.is_none());
    }
}
