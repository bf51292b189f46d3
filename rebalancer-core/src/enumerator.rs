use regex::Regex;
use tracing::info;

use crate::control::BrokerControl;
use crate::errors::{RebalanceError, Result};
use crate::model::QueueInfo;

/// Queue selection filter, matched against the whole queue name.
///
/// `orders` selects the queue `orders` only, never `orders2`; use `orders.*`
/// to select by prefix.
#[derive(Debug, Clone)]
pub struct QueueFilter {
    expression: String,
    // None selects every queue
    regex: Option<Regex>,
}

impl QueueFilter {
    pub fn new(expression: &str) -> Result<Self> {
        if expression.is_empty() || expression == ".*" {
            return Ok(Self::match_all());
        }

        let regex = Regex::new(&format!("^(?:{expression})$")).map_err(|e| {
            RebalanceError::InvalidFilter {
                filter: expression.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            expression: expression.to_string(),
            regex: Some(regex),
        })
    }

    pub fn match_all() -> Self {
        Self {
            expression: ".*".to_string(),
            regex: None,
        }
    }

    pub fn matches(&self, queue_name: &str) -> bool {
        self.regex
            .as_ref()
            .map_or(true, |regex| regex.is_match(queue_name))
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }
}

impl Default for QueueFilter {
    fn default() -> Self {
        Self::match_all()
    }
}

/// Lists the queues of `vhost` selected by `filter`, in broker order.
pub async fn enumerate_queues<C>(
    client: &C,
    vhost: &str,
    filter: &QueueFilter,
) -> Result<Vec<QueueInfo>>
where
    C: BrokerControl + ?Sized,
{
    let all = client.list_queues(vhost).await?;
    let total = all.len();

    let selected: Vec<QueueInfo> = all.into_iter().filter(|q| filter.matches(&q.name)).collect();

    info!(
        vhost = %vhost,
        filter = %filter.as_str(),
        total = total,
        selected = selected.len(),
        "enumerated queues"
    );
    Ok(selected)
}
