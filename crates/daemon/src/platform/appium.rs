use super::{HealthProbe, NodeHealth};
use async_trait::async_trait;
use common::node_url;
use std::time::Duration;
use tracing::trace;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Asks `GET <node>/status`. Any HTTP answer means the node is up.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpHealthProbe {
    pub fn new(host: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn status(&self, port: u16) -> NodeHealth {
        let url = format!("{}/status", node_url(&self.host, port));
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                trace!(port, error = %err, "node unreachable");
                return NodeHealth::Unreachable;
            }
        };
        match response.text().await {
            Ok(body) => NodeHealth::Up(body),
            Err(err) => {
                trace!(port, error = %err, "node status body unreadable");
                NodeHealth::Unreachable
            }
        }
    }
}
