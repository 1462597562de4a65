//! Queue depth lookups through the RabbitMQ management HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::config::ManagementSettings;
use crate::error::ProbeError;
use crate::queue::QueueDepth;

/// Reads the ready/unacked depth of a queue.
#[async_trait]
pub trait QueueStatusProbe: Send + Sync {
    async fn queue_status(&self, queue: &str) -> Result<QueueDepth, ProbeError>;
}

/// The subset of `GET /api/queues/{vhost}/{name}` we read.
#[derive(Debug, Deserialize)]
struct QueueResponse {
    #[serde(default)]
    messages_ready: u64,
    #[serde(default)]
    messages_unacknowledged: u64,
}

/// Management API client scoped to one virtual host.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    client: Client,
    base_url: Url,
    vhost: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl ManagementClient {
    pub fn new(settings: &ManagementSettings, timeout: Duration) -> Result<Self, ProbeError> {
        let base_url =
            Url::parse(&settings.base_url()).map_err(|e| ProbeError::Url(e.to_string()))?;

        let client = Client::builder().timeout(timeout).gzip(true).build()?;

        Ok(Self {
            client,
            base_url,
            vhost: settings.vhost.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            timeout,
        })
    }

    /// URL of the queue resource; the vhost is a single encoded segment (`/` becomes `%2F`).
    pub fn queue_url(&self, queue: &str) -> Result<Url, ProbeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProbeError::Url(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "queues", self.vhost.as_str(), queue]);
        Ok(url)
    }
}

#[async_trait]
impl QueueStatusProbe for ManagementClient {
    async fn queue_status(&self, queue: &str) -> Result<QueueDepth, ProbeError> {
        let url = self.queue_url(queue)?;

        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let parsed: QueueResponse = serde_json::from_slice(&body)?;

        let depth = QueueDepth {
            ready: parsed.messages_ready,
            unacked: parsed.messages_unacknowledged,
        };

        info!(
            queue = queue,
            ready = depth.ready,
            unacked = depth.unacked,
            "rabbitmq_queue_status"
        );

        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(vhost: &str) -> ManagementSettings {
        ManagementSettings {
            host: "localhost".to_string(),
            port: Some(15672),
            vhost: vhost.to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
        }
    }

    #[test]
    fn test_queue_url_encodes_default_vhost() {
        let client = ManagementClient::new(&settings("/"), Duration::from_secs(3)).unwrap();
        let url = client.queue_url("transactionalQueue").unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:15672/api/queues/%2F/transactionalQueue"
        );
    }

    #[test]
    fn test_queue_url_named_vhost() {
        let client = ManagementClient::new(&settings("dosomething"), Duration::from_secs(3)).unwrap();
        let url = client.queue_url("userAPICampaignActivityQueue").unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:15672/api/queues/dosomething/userAPICampaignActivityQueue"
        );
    }

    #[test]
    fn test_client_rejects_unusable_host() {
        let mut bad = settings("/");
        bad.host = "local host".to_string();

        let result = ManagementClient::new(&bad, Duration::from_secs(3));

        assert!(matches!(result, Err(ProbeError::Url(_))));
    }

    #[test]
    fn test_queue_response_parsing() {
        let body = r#"{"name":"q","messages_ready":12,"messages_unacknowledged":3,"consumers":1}"#;
        let parsed: QueueResponse = serde_json::from_str(body).unwrap();

        assert_eq!(parsed.messages_ready, 12);
        assert_eq!(parsed.messages_unacknowledged, 3);
    }

    #[test]
    fn test_queue_response_missing_counts_default_to_zero() {
        let parsed: QueueResponse = serde_json::from_str(r#"{"name":"idle"}"#).unwrap();

        assert_eq!(parsed.messages_ready, 0);
        assert_eq!(parsed.messages_unacknowledged, 0);
    }
}
