//! Pub/Sub REST publisher
//!
//! `POST {endpoint}/v1/projects/{project}/topics/{topic}:publish` with a
//! single base64-encoded message per call.

use super::MessageBus;
use crate::config::ClientConfig;
use crate::rest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use logload_common::types::NotificationMessage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<OutboundMessage>,
}

#[derive(Serialize)]
struct OutboundMessage {
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

pub struct PubSubPublisher {
    client: Client,
    url: String,
    access_token: Option<String>,
}

impl PubSubPublisher {
    pub fn new(
        client: Client,
        endpoint: &str,
        project_id: &str,
        topic_id: &str,
        access_token: Option<String>,
    ) -> Self {
        Self {
            client,
            url: format!(
                "{}/v1/projects/{}/topics/{}:publish",
                endpoint.trim_end_matches('/'),
                project_id,
                topic_id
            ),
            access_token,
        }
    }

    pub fn from_config(config: &ClientConfig, client: Client, project_id: &str, topic_id: &str) -> Self {
        let token = if config.pubsub_emulator {
            None
        } else {
            config.access_token.clone()
        };
        Self::new(client, &config.pubsub_endpoint, project_id, topic_id, token)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MessageBus for PubSubPublisher {
    #[instrument(skip(self, message), fields(file_path = %message.file_path))]
    async fn publish(&self, message: &NotificationMessage) -> Result<String> {
        let payload = message.to_json()?;
        let body = PublishRequest {
            messages: vec![OutboundMessage {
                data: STANDARD.encode(payload),
            }],
        };

        let request = rest::authorize(self.client.post(&self.url), self.access_token.as_deref());
        let response = request
            .json(&body)
            .send()
            .await
            .context("Failed to send publish request")?;
        let response: PublishResponse = rest::check(response, "publish")
            .await?
            .json()
            .await
            .context("Failed to decode publish response")?;

        let id = response
            .message_ids
            .into_iter()
            .next()
            .context("publish response carried no message id")?;
        debug!(message_id = %id, "Published notification");
        Ok(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_url() {
        let publisher = PubSubPublisher::new(
            Client::new(),
            "https://pubsub.googleapis.com/",
            "my-project",
            "content",
            None,
        );
        assert_eq!(
            publisher.url(),
            "https://pubsub.googleapis.com/v1/projects/my-project/topics/content:publish"
        );
    }

    #[test]
    fn test_emulator_drops_token() {
        let config = ClientConfig {
            pubsub_endpoint: "http://localhost:8085".to_string(),
            pubsub_emulator: true,
            access_token: Some("secret".to_string()),
            ..ClientConfig::default()
        };
        let publisher = PubSubPublisher::from_config(&config, Client::new(), "p", "t");
        assert!(publisher.access_token.is_none());
    }
}
