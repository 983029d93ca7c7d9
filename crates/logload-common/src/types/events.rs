//! Inbound trigger payloads
//!
//! Two payload shapes start a stage:
//!
//! - [`StorageObjectEvent`]: the native "object finalized" storage event, protojson encoded
//!   (64-bit integers arrive as strings)
//! - [`PubSubPushEnvelope`]: a message-bus push envelope whose base64 `data` field holds a
//!   JSON [`NotificationMessage`]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use super::{NotificationMessage, SourceReference};
use crate::error::{PipelineError, Result};

/// Storage "object finalized" event data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageObjectEvent {
    pub bucket: String,
    pub name: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub generation: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub metageneration: Option<i64>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub time_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl StorageObjectEvent {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let event: Self = serde_json::from_slice(data)
            .map_err(|e| PipelineError::invalid_event(format!("storage event: {}", e)))?;
        if event.bucket.is_empty() || event.name.is_empty() {
            return Err(PipelineError::invalid_event(
                "storage event is missing bucket or name",
            ));
        }
        Ok(event)
    }

    pub fn source(&self) -> SourceReference {
        SourceReference::new(self.bucket.clone(), self.name.clone())
    }
}

/// Push delivery envelope of the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubSubPushEnvelope {
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    /// Base64-encoded payload
    #[serde(default)]
    pub data: String,
    // Push deliveries repeat messageId/publishTime in snake_case; those
    // duplicates are ignored as unknown fields.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ordering_key: Option<String>,
    #[serde(default)]
    pub delivery_attempt: Option<u32>,
}

impl PubSubPushEnvelope {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| PipelineError::invalid_event(format!("push envelope: {}", e)))
    }

    /// Unwrap the envelope and decode the inner notification.
    pub fn notification(&self) -> Result<NotificationMessage> {
        let raw = STANDARD
            .decode(self.message.data.trim())
            .map_err(|e| PipelineError::invalid_event(format!("message data is not base64: {}", e)))?;
        let notification: NotificationMessage = serde_json::from_slice(&raw)
            .map_err(|e| PipelineError::invalid_event(format!("message data: {}", e)))?;
        if notification.bucket.is_empty() || notification.file_path.is_empty() {
            return Err(PipelineError::invalid_event(
                "notification is missing bucket or filePath",
            ));
        }
        Ok(notification)
    }

    pub fn source(&self) -> Result<SourceReference> {
        self.notification().map(|n| SourceReference::from(&n))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Number(i64),
    String(String),
}

fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<StringOrNumber>::deserialize(deserializer)? {
        None => Ok(None),
        Some(StringOrNumber::Number(n)) => Ok(Some(n)),
        Some(StringOrNumber::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match lenient_i64(deserializer)? {
        None => Ok(None),
        Some(n) => u64::try_from(n).map(Some).map_err(serde::de::Error::custom),
    }
}
