//! Common types used across logload

use serde::{Deserialize, Serialize};

pub mod events;

pub use events::{PubSubMessage, PubSubPushEnvelope, StorageObjectEvent};

/// URI scheme used when handing object locations to the warehouse.
pub const OBJECT_URI_SCHEME: &str = "gs://";

/// Identifies exactly one object in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceReference {
    pub bucket: String,
    pub path: String,
}

impl SourceReference {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// `gs://{bucket}/{path}`
    pub fn uri(&self) -> String {
        format!("{}{}/{}", OBJECT_URI_SCHEME, self.bucket, self.path)
    }
}

impl std::fmt::Display for SourceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri())
    }
}

impl From<&NotificationMessage> for SourceReference {
    fn from(message: &NotificationMessage) -> Self {
        Self::new(message.bucket.clone(), message.file_path.clone())
    }
}

/// Payload chaining the unpack stage to the load stage.
///
/// Serialized as `{"bucket": "...", "filePath": "..."}`; downstream consumers
/// expect exactly that shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub bucket: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
}

impl NotificationMessage {
    pub fn new(bucket: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            file_path: file_path.into(),
        }
    }

    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| crate::PipelineError::invalid_event(format!("encode message: {}", e)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_shape() {
        let message = NotificationMessage::new("dest-bucket", "test.zip/test.tgz");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"bucket": "dest-bucket", "filePath": "test.zip/test.tgz"})
        );
    }

    #[test]
    fn test_source_uri() {
        let source = SourceReference::new("src-bucket", "test.zip/test.tgz/test.csv");
        assert_eq!(source.uri(), "gs://src-bucket/test.zip/test.tgz/test.csv");
    }
}
