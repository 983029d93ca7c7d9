//! CloudEvents over HTTP
//!
//! Binary mode carries the attributes in `ce-*` headers and the data as the
//! body. Structured mode (`application/cloudevents+json`) carries both in one
//! JSON document. A plain push request without either is taken as bare data.

use crate::error::{ServerError, ServerResult};
use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::Deserialize;

const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudEvent {
    pub id: Option<String>,
    pub source: Option<String>,
    pub event_type: Option<String>,
    pub subject: Option<String>,
    pub data: Bytes,
}

#[derive(Deserialize)]
struct StructuredEvent {
    id: Option<String>,
    source: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    subject: Option<String>,
    data: Option<serde_json::Value>,
    data_base64: Option<String>,
}

impl CloudEvent {
    pub fn from_http(headers: &HeaderMap, body: Bytes) -> ServerResult<Self> {
        if is_structured(headers) {
            return Self::structured(&body);
        }

        Ok(Self {
            id: ce_header(headers, "ce-id"),
            source: ce_header(headers, "ce-source"),
            event_type: ce_header(headers, "ce-type"),
            subject: ce_header(headers, "ce-subject"),
            data: body,
        })
    }

    fn structured(body: &[u8]) -> ServerResult<Self> {
        let event: StructuredEvent = serde_json::from_slice(body)
            .map_err(|e| ServerError::BadRequest(format!("structured cloud event: {}", e)))?;

        let data = match (event.data, event.data_base64) {
            (_, Some(encoded)) => STANDARD
                .decode(encoded.trim())
                .map(Bytes::from)
                .map_err(|e| ServerError::BadRequest(format!("data_base64: {}", e)))?,
            (Some(serde_json::Value::String(text)), None) => Bytes::from(text),
            (Some(value), None) => serde_json::to_vec(&value)
                .map(Bytes::from)
                .map_err(|e| ServerError::BadRequest(format!("data: {}", e)))?,
            (None, None) => {
                return Err(ServerError::BadRequest(
                    "structured cloud event carries no data".to_string(),
                ))
            },
        };

        Ok(Self {
            id: event.id,
            source: event.source,
            event_type: event.event_type,
            subject: event.subject,
            data,
        })
    }
}

fn is_structured(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with(STRUCTURED_CONTENT_TYPE))
}

fn ce_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_binary_mode() {
        let mut headers = HeaderMap::new();
        headers.insert("ce-id", HeaderValue::from_static("123"));
        headers.insert(
            "ce-type",
            HeaderValue::from_static("google.cloud.storage.object.v1.finalized"),
        );
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = Bytes::from_static(br#"{"bucket":"b","name":"a.zip"}"#);
        let event = CloudEvent::from_http(&headers, body.clone()).unwrap();
        assert_eq!(event.id.as_deref(), Some("123"));
        assert_eq!(
            event.event_type.as_deref(),
            Some("google.cloud.storage.object.v1.finalized")
        );
        assert_eq!(event.data, body);
    }

    #[test]
    fn test_structured_mode_json_data() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/cloudevents+json; charset=utf-8"),
        );
        let body = json!({
            "specversion": "1.0",
            "id": "9",
            "source": "//storage.googleapis.com/projects/_/buckets/b",
            "type": "google.cloud.storage.object.v1.finalized",
            "subject": "objects/a.zip",
            "data": {"bucket": "b", "name": "a.zip"}
        });

        let event =
            CloudEvent::from_http(&headers, Bytes::from(serde_json::to_vec(&body).unwrap())).unwrap();
        assert_eq!(event.subject.as_deref(), Some("objects/a.zip"));
        let data: serde_json::Value = serde_json::from_slice(&event.data).unwrap();
        assert_eq!(data, json!({"bucket": "b", "name": "a.zip"}));
    }

    #[test]
    fn test_structured_mode_base64_data() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(STRUCTURED_CONTENT_TYPE));
        let body = json!({"id": "1", "data_base64": STANDARD.encode(b"raw")});

        let event =
            CloudEvent::from_http(&headers, Bytes::from(serde_json::to_vec(&body).unwrap())).unwrap();
        assert_eq!(event.data, Bytes::from_static(b"raw"));
    }

    #[test]
    fn test_structured_mode_without_data() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(STRUCTURED_CONTENT_TYPE));

        let err = CloudEvent::from_http(&headers, Bytes::from_static(br#"{"id":"1"}"#)).unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }
}
