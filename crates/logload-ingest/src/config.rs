//! Environment configuration for the pipeline stages and their clients
//!
//! Stage settings ([`UnpackConfig`], [`LoadConfig`]) are required and checked
//! on every invocation, before any I/O. Client settings ([`ClientConfig`])
//! all have defaults pointing at the public endpoints.

use anyhow::Context;
use logload_common::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Client Configuration Constants
// ============================================================================

/// S3-compatible XML endpoint of the object store.
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Region label sent with signed storage requests.
pub const DEFAULT_STORAGE_REGION: &str = "auto";

pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";

pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// First delay between job status polls, in milliseconds.
pub const DEFAULT_POLL_INITIAL_MS: u64 = 500;

/// Upper bound of the job status poll delay, in milliseconds.
pub const DEFAULT_POLL_MAX_MS: u64 = 10_000;

/// Default bound on waiting for a load job, in seconds (nine minutes).
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 540;

/// Settings of the unpack stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackConfig {
    pub project_id: String,
    /// Topic the per-entry notifications are published on
    pub content_topic_id: String,
    /// Bucket the extracted entries are written to
    pub dest_bucket_name: String,
}

impl UnpackConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            project_id: required(&lookup, "PROJECT_ID")?,
            content_topic_id: required(&lookup, "CONTENT_TOPIC_ID")?,
            dest_bucket_name: required(&lookup, "DEST_BUCKET_NAME")?,
        })
    }
}

/// Settings of the load stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl LoadConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            project_id: required(&lookup, "PROJECT_ID")?,
            dataset_id: required(&lookup, "DATASET_ID")?,
            table_id: required(&lookup, "TABLE_ID")?,
        })
    }
}

/// Endpoints, credentials and timing of the cloud clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub storage_endpoint: String,
    pub storage_region: String,
    /// HMAC key pair; the default AWS credential chain is used when unset
    pub storage_access_key: Option<String>,
    #[serde(skip_serializing)]
    pub storage_secret_key: Option<String>,
    pub storage_path_style: bool,
    pub pubsub_endpoint: String,
    /// Set when `PUBSUB_EMULATOR_HOST` points at a local emulator
    pub pubsub_emulator: bool,
    pub bigquery_endpoint: String,
    /// Dataset location, e.g. `asia-northeast1`
    pub bigquery_location: Option<String>,
    /// OAuth2 bearer token for the REST clients. Emulators need none.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub http_timeout_secs: u64,
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
    pub wait_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            storage_region: DEFAULT_STORAGE_REGION.to_string(),
            storage_access_key: None,
            storage_secret_key: None,
            storage_path_style: true,
            pubsub_endpoint: DEFAULT_PUBSUB_ENDPOINT.to_string(),
            pubsub_emulator: false,
            bigquery_endpoint: DEFAULT_BIGQUERY_ENDPOINT.to_string(),
            bigquery_location: None,
            access_token: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            poll_initial_ms: DEFAULT_POLL_INITIAL_MS,
            poll_max_ms: DEFAULT_POLL_MAX_MS,
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        // The emulator speaks plain HTTP and takes no credentials.
        let (pubsub_endpoint, pubsub_emulator) = match optional("PUBSUB_EMULATOR_HOST") {
            Some(host) => (format!("http://{}", host.trim()), true),
            None => (
                optional("PUBSUB_ENDPOINT").unwrap_or(defaults.pubsub_endpoint),
                false,
            ),
        };

        let config = Self {
            storage_endpoint: optional("STORAGE_ENDPOINT").unwrap_or(defaults.storage_endpoint),
            storage_region: optional("STORAGE_REGION").unwrap_or(defaults.storage_region),
            storage_access_key: optional("STORAGE_HMAC_ACCESS_KEY"),
            storage_secret_key: optional("STORAGE_HMAC_SECRET"),
            storage_path_style: parse_or(&lookup, "STORAGE_PATH_STYLE", defaults.storage_path_style)?,
            pubsub_endpoint,
            pubsub_emulator,
            bigquery_endpoint: optional("BIGQUERY_ENDPOINT").unwrap_or(defaults.bigquery_endpoint),
            bigquery_location: optional("BIGQUERY_LOCATION"),
            access_token: optional("GCP_ACCESS_TOKEN"),
            http_timeout_secs: parse_or(&lookup, "HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            poll_initial_ms: parse_or(&lookup, "JOB_POLL_INITIAL_MS", defaults.poll_initial_ms)?,
            poll_max_ms: parse_or(&lookup, "JOB_POLL_MAX_MS", defaults.poll_max_ms)?,
            wait_timeout_secs: parse_or(&lookup, "JOB_WAIT_TIMEOUT_SECS", defaults.wait_timeout_secs)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_access_key.is_some() != self.storage_secret_key.is_some() {
            return Err(PipelineError::config(
                "STORAGE_HMAC_ACCESS_KEY and STORAGE_HMAC_SECRET must be set together",
            ));
        }
        if self.http_timeout_secs == 0 || self.wait_timeout_secs == 0 {
            return Err(PipelineError::config("timeouts must be greater than 0"));
        }
        if self.poll_initial_ms == 0 || self.poll_initial_ms > self.poll_max_ms {
            return Err(PipelineError::config(format!(
                "JOB_POLL_INITIAL_MS ({}) must be in 1..=JOB_POLL_MAX_MS ({})",
                self.poll_initial_ms, self.poll_max_ms
            )));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// HTTP client shared by the REST adapters.
    pub fn http_client(&self) -> anyhow::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout())
            .build()
            .context("Failed to build HTTP client")
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(PipelineError::config(format!(
            "required environment variable {} is not set",
            name
        ))),
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::config(format!("{} has an invalid value: {}", name, raw))),
        None => Ok(default),
    }
}
