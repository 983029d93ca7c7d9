//! BigQuery REST adapter
//!
//! Submits the script with `jobs.insert` as a standard-SQL query job with
//! named parameters, then polls `jobs.get` with exponential backoff until
//! the job state is `DONE`.

use super::{JobHandle, JobOutcome, Warehouse};
use crate::config::ClientConfig;
use crate::load::{LoadScript, ParameterValue, ScriptParameter};
use crate::rest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const DONE: &str = "DONE";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertJob<'a> {
    job_reference: JobReference,
    configuration: JobConfiguration<'a>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Debug, Serialize)]
struct JobConfiguration<'a> {
    query: QueryConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryConfiguration<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<QueryParameter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameter {
    name: String,
    parameter_type: ParameterType,
    parameter_value: ParameterValueWire,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterType {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_type: Option<Box<ParameterType>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterValueWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_values: Option<Vec<ParameterValueWire>>,
}

impl From<&ScriptParameter> for QueryParameter {
    fn from(parameter: &ScriptParameter) -> Self {
        let string = || ParameterType {
            kind: "STRING",
            array_type: None,
        };
        let (parameter_type, parameter_value) = match &parameter.value {
            ParameterValue::String(value) => (
                string(),
                ParameterValueWire {
                    value: Some(value.clone()),
                    array_values: None,
                },
            ),
            ParameterValue::StringArray(values) => (
                ParameterType {
                    kind: "ARRAY",
                    array_type: Some(Box::new(string())),
                },
                ParameterValueWire {
                    value: None,
                    array_values: Some(
                        values
                            .iter()
                            .map(|v| ParameterValueWire {
                                value: Some(v.clone()),
                                array_values: None,
                            })
                            .collect(),
                    ),
                },
            ),
        };
        Self {
            name: parameter.name.clone(),
            parameter_type,
            parameter_value,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: Option<JobReference>,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: Option<String>,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

impl JobStatus {
    fn outcome(&self) -> Option<JobOutcome> {
        if self.state.as_deref() != Some(DONE) {
            return None;
        }
        Some(match &self.error_result {
            None => JobOutcome::Succeeded,
            Some(error) => JobOutcome::Failed {
                reason: error.reason.clone(),
                message: error
                    .message
                    .clone()
                    .unwrap_or_else(|| "job failed without a message".to_string()),
            },
        })
    }
}

// ============================================================================
// Adapter
// ============================================================================

pub struct BigQueryWarehouse {
    client: Client,
    jobs_url: String,
    project_id: String,
    location: Option<String>,
    access_token: Option<String>,
    poll_initial: Duration,
    poll_max: Duration,
}

impl BigQueryWarehouse {
    pub fn new(client: Client, endpoint: &str, project_id: impl Into<String>) -> Self {
        let project_id = project_id.into();
        Self {
            client,
            jobs_url: format!(
                "{}/bigquery/v2/projects/{}/jobs",
                endpoint.trim_end_matches('/'),
                project_id
            ),
            project_id,
            location: None,
            access_token: None,
            poll_initial: Duration::from_millis(crate::config::DEFAULT_POLL_INITIAL_MS),
            poll_max: Duration::from_millis(crate::config::DEFAULT_POLL_MAX_MS),
        }
    }

    pub fn from_config(config: &ClientConfig, client: Client, project_id: &str) -> Self {
        Self::new(client, &config.bigquery_endpoint, project_id)
            .with_location(config.bigquery_location.clone())
            .with_access_token(config.access_token.clone())
            .with_polling(
                Duration::from_millis(config.poll_initial_ms),
                Duration::from_millis(config.poll_max_ms),
            )
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn with_polling(mut self, initial: Duration, max: Duration) -> Self {
        self.poll_initial = initial;
        self.poll_max = max.max(initial);
        self
    }

    async fn get_status(&self, job: &JobHandle) -> Result<JobStatus> {
        let url = format!("{}/{}", self.jobs_url, job.job_id);
        let mut request = self.client.get(&url);
        if let Some(ref location) = job.location {
            request = request.query(&[("location", location)]);
        }

        let response = rest::authorize(request, self.access_token.as_deref())
            .send()
            .await
            .context("Failed to send jobs.get request")?;
        let resource: JobResource = rest::check(response, "jobs.get")
            .await?
            .json()
            .await
            .context("Failed to decode jobs.get response")?;
        Ok(resource.status)
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    #[instrument(skip(self, script), fields(staging = %script.staging_table))]
    async fn submit(&self, script: &LoadScript) -> Result<JobHandle> {
        let body = InsertJob {
            job_reference: JobReference {
                project_id: self.project_id.clone(),
                job_id: format!("job_{}", Uuid::now_v7().simple()),
                location: self.location.clone(),
            },
            configuration: JobConfiguration {
                query: QueryConfiguration {
                    query: &script.sql,
                    use_legacy_sql: false,
                    parameter_mode: "NAMED",
                    query_parameters: script.parameters.iter().map(QueryParameter::from).collect(),
                },
            },
        };

        let request = rest::authorize(self.client.post(&self.jobs_url), self.access_token.as_deref());
        let response = request
            .json(&body)
            .send()
            .await
            .context("Failed to send jobs.insert request")?;
        let resource: JobResource = rest::check(response, "jobs.insert")
            .await?
            .json()
            .await
            .context("Failed to decode jobs.insert response")?;

        // The service may normalize the location; prefer what it echoes back.
        let reference = resource.job_reference.unwrap_or(body.job_reference);
        info!(job_id = %reference.job_id, "Query job inserted");
        Ok(JobHandle {
            job_id: reference.job_id,
            location: reference.location.or_else(|| self.location.clone()),
        })
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    async fn wait(&self, job: &JobHandle) -> Result<JobOutcome> {
        let mut delay = self.poll_initial;
        loop {
            let status = self.get_status(job).await?;
            if let Some(outcome) = status.outcome() {
                debug!(?outcome, "Job reached terminal state");
                return Ok(outcome);
            }

            debug!(state = ?status.state, next_poll_ms = delay.as_millis() as u64, "Job still running");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.poll_max);
        }
    }
}
