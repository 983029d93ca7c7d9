//! Load script rendering
//!
//! One script per load: create a uniquely named staging table, load the
//! tab-delimited source file into it, transform the rows into the target
//! table, drop the staging table. The source URI only ever travels as the
//! `source_uris` query parameter.

use logload_common::{types::SourceReference, PipelineError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the bound parameter carrying the source file URI.
pub const SOURCE_URIS_PARAM: &str = "source_uris";

/// Columns of the staging table, in file order.
pub const STAGING_SCHEMA: &[(&str, &str)] = &[
    ("request_date", "STRING"),
    ("request_time", "TIME"),
    ("protocol", "STRING"),
    ("client_ip", "STRING"),
    ("group_name", "STRING"),
    ("account_name", "STRING"),
    ("reserved_1", "STRING"),
    ("transfer_status", "STRING"),
    ("reserved_2", "STRING"),
    ("status_code", "INT64"),
    ("fqdn", "STRING"),
    ("transfer_time_ms", "INT64"),
    ("request_length", "INT64"),
    ("response_length", "INT64"),
    ("file_type", "STRING"),
    ("content_type", "STRING"),
    ("categorization_reason", "STRING"),
    ("determination_category", "STRING"),
    ("reserved_4", "STRING"),
    ("reserved_5", "STRING"),
    ("reserved_6", "STRING"),
    ("request_url", "STRING"),
    ("reserved_7", "STRING"),
    ("reserved_8", "STRING"),
    ("reserved_9", "STRING"),
];

/// Columns written to the target table.
pub const TARGET_COLUMNS: &[&str] = &[
    "request_time",
    "protocol",
    "group_name",
    "account_name",
    "transfer_status",
    "status_code",
    "fqdn",
    "transfer_time_ms",
    "request_length",
    "response_length",
    "file_type",
    "content_type",
    "categorization_reason",
    "determination_category",
    "request_url",
];

/// Source rows carry local (JST) wall-clock time.
const SOURCE_TIME_ZONE: &str = "Asia/Tokyo";

/// Columns where a lone `-` means "no value".
const DASH_IS_NULL: &[&str] = &["file_type", "content_type"];

/// Name of a staging table. Interpolated into the script, so restricted to
/// characters that are safe inside a backtick-quoted identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StagingId(String);

impl StagingId {
    /// A fresh id; UUIDv7 keeps ids unique across concurrent loads.
    pub fn generate() -> Self {
        Self(format!("staging_{}", Uuid::now_v7().simple()))
    }

    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= 1024
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(PipelineError::config(format!(
                "invalid staging table id: {:?}",
                raw
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StagingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StagingId {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<StagingId> for String {
    fn from(id: StagingId) -> Self {
        id.0
    }
}

/// Everything one load invocation needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadJobSpec {
    pub dataset: String,
    pub table: String,
    pub staging_id: StagingId,
    pub source_uri: String,
}

impl LoadJobSpec {
    /// Job with a freshly generated staging id.
    pub fn new(dataset: impl Into<String>, table: impl Into<String>, source: &SourceReference) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
            staging_id: StagingId::generate(),
            source_uri: source.uri(),
        }
    }

    pub fn with_staging_id(mut self, staging_id: StagingId) -> Self {
        self.staging_id = staging_id;
        self
    }

    /// `dataset.staging_id`
    pub fn staging_table(&self) -> String {
        format!("{}.{}", self.dataset, self.staging_id)
    }

    /// `dataset.table`
    pub fn target_table(&self) -> String {
        format!("{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterValue {
    String(String),
    StringArray(Vec<String>),
}

/// A named query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptParameter {
    pub name: String,
    pub value: ParameterValue,
}

/// Rendered script text plus its bound parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadScript {
    pub sql: String,
    pub staging_table: String,
    pub parameters: Vec<ScriptParameter>,
}

pub struct LoadScriptBuilder;

impl LoadScriptBuilder {
    pub fn build(spec: &LoadJobSpec) -> LoadScript {
        let staging = spec.staging_table();
        let target = spec.target_table();
        let schema = STAGING_SCHEMA
            .iter()
            .map(|(name, ty)| format!("    {} {}", name, ty))
            .collect::<Vec<_>>()
            .join(",\n");

        let sql = format!(
            "BEGIN
  CREATE TABLE `{staging}`
  (
{schema}
  )
  OPTIONS (expiration_timestamp = TIMESTAMP_ADD(CURRENT_TIMESTAMP(), INTERVAL 1 DAY));

  LOAD DATA INTO `{staging}`
  (
{schema}
  )
  FROM FILES (
    format = 'CSV',
    uris = @{param},
    field_delimiter = '\\t'
  );

  INSERT INTO `{target}`({columns})
  SELECT
{projection}
  FROM `{staging}`;

  DROP TABLE IF EXISTS `{staging}`;
EXCEPTION WHEN ERROR THEN
  DROP TABLE IF EXISTS `{staging}`;
  RAISE USING MESSAGE = @@error.message;
END
",
            staging = staging,
            schema = schema,
            param = SOURCE_URIS_PARAM,
            target = target,
            columns = TARGET_COLUMNS.join(", "),
            projection = projection(),
        );

        LoadScript {
            sql,
            staging_table: staging,
            parameters: vec![ScriptParameter {
                name: SOURCE_URIS_PARAM.to_string(),
                value: ParameterValue::StringArray(vec![spec.source_uri.clone()]),
            }],
        }
    }
}

fn projection() -> String {
    TARGET_COLUMNS
        .iter()
        .map(|&column| {
            let expr = match column {
                "request_time" => format!(
                    "TIMESTAMP(DATETIME(PARSE_DATE('%Y/%m/%d', request_date), request_time), '{}') AS request_time",
                    SOURCE_TIME_ZONE
                ),
                c if DASH_IS_NULL.contains(&c) => {
                    format!("CASE {c} WHEN '-' THEN NULL ELSE {c} END AS {c}", c = c)
                },
                c => c.to_string(),
            };
            format!("    {}", expr)
        })
        .collect::<Vec<_>>()
        .join(",\n")
}
