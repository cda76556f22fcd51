//! Appending frames to a cloud data warehouse table.
//!
//! Frames are serialized as newline-delimited JSON and handed to a
//! [`WarehouseSink`] in fixed-size batches. [`BigQuerySink`] submits each
//! batch as a BigQuery load job and waits for it to finish.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::blocks::GcpCredentialsBlock;
use crate::error::{PipelineError, Result};
use crate::frame::{normalize_for_load, CellValue, ColumnView};

pub const DEFAULT_BATCH_ROWS: usize = 500_000;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const BIGQUERY_API: &str = "https://bigquery.googleapis.com/bigquery/v2";
const BIGQUERY_UPLOAD_API: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// `project.dataset.table`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// Accepts `project.dataset.table`, or `dataset.table` when a default
    /// project is supplied.
    pub fn parse(raw: &str, default_project: Option<&str>) -> Result<Self> {
        let parts: Vec<&str> = raw.trim().split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(PipelineError::Validation(format!(
                "invalid table reference '{raw}'"
            )));
        }
        match parts.as_slice() {
            [project, dataset, table] => Ok(Self {
                project: project.to_string(),
                dataset: dataset.to_string(),
                table: table.to_string(),
            }),
            [dataset, table] => match default_project {
                Some(project) => Ok(Self {
                    project: project.to_string(),
                    dataset: dataset.to_string(),
                    table: table.to_string(),
                }),
                None => Err(PipelineError::Validation(format!(
                    "table reference '{raw}' has no project and none is configured"
                ))),
            },
            _ => Err(PipelineError::Validation(format!(
                "invalid table reference '{raw}'; expected project.dataset.table"
            ))),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: String,
}

pub fn bigquery_type(dtype: &DataType) -> Result<&'static str> {
    match dtype {
        DataType::Int64 => Ok("INTEGER"),
        DataType::Float64 => Ok("FLOAT"),
        DataType::Boolean => Ok("BOOLEAN"),
        DataType::String => Ok("STRING"),
        DataType::Datetime(_, _) => Ok("TIMESTAMP"),
        other => Err(PipelineError::Validation(format!(
            "no warehouse type for dtype {other}"
        ))),
    }
}

/// Schema of a normalized frame; every field is nullable.
pub fn table_schema(df: &DataFrame) -> Result<Vec<FieldSchema>> {
    df.get_columns()
        .iter()
        .map(|column| {
            Ok(FieldSchema {
                name: column.name().to_string(),
                field_type: bigquery_type(column.dtype())?.to_string(),
                mode: "NULLABLE".to_string(),
            })
        })
        .collect()
}

/// One JSON object per row. Nulls and non-finite floats are left out of the
/// object.
pub fn frame_to_ndjson(df: &DataFrame) -> Result<Vec<u8>> {
    let views = ColumnView::views(df)?;
    let names: Vec<String> = df.get_column_names().iter().map(|name| name.to_string()).collect();
    let mut buffer = Vec::new();
    for idx in 0..df.height() {
        let mut row = Map::with_capacity(names.len());
        for (name, view) in names.iter().zip(&views) {
            let value = match view.get(idx) {
                CellValue::Null => continue,
                CellValue::Int(v) => Value::from(v),
                CellValue::Float(v) if v.is_finite() => Value::from(v),
                CellValue::Float(_) => continue,
                CellValue::Bool(v) => Value::from(v),
                CellValue::Str(v) => Value::from(v),
                CellValue::Timestamp(ts) => Value::from(ts.format(TIMESTAMP_FORMAT).to_string()),
            };
            row.insert(name.clone(), value);
        }
        serde_json::to_writer(&mut buffer, &row)?;
        buffer.push(b'\n');
    }
    Ok(buffer)
}

#[async_trait]
pub trait WarehouseSink: Send + Sync {
    async fn append_batch(
        &self,
        table: &TableRef,
        schema: &[FieldSchema],
        ndjson: Bytes,
        row_count: usize,
    ) -> Result<()>;
}

/// Appends `df` to `table` in batches of at most `chunk_size` rows, in
/// order. Returns the number of rows sent.
pub async fn write_frame(
    sink: &dyn WarehouseSink,
    table: &TableRef,
    df: &DataFrame,
    chunk_size: usize,
) -> Result<usize> {
    if chunk_size == 0 {
        return Err(PipelineError::Validation("chunk size must be positive".into()));
    }
    let df = normalize_for_load(df)?;
    let schema = table_schema(&df)?;

    let mut offset = 0;
    let mut batches = 0;
    while offset < df.height() {
        let len = chunk_size.min(df.height() - offset);
        let batch = df.slice(offset as i64, len);
        let ndjson = frame_to_ndjson(&batch)?;
        sink.append_batch(table, &schema, Bytes::from(ndjson), len).await?;
        batches += 1;
        offset += len;
        debug!(table = %table, batch = batches, rows = len, "Appended batch");
    }
    info!(table = %table, rows = df.height(), batches, "Wrote dataframe to warehouse");
    Ok(df.height())
}

#[derive(Debug, Clone)]
enum TokenSource {
    Static(String),
    MetadataServer,
}

/// Submits BigQuery load jobs over the REST API.
#[derive(Debug, Clone)]
pub struct BigQuerySink {
    client: reqwest::Client,
    project: String,
    location: Option<String>,
    token: TokenSource,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<JobError>,
}

#[derive(Debug, Deserialize)]
struct JobError {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl JobStatus {
    fn into_result(self, job_id: &str) -> Result<bool> {
        if let Some(error) = self.error_result {
            return Err(PipelineError::Warehouse(format!(
                "load job {job_id} failed: {} ({})",
                error.message.unwrap_or_default(),
                error.reason.unwrap_or_default()
            )));
        }
        Ok(self.state == "DONE")
    }
}

/// JSON configuration of an append load job.
pub fn load_job_config(
    job_project: &str,
    job_id: &str,
    location: Option<&str>,
    table: &TableRef,
    schema: &[FieldSchema],
) -> Value {
    let mut job_reference = json!({ "projectId": job_project, "jobId": job_id });
    if let Some(location) = location {
        job_reference["location"] = Value::from(location);
    }
    json!({
        "jobReference": job_reference,
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": table.project,
                    "datasetId": table.dataset,
                    "tableId": table.table,
                },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": "WRITE_APPEND",
                "createDisposition": "CREATE_IF_NEEDED",
                "schema": { "fields": schema },
            }
        }
    })
}

/// `multipart/related` body with the job metadata followed by the data.
pub fn multipart_body(boundary: &str, metadata: &Value, data: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(data.len() + 1024);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(&serde_json::to_vec(metadata)?);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Ok(body)
}

impl BigQuerySink {
    pub fn from_credentials(client: reqwest::Client, credentials: &GcpCredentialsBlock) -> Self {
        let token = match credentials.static_token() {
            Some(token) => TokenSource::Static(token),
            None => TokenSource::MetadataServer,
        };
        Self {
            client,
            project: credentials.project.clone(),
            location: credentials.location.clone(),
            token,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    async fn access_token(&self) -> Result<String> {
        match &self.token {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::MetadataServer => {
                let token: MetadataToken = self
                    .client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok(token.access_token)
            }
        }
    }

    async fn job_status(&self, token: &str, job_id: &str) -> Result<JobStatus> {
        let url = format!("{BIGQUERY_API}/projects/{}/jobs/{job_id}", self.project);
        let mut request = self.client.get(url).bearer_auth(token);
        if let Some(location) = &self.location {
            request = request.query(&[("location", location)]);
        }
        let response: JobResponse = request.send().await?.error_for_status()?.json().await?;
        response
            .status
            .ok_or_else(|| PipelineError::Warehouse(format!("job {job_id} returned no status")))
    }
}

#[async_trait]
impl WarehouseSink for BigQuerySink {
    async fn append_batch(
        &self,
        table: &TableRef,
        schema: &[FieldSchema],
        ndjson: Bytes,
        row_count: usize,
    ) -> Result<()> {
        let token = self.access_token().await?;
        let job_id = format!("taxiflow_{}", Uuid::new_v4().simple());
        let boundary = format!("taxiflow-{}", Uuid::new_v4().simple());
        let metadata = load_job_config(&self.project, &job_id, self.location.as_deref(), table, schema);
        let body = multipart_body(&boundary, &metadata, &ndjson)?;

        let url = format!("{BIGQUERY_UPLOAD_API}/projects/{}/jobs", self.project);
        let response: JobResponse = self
            .client
            .post(url)
            .query(&[("uploadType", "multipart")])
            .bearer_auth(&token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!(table = %table, job_id, rows = row_count, "Submitted load job");

        let mut status = response.status;
        loop {
            if let Some(current) = status {
                if current.into_result(&job_id)? {
                    break;
                }
            }
            tokio::time::sleep(self.poll_interval).await;
            status = Some(self.job_status(&token, &job_id).await?);
        }
        info!(table = %table, job_id, rows = row_count, "Load job finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_config_appends_and_creates() {
        let table = TableRef::parse("proj.ds.trips", None).unwrap();
        let schema = vec![FieldSchema {
            name: "passenger_count".into(),
            field_type: "INTEGER".into(),
            mode: "NULLABLE".into(),
        }];
        let config = load_job_config("proj", "job1", Some("US"), &table, &schema);
        let load = &config["configuration"]["load"];
        assert_eq!(load["writeDisposition"], "WRITE_APPEND");
        assert_eq!(load["createDisposition"], "CREATE_IF_NEEDED");
        assert_eq!(load["sourceFormat"], "NEWLINE_DELIMITED_JSON");
        assert_eq!(load["destinationTable"]["tableId"], "trips");
        assert_eq!(load["schema"]["fields"][0]["type"], "INTEGER");
        assert_eq!(config["jobReference"]["location"], "US");
    }

    #[test]
    fn multipart_body_wraps_both_parts() {
        let body = multipart_body("b0", &json!({"a": 1}), b"{\"x\":1}\n").unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--b0\r\nContent-Type: application/json"));
        assert!(text.contains("{\"a\":1}\r\n--b0\r\nContent-Type: application/octet-stream\r\n\r\n{\"x\":1}\n"));
        assert!(text.ends_with("\r\n--b0--\r\n"));
    }

    #[test]
    fn failed_job_status_is_an_error() {
        let status = JobStatus {
            state: "DONE".into(),
            error_result: Some(JobError {
                reason: Some("invalid".into()),
                message: Some("bad row".into()),
            }),
        };
        let err = status.into_result("job1").unwrap_err();
        assert!(err.to_string().contains("bad row"));

        let running = JobStatus {
            state: "RUNNING".into(),
            error_result: None,
        };
        assert!(!running.into_result("job1").unwrap());
    }
}
