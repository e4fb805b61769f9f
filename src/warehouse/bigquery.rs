//! Blocking BigQuery client over the v2 REST API

use std::time::Duration;

use arrow::record_batch::RecordBatch;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::{Credentials, TokenProvider};
use super::rows::{TableRow, TableSchema, rows_to_batch};
use super::{PageStream, TableRef, Warehouse};
use crate::config::ResolvedConfig;
use crate::error::{LabelerError, Result};

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
/// Server-side wait per request while a job is still running
const WAIT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorProto {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    status: JobStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    max_results: u32,
    timeout_ms: u64,
    format_options: FormatOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FormatOptions {
    use_int64_timestamp: bool,
}

/// Warehouse client bound to a billing project
pub struct BigQueryClient {
    http: reqwest::blocking::Client,
    tokens: TokenProvider,
    billing_project: String,
    base_url: String,
}

impl BigQueryClient {
    pub fn new(credentials: Credentials, billing_project: impl Into<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            tokens: TokenProvider::new(credentials, http.clone()),
            http,
            billing_project: billing_project.into(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Client for the configured credentials file and billing project
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        log::info!(
            "Connecting to BigQuery with credentials {}",
            config.credentials_path.display()
        );
        let credentials = Credentials::from_file(&config.credentials_path)?;
        Self::new(credentials, &config.billing_project)
    }

    /// Point the client at a different API root
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn send<T: DeserializeOwned>(&self, request: reqwest::blocking::RequestBuilder) -> Result<T> {
        let token = self.tokens.access_token()?;
        let response = request.bearer_auth(token).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LabelerError::warehouse(status.as_u16(), error_message(&body)));
        }
        Ok(response.json()?)
    }

    /// Start a query and wait until its first page is available
    fn start_query(&self, sql: &str, page_size: u32) -> Result<QueryResponse> {
        log::debug!("Running query:\n{sql}");
        let url = format!("{}/projects/{}/queries", self.base_url, self.billing_project);
        let body = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            max_results: page_size,
            timeout_ms: WAIT_TIMEOUT_MS,
            format_options: FormatOptions {
                use_int64_timestamp: true,
            },
        };
        let mut response: QueryResponse = self.send(self.http.post(&url).json(&body))?;

        while !response.job_complete {
            let job = response.job_reference.clone().ok_or_else(|| {
                LabelerError::warehouse(0, "Incomplete query response without a job reference")
            })?;
            log::debug!("Waiting for job {}", job.job_id);
            response = self.query_results(&job, page_size, None)?;
        }
        Ok(response)
    }

    fn query_results(
        &self,
        job: &JobReference,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.base_url, job.project_id, job.job_id
        );
        let mut params = vec![
            ("maxResults", page_size.to_string()),
            ("timeoutMs", WAIT_TIMEOUT_MS.to_string()),
            ("formatOptions.useInt64Timestamp", "true".to_string()),
        ];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.send(self.http.get(&url).query(&params))
    }

    fn wait_for_job(&self, mut job: Job) -> Result<()> {
        loop {
            if job.status.state == "DONE" {
                return match job.status.error_result {
                    Some(error) => Err(LabelerError::warehouse(0, error.message)),
                    None => Ok(()),
                };
            }
            std::thread::sleep(Duration::from_millis(500));
            let reference = &job.job_reference;
            let url = format!(
                "{}/projects/{}/jobs/{}",
                self.base_url, reference.project_id, reference.job_id
            );
            let params: Vec<(&str, String)> = reference
                .location
                .iter()
                .map(|l| ("location", l.clone()))
                .collect();
            job = self.send(self.http.get(&url).query(&params))?;
        }
    }
}

/// Pull the `error.message` field out of an API error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

impl Warehouse for BigQueryClient {
    fn execute(&self, sql: &str) -> Result<()> {
        self.start_query(sql, 1).map(|_| ())
    }

    fn execute_to_destination(&self, sql: &str, destination: Option<&TableRef>) -> Result<()> {
        let destination = destination.ok_or(LabelerError::MissingDestination)?;
        log::debug!("Writing query result to {destination}:\n{sql}");
        let url = format!("{}/projects/{}/jobs", self.base_url, self.billing_project);
        let body = json!({
            "configuration": {
                "query": {
                    "query": sql,
                    "useLegacySql": false,
                    "destinationTable": {
                        "projectId": destination.project,
                        "datasetId": destination.dataset,
                        "tableId": destination.table,
                    },
                    "writeDisposition": "WRITE_TRUNCATE",
                }
            }
        });
        let job: Job = self.send(self.http.post(&url).json(&body))?;
        self.wait_for_job(job)
    }

    fn stream_paginated<'a>(&'a self, sql: &str, page_size: u32) -> Result<PageStream<'a>> {
        let first = self.start_query(sql, page_size)?;
        Ok(Box::new(Pages {
            client: self,
            page_size,
            job: first.job_reference.clone(),
            schema: first.schema.clone().unwrap_or(TableSchema { fields: Vec::new() }),
            pending: Some(first),
            done: false,
        }))
    }
}

/// Iterator over result pages, fetching each next page on demand
struct Pages<'a> {
    client: &'a BigQueryClient,
    page_size: u32,
    job: Option<JobReference>,
    schema: TableSchema,
    pending: Option<QueryResponse>,
    done: bool,
}

impl Pages<'_> {
    fn next_page(&mut self) -> Result<Option<RecordBatch>> {
        let page = match self.pending.take() {
            Some(page) => page,
            None => return Ok(None),
        };

        if let (Some(token), Some(job)) = (page.page_token.as_deref(), self.job.as_ref()) {
            self.pending = Some(self.client.query_results(job, self.page_size, Some(token))?);
        }

        if let Some(schema) = page.schema {
            self.schema = schema;
        }
        // an empty result still comes back as one page
        if page.rows.is_empty() && self.pending.is_none() {
            return Ok(None);
        }
        rows_to_batch(&self.schema, &page.rows).map(Some)
    }
}

impl Iterator for Pages<'_> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_page() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error": {"code": 400, "message": "Syntax error at [1:1]"}}"#;
        assert_eq!(error_message(body), "Syntax error at [1:1]");
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_query_response_parsing() {
        let response: QueryResponse = serde_json::from_value(json!({
            "jobReference": {"projectId": "p", "jobId": "j", "location": "US"},
            "jobComplete": true,
            "schema": {"fields": [{"name": "n", "type": "INTEGER"}]},
            "rows": [{"f": [{"v": "1"}]}],
            "pageToken": "next",
            "totalRows": "2"
        }))
        .unwrap();
        assert!(response.job_complete);
        assert_eq!(response.rows.len(), 1);
        assert_eq!(response.page_token.as_deref(), Some("next"));
        assert_eq!(response.job_reference.unwrap().location.as_deref(), Some("US"));
    }

    #[test]
    fn test_missing_destination_fails_before_request() {
        let credentials = Credentials::from_json(
            r#"{"type": "authorized_user", "client_id": "a", "client_secret": "b", "refresh_token": "c"}"#,
        )
        .unwrap();
        let client = BigQueryClient::new(credentials, "billing")
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let err = client
            .execute_to_destination("SELECT 1", None)
            .unwrap_err();
        assert!(matches!(err, LabelerError::MissingDestination));
    }
}
