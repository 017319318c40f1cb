// ABOUTME: BigQuery target driver over the v2 REST API
// ABOUTME: Dataset setup, table creation, NDJSON load jobs and DML deletes, each polled to completion

pub mod auth;
pub mod encode;
pub mod models;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::time::{Duration, Instant};

use self::auth::TokenSource;
use self::models::{
    Dataset, DatasetReference, Job, JobConfiguration, JobReference, LoadConfiguration, LoadJob,
    QueryRequest, QueryResponse, Table, TableReference,
};
use crate::config::TargetConfig;
use crate::error::SyncError;
use crate::sync::schema::TargetSchema;
use crate::target::{TargetWarehouse, WriteDisposition};
use crate::types::Row;
use crate::utils::{quote_bq_ident, retry_with_backoff, RetryPolicy};

/// Longest we wait for a single load or query job.
const JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const CONNECT_POLICY: RetryPolicy = RetryPolicy::new(2, Duration::from_secs(2));
const MULTIPART_BOUNDARY: &str = "ct_replicator_upload_boundary";

pub struct BigQueryTarget {
    client: Client,
    tokens: TokenSource,
    api_base_url: String,
    project_id: String,
    dataset: String,
    location: String,
}

impl BigQueryTarget {
    /// Build the client and make sure the dataset exists.
    pub async fn connect(config: &TargetConfig) -> Result<Self, SyncError> {
        let endpoint = config.endpoint();
        tracing::info!("Connecting to BigQuery dataset {}", endpoint);

        let connect = async {
            let tokens =
                TokenSource::from_config(config.access_token.as_deref(), config.credentials.clone())?;
            let target = Self::new(config, tokens)?;
            let setup = &target;
            retry_with_backoff("BigQuery dataset setup", CONNECT_POLICY, move || {
                setup.ensure_dataset()
            })
            .await?;
            Ok::<_, anyhow::Error>(target)
        };

        connect
            .await
            .map_err(|source| SyncError::ConnectionFailure { endpoint, source })
    }

    pub fn new(config: &TargetConfig, tokens: TokenSource) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            tokens,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            dataset: config.dataset.clone(),
            location: config.location.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/bigquery/v2/projects/{}{}",
            self.api_base_url, self.project_id, path
        )
    }

    fn table_reference(&self, table: &str) -> TableReference {
        TableReference {
            project_id: self.project_id.clone(),
            dataset_id: self.dataset.clone(),
            table_id: table.to_string(),
        }
    }

    /// `project.dataset.table`, quoted for use in SQL.
    pub fn qualified_table(&self, table: &str) -> String {
        quote_bq_ident(&format!("{}.{}.{}", self.project_id, self.dataset, table))
    }

    async fn ensure_dataset(&self) -> Result<()> {
        let url = self.api_url(&format!("/datasets/{}", self.dataset));
        let token = self.tokens.token().await?;
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .context("Failed to reach the BigQuery API")?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::info!(
                "Dataset {} not found, creating it in {}",
                self.dataset,
                self.location
            );
            let body = Dataset {
                dataset_reference: DatasetReference {
                    project_id: self.project_id.clone(),
                    dataset_id: self.dataset.clone(),
                },
                location: self.location.clone(),
            };
            let response = self
                .client
                .post(self.api_url("/datasets"))
                .bearer_auth(&token)
                .json(&body)
                .send()
                .await
                .context("Failed to create dataset")?;
            if response.status() == StatusCode::CONFLICT {
                return Ok(());
            }
            check_status(response, "Dataset creation").await?;
            return Ok(());
        }

        check_status(response, "Dataset lookup").await?;
        Ok(())
    }

    async fn get_job(&self, reference: &JobReference) -> Result<Job> {
        let mut url = self.api_url(&format!("/jobs/{}", reference.job_id));
        if let Some(location) = &reference.location {
            url.push_str("?location=");
            url.push_str(location);
        }
        let token = self.tokens.token().await?;
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .context("Failed to get job status")?;
        let response = check_status(response, "Job status").await?;
        response.json().await.context("Failed to parse job status")
    }

    /// Poll a job until it is DONE, failing on its error result.
    async fn wait_for_job(&self, reference: &JobReference) -> Result<Job> {
        let started = Instant::now();
        let mut delay = Duration::from_millis(500);
        loop {
            let job = self.get_job(reference).await?;
            if job.is_done() {
                if let Some(error) = &job.status.error_result {
                    let details: Vec<String> =
                        job.status.errors.iter().map(|e| e.to_string()).collect();
                    bail!(
                        "Job {} failed: {}{}",
                        reference.job_id,
                        error,
                        if details.is_empty() {
                            String::new()
                        } else {
                            format!(" ({})", details.join("; "))
                        }
                    );
                }
                return Ok(job);
            }
            if started.elapsed() > JOB_TIMEOUT {
                bail!("Job {} did not finish within {:?}", reference.job_id, JOB_TIMEOUT);
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(5));
        }
    }

    fn new_job_reference(&self) -> JobReference {
        JobReference {
            project_id: self.project_id.clone(),
            job_id: format!("ct_replicator_{}", uuid::Uuid::new_v4().simple()),
            location: Some(self.location.clone()),
        }
    }

    /// Run a standard-SQL statement and return the affected row count.
    pub async fn execute_query(&self, sql: &str) -> Result<u64> {
        let request = QueryRequest {
            query: sql.to_string(),
            use_legacy_sql: false,
            location: self.location.clone(),
            timeout_ms: 10_000,
        };
        let token = self.tokens.token().await?;
        let response = self
            .client
            .post(self.api_url("/queries"))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .context("Failed to submit query")?;
        let response = check_status(response, "Query").await?;
        let result: QueryResponse = response
            .json()
            .await
            .context("Failed to parse query response")?;

        if !result.errors.is_empty() {
            let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
            bail!("Query failed: {}", messages.join("; "));
        }

        if result.job_complete {
            return Ok(result
                .num_dml_affected_rows
                .and_then(|n| n.parse().ok())
                .unwrap_or(0));
        }

        let reference = result
            .job_reference
            .context("Query response carried no job reference")?;
        let job = self.wait_for_job(&reference).await?;
        Ok(job.affected_rows().unwrap_or(0))
    }
}

/// Pass successful responses through; turn failures into errors carrying the body.
async fn check_status(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        bail!(
            "{} was rejected ({}): check BQ_ACCESS_TOKEN or GOOGLE_APPLICATION_CREDENTIALS. {}",
            what,
            status,
            body
        );
    }
    bail!("{} failed with status {}: {}", what, status, body)
}

/// Assemble a `multipart/related` body: job metadata followed by the data.
fn multipart_body(metadata: &[u8], data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + data.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}

fn write_disposition(disposition: WriteDisposition) -> &'static str {
    match disposition {
        WriteDisposition::Replace => "WRITE_TRUNCATE",
        WriteDisposition::Append => "WRITE_APPEND",
    }
}

#[async_trait]
impl TargetWarehouse for BigQueryTarget {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let url = self.api_url(&format!("/datasets/{}/tables/{}", self.dataset, table));
        let token = self.tokens.token().await?;
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .context("Failed to look up table")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response, "Table lookup").await?;
        Ok(true)
    }

    async fn create_table(&self, table: &str, schema: &TargetSchema) -> Result<()> {
        let body = Table::from_schema(self.table_reference(table), schema);
        let token = self.tokens.token().await?;
        let response = self
            .client
            .post(self.api_url(&format!("/datasets/{}/tables", self.dataset)))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .context("Failed to create table")?;
        if response.status() == StatusCode::CONFLICT {
            tracing::info!("Table {} already exists", table);
            return Ok(());
        }
        check_status(response, "Table creation").await?;
        Ok(())
    }

    async fn load_rows(
        &self,
        table: &str,
        rows: &[Row],
        disposition: WriteDisposition,
    ) -> Result<u64> {
        let job = LoadJob {
            job_reference: self.new_job_reference(),
            configuration: JobConfiguration {
                load: LoadConfiguration {
                    destination_table: self.table_reference(table),
                    source_format: "NEWLINE_DELIMITED_JSON".to_string(),
                    write_disposition: write_disposition(disposition).to_string(),
                    create_disposition: "CREATE_NEVER".to_string(),
                },
            },
        };
        let metadata = serde_json::to_vec(&job).context("Failed to encode load job")?;
        let data = encode::rows_to_ndjson(rows)?;

        let url = format!(
            "{}/upload/bigquery/v2/projects/{}/jobs?uploadType=multipart",
            self.api_base_url, self.project_id
        );
        let token = self.tokens.token().await?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(multipart_body(&metadata, &data))
            .send()
            .await
            .with_context(|| format!("Failed to upload rows for {}", table))?;
        let response = check_status(response, "Load job submission").await?;
        let submitted: Job = response
            .json()
            .await
            .context("Failed to parse load job")?;

        let done = self.wait_for_job(&submitted.job_reference).await?;
        Ok(done.affected_rows().unwrap_or(rows.len() as u64))
    }

    async fn delete_where(&self, table: &str, predicate: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE {}", self.qualified_table(table), predicate);
        self.execute_query(&sql)
            .await
            .with_context(|| format!("Delete from {} failed", table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> BigQueryTarget {
        let config = TargetConfig {
            project_id: "analytics-prod".to_string(),
            dataset: "sales_raw".to_string(),
            location: "US".to_string(),
            credentials: None,
            access_token: Some("token".to_string()),
            api_base_url: "https://bigquery.example.com/".to_string(),
        };
        BigQueryTarget::new(&config, TokenSource::fixed("token")).unwrap()
    }

    #[test]
    fn test_urls_and_names() {
        let target = target();
        assert_eq!(
            target.api_url("/datasets/sales_raw"),
            "https://bigquery.example.com/bigquery/v2/projects/analytics-prod/datasets/sales_raw"
        );
        assert_eq!(
            target.qualified_table("orders"),
            "`analytics-prod.sales_raw.orders`"
        );
    }

    #[test]
    fn test_multipart_body_layout() {
        let body = String::from_utf8(multipart_body(b"{\"a\":1}", b"{\"id\":\"1\"}\n")).unwrap();
        assert!(body.starts_with("--ct_replicator_upload_boundary\r\nContent-Type: application/json"));
        assert!(body.contains("\r\n\r\n{\"a\":1}\r\n--ct_replicator_upload_boundary\r\n"));
        assert!(body.ends_with("\r\n--ct_replicator_upload_boundary--\r\n"));
    }

    #[test]
    fn test_write_disposition_names() {
        assert_eq!(write_disposition(WriteDisposition::Replace), "WRITE_TRUNCATE");
        assert_eq!(write_disposition(WriteDisposition::Append), "WRITE_APPEND");
    }
}
