//! Partition addresses straight from the warehouse table via the BigQuery
//! REST `jobs.query` endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::AddressSource;

pub const BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

pub struct BigQuerySource {
    client: Client,
    endpoint: String,
    project: String,
    table: String,
    partition_column: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<Row>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    v: Option<String>,
}

impl BigQuerySource {
    pub fn new(
        endpoint: &str,
        project: &str,
        table: &str,
        partition_column: &str,
        access_token: String,
    ) -> Result<Self> {
        // Identifiers are interpolated into SQL; values go through parameters.
        let ident = Regex::new(r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+){0,2}$")?;
        anyhow::ensure!(ident.is_match(table), "Invalid table name: {}", table);
        anyhow::ensure!(
            ident.is_match(partition_column) && !partition_column.contains('.'),
            "Invalid column name: {}",
            partition_column
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project: project.to_string(),
            table: table.to_string(),
            partition_column: partition_column.to_string(),
            access_token,
        })
    }

    fn sql(&self) -> String {
        format!(
            "SELECT address FROM `{}` WHERE {} = @partition",
            self.table, self.partition_column
        )
    }

    async fn get_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.endpoint, self.project, job.job_id
        );
        let mut request = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("timeoutMs", "60000")]);
        if let Some(location) = &job.location {
            request = request.query(&[("location", location.as_str())]);
        }
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

fn collect_addresses(rows: Vec<Row>, out: &mut Vec<String>) {
    out.extend(
        rows.into_iter()
            .filter_map(|row| row.f.into_iter().next().and_then(|cell| cell.v)),
    );
}

#[async_trait]
impl AddressSource for BigQuerySource {
    async fn load_raw(&self, partition: &str) -> Result<Vec<String>> {
        let body = json!({
            "query": self.sql(),
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": [{
                "name": "partition",
                "parameterType": { "type": "STRING" },
                "parameterValue": { "value": partition }
            }],
            "timeoutMs": 60000
        });

        let url = format!("{}/projects/{}/queries", self.endpoint, self.project);
        let mut page: QueryResponse = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .context("BigQuery query failed")?
            .json()
            .await?;

        let job = page
            .job_reference
            .take()
            .context("BigQuery response has no job reference")?;

        while !page.job_complete {
            debug!("Waiting for BigQuery job {}", job.job_id);
            tokio::time::sleep(Duration::from_secs(1)).await;
            page = self.get_results(&job, None).await?;
        }

        let mut addresses = Vec::new();
        loop {
            let next = page.page_token.take();
            collect_addresses(std::mem::take(&mut page.rows), &mut addresses);
            match next {
                Some(token) => page = self.get_results(&job, Some(&token)).await?,
                None => break,
            }
        }

        Ok(addresses)
    }
}
