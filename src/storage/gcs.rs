//! Google Cloud Storage via the JSON API.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::{StorageError, StorageSink};

pub const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Clone)]
pub struct GcsClient {
    client: Client,
    base: Url,
    project: String,
    access_token: String,
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

impl GcsClient {
    pub fn new(endpoint: &str, project: &str, access_token: String, dry_run: bool) -> Result<Self> {
        let base = Url::parse(endpoint).context("Invalid GCS endpoint")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base,
            project: project.to_string(),
            access_token,
            dry_run,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StorageError::Status { status, body })
    }
}

#[async_trait]
impl StorageSink for GcsClient {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        let url = self.url(&["storage", "v1", "b", bucket])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        Ok(true)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let url = self.url(&["storage", "v1", "b"])?;
        let response = self
            .client
            .post(url)
            .query(&[("project", self.project.as_str())])
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "name": bucket }))
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StorageError> {
        let url = self.url(&["storage", "v1", "b", bucket, "o"])?;
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(url.clone())
                .query(&[("fields", "items(name),nextPageToken")])
                .bearer_auth(&self.access_token);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = Self::check(request.send().await?).await?;
            let page: ObjectList = response.json().await?;
            names.extend(page.items.into_iter().map(|item| item.name));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Listed {} objects in {}", names.len(), bucket);
        Ok(names)
    }

    async fn upload_file(
        &self,
        bucket: &str,
        from: &Path,
        to: &str,
    ) -> Result<(), StorageError> {
        info!("{} to {}/{}", from.display(), bucket, to);
        if self.dry_run {
            return Ok(());
        }

        let body = tokio::fs::read(from).await?;
        let url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        let response = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", to)])
            .bearer_auth(&self.access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}
