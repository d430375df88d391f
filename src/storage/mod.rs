//! Object storage sinks for the published snapshot.

mod gcs;
mod local;

pub use gcs::{GcsClient, GCS_ENDPOINT};
pub use local::LocalDirSink;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bucket {0} does not exist")]
    NoSuchBucket(String),
    #[error("invalid storage url: {0}")]
    InvalidUrl(String),
    #[error("invalid object name: {0:?}")]
    InvalidObjectName(String),
}

/// A bucket/object store. Uploads overwrite; there is no versioning.
#[async_trait]
pub trait StorageSink: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StorageError>;

    /// Upload the local file `from` to `bucket/to`, replacing any object there.
    async fn upload_file(&self, bucket: &str, from: &Path, to: &str)
        -> Result<(), StorageError>;

    /// Create `bucket` unless it already exists.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if self.bucket_exists(bucket).await? {
            info!("Bucket {} already exists", bucket);
        } else {
            info!("Creating bucket {}", bucket);
            self.create_bucket(bucket).await?;
        }
        Ok(())
    }
}
