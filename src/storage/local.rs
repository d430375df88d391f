//! Filesystem-backed sink: each bucket is a directory under `root`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use walkdir::WalkDir;

use super::{StorageError, StorageSink};

#[derive(Debug, Clone)]
pub struct LocalDirSink {
    root: PathBuf,
}

impl LocalDirSink {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }
}

#[async_trait]
impl StorageSink for LocalDirSink {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::metadata(self.bucket_dir(bucket))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.bucket_dir(bucket)).await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.bucket_dir(bucket);
        if !self.bucket_exists(bucket).await? {
            return Err(StorageError::NoSuchBucket(bucket.to_string()));
        }

        let mut names = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&dir) {
                let name: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                names.push(name.join("/"));
            }
        }
        Ok(names)
    }

    async fn upload_file(
        &self,
        bucket: &str,
        from: &Path,
        to: &str,
    ) -> Result<(), StorageError> {
        if !self.bucket_exists(bucket).await? {
            return Err(StorageError::NoSuchBucket(bucket.to_string()));
        }

        // Object names stay inside the bucket directory.
        let relative = Path::new(to);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if to.is_empty() || !plain {
            return Err(StorageError::InvalidObjectName(to.to_string()));
        }

        let target = self.bucket_dir(bucket).join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!("{} to {}/{}", from.display(), bucket, to);
        tokio::fs::copy(from, &target).await?;
        Ok(())
    }
}
