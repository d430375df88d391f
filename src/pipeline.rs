//! Incremental geocoding with periodic checkpoints.
//!
//! For each partition the pipeline walks the distinct addresses, looks up the
//! ones the cache has never seen, and every `checkpoint_every` lookups writes
//! the cache to disk and republishes the snapshot. A final checkpoint closes
//! every partition. Lookups run strictly one at a time with a fixed delay
//! after each request.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{Coordinate, GeoCache};
use crate::config::Config;
use crate::geocoder::Geocoder;
use crate::snapshot::GeoSnapshot;
use crate::source::AddressSource;
use crate::storage::StorageSink;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cache_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub bucket: String,
    pub object: String,
    /// Pause after every issued lookup. Cache hits never wait.
    pub request_delay: Duration,
    pub checkpoint_every: NonZeroUsize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let checkpoint_every = NonZeroUsize::new(config.global.checkpoint_every)
            .context("checkpoint_every must be at least 1")?;

        Ok(Self {
            cache_path: config.global.cache_path.clone(),
            snapshot_path: config.global.snapshot_path.clone(),
            bucket: config.storage.bucket.clone(),
            object: config.storage.object.clone(),
            request_delay: config.global.request_delay()?,
            checkpoint_every,
        })
    }
}

/// Counters for one `ensure_resolved` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    pub total: usize,
    pub cache_hits: usize,
    pub lookups: usize,
    pub resolved: usize,
    pub unresolved: usize,
    /// Unresolved lookups whose failure looked temporary.
    pub transient_failures: usize,
    pub checkpoints: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishSummary {
    pub rows: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    pub partition: String,
    pub stats: ResolveStats,
    pub cache_size: usize,
}

pub struct GeocodePipeline {
    geocoder: Arc<dyn Geocoder>,
    sink: Arc<dyn StorageSink>,
    settings: PipelineSettings,
    show_progress: bool,
}

impl GeocodePipeline {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        sink: Arc<dyn StorageSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            geocoder,
            sink,
            settings,
            show_progress: false,
        }
    }

    /// Draw a progress bar per partition.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn progress_bar(&self, len: usize) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )?
                .progress_chars("#>-"),
        );
        Ok(pb)
    }

    /// Make sure every address in `addresses` has a cache entry.
    ///
    /// Unknown addresses are looked up one by one; failures are stored as
    /// the unresolved marker and never retried. Checkpoint write and publish
    /// failures abort the call; everything checkpointed before stays on disk.
    pub async fn ensure_resolved(
        &self,
        addresses: &BTreeSet<String>,
        cache: &mut GeoCache,
    ) -> Result<ResolveStats> {
        let mut stats = ResolveStats {
            total: addresses.len(),
            ..Default::default()
        };
        let pb = self.progress_bar(addresses.len())?;

        for address in addresses {
            pb.inc(1);

            if cache.contains(address) {
                debug!("Cached: {}", address);
                stats.cache_hits += 1;
                continue;
            }

            info!("Resolving: {}", address);
            pb.set_message(address.clone());

            let coordinate = match self.geocoder.lookup(address).await {
                Ok(coordinate) => {
                    stats.resolved += 1;
                    coordinate
                }
                Err(e) => {
                    let transient = e.is_transient();
                    warn!(
                        "{} lookup failed for {} (transient: {}): {}",
                        self.geocoder.id(),
                        address,
                        transient,
                        e
                    );
                    stats.unresolved += 1;
                    if transient {
                        stats.transient_failures += 1;
                    }
                    Coordinate::unresolved()
                }
            };
            cache.insert(address.clone(), coordinate);
            stats.lookups += 1;

            tokio::time::sleep(self.settings.request_delay).await;

            if stats.lookups % self.settings.checkpoint_every.get() == 0 {
                self.checkpoint(cache).await?;
                stats.checkpoints += 1;
            }
        }

        pb.finish_and_clear();

        self.checkpoint(cache).await?;
        stats.checkpoints += 1;

        Ok(stats)
    }

    /// Persist the cache, then publish a fresh snapshot of it.
    pub async fn checkpoint(&self, cache: &GeoCache) -> Result<PublishSummary> {
        cache
            .save(&self.settings.cache_path)
            .context("Failed to checkpoint geocode cache")?;
        info!(
            "Checkpointed {} addresses to {}",
            cache.len(),
            self.settings.cache_path.display()
        );
        self.publish_snapshot(cache).await
    }

    /// Write the cleaned snapshot locally and upload it over the previous one.
    pub async fn publish_snapshot(&self, cache: &GeoCache) -> Result<PublishSummary> {
        let snapshot = GeoSnapshot::from_cache(cache);
        snapshot
            .write_parquet(&self.settings.snapshot_path)
            .context("Failed to write snapshot")?;

        self.sink
            .upload_file(
                &self.settings.bucket,
                &self.settings.snapshot_path,
                &self.settings.object,
            )
            .await
            .context("Failed to upload snapshot")?;

        info!(
            "Published {} coordinates to {}/{} ({} malformed skipped)",
            snapshot.len(),
            self.settings.bucket,
            self.settings.object,
            snapshot.skipped
        );

        Ok(PublishSummary {
            rows: snapshot.len(),
            skipped: snapshot.skipped,
        })
    }

    /// Load one partition's addresses and resolve them against `cache`.
    pub async fn run_partition(
        &self,
        source: &dyn AddressSource,
        partition: &str,
        cache: &mut GeoCache,
    ) -> Result<PartitionReport> {
        info!("Processing partition: {}", partition);
        let addresses = source
            .load_addresses(partition)
            .await
            .with_context(|| format!("Failed to load addresses for {}", partition))?;

        let stats = self.ensure_resolved(&addresses, cache).await?;
        info!(
            "Partition {} done: {} lookups ({} resolved, {} unresolved), {} cache hits",
            partition, stats.lookups, stats.resolved, stats.unresolved, stats.cache_hits
        );

        Ok(PartitionReport {
            partition: partition.to_string(),
            stats,
            cache_size: cache.len(),
        })
    }
}
