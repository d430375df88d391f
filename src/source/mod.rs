//! Where each partition's addresses come from.

mod bigquery;
mod csv_export;

pub use self::bigquery::{BigQuerySource, BIGQUERY_ENDPOINT};
pub use self::csv_export::CsvAddressSource;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::address::normalize_all;

#[async_trait]
pub trait AddressSource: Send + Sync {
    /// Raw (unnormalized) addresses recorded for one partition.
    async fn load_raw(&self, partition: &str) -> Result<Vec<String>>;

    /// Distinct normalized addresses for one partition; empty addresses dropped.
    async fn load_addresses(&self, partition: &str) -> Result<BTreeSet<String>> {
        let raw = self.load_raw(partition).await?;
        let total = raw.len();
        let addresses = normalize_all(raw);
        info!(
            "Partition {}: {} records, {} distinct addresses",
            partition,
            total,
            addresses.len()
        );
        Ok(addresses)
    }
}
